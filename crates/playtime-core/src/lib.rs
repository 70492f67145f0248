//! # Playtime Core Library
//!
//! Core logic for the playtime screen-time daemon: a tick-driven
//! enforcement kernel per monitored user, fed by pluggable detection
//! workers and backed by an embedded SQLite store. The `playtime`
//! binary is a thin CLI over this library.
//!
//! ## Architecture
//!
//! - **Detection**: workers sample native processes (CPU-gated),
//!   Proton-wrapped games, and browser domains each tick
//! - **Patterns**: a persisted regex rule base classifies activities
//!   into categories; persistent unknowns surface through discovery
//! - **Accounting**: wall-clock counters with a suspend/resume cap
//! - **Kernel**: per-user state machine (available, grace, enforcing,
//!   outside hours) deciding warnings, kills, and blocked launches
//! - **Messaging**: events render through templated variants and a
//!   notification backend chain ending in a log-only fallback
//!
//! ## Key Components
//!
//! - [`Daemon`]: the tick orchestrator
//! - [`Database`]: all persisted state
//! - [`EnforcementKernel`]: the state machine
//! - [`PatternEngine`]: compiled classification rules

pub mod accounting;
pub mod config;
pub mod daemon;
pub mod detect;
pub mod error;
pub mod events;
pub mod kernel;
pub mod notify;
pub mod passwd;
pub mod pattern;
pub mod router;
pub mod schedule;
pub mod storage;
pub mod subproc;

pub use accounting::TickOutcome;
pub use config::{DaemonConfig, DaemonMode, VariantSelection, DEFAULT_CONFIG_PATH, DEFAULT_DB_PATH};
pub use daemon::{logical_date, Daemon};
pub use detect::{ActivitySource, DetectedActivity, DetectionWorker};
pub use error::{
    ConfigError, CoreError, DatabaseError, NotifyError, PatternError, ScheduleError, WorkerError,
};
pub use events::{Event, Intention, TemplateVars};
pub use kernel::{EnforcementKernel, KernelConfig, KernelState, KillReason, TrackedProcess};
pub use notify::{Dispatcher, Notification, NotificationBackend, Urgency};
pub use pattern::{Category, Classification, MonitorState, Pattern, PatternEngine, PatternType};
pub use router::{render_template, MessageRouter};
pub use schedule::{validate_import, ScheduleExport, ScheduleExportEntry, WeekSchedule};
pub use storage::{
    AuditEntry, DailySummary, Database, DiscoveryCandidate, EndReason, Limits, MaintenanceReport,
    MessageTemplate, NewPattern, RetentionPolicy, SessionRecord, UserRecord,
};
