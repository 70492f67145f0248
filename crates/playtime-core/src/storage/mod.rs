pub mod database;
pub mod migrations;

pub use database::{
    parse_ts, AuditEntry, DailySummary, Database, DiscoveryCandidate, EndReason, Limits,
    MaintenanceReport, MessageTemplate, NewPattern, RetentionPolicy, SessionRecord, UserRecord,
};
