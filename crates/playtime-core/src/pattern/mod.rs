//! Pattern rule base and matching engine.
//!
//! Patterns map activity keys (process basenames, browser domains) to
//! categories via regexes. The engine holds the compiled rule set,
//! partitioned so user-specific `active` rules always win over global
//! ones, and is rebuilt whenever the store's change epoch moves.

pub mod discovery;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::detect::DetectedActivity;
pub use crate::error::PatternError;

/// Activity category. Only `gaming` drains the gaming budget and is
/// subject to termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Gaming,
    Educational,
    Social,
    Launcher,
    Ignored,
}

impl Category {
    pub fn as_str(self) -> &'static str {
        match self {
            Category::Gaming => "gaming",
            Category::Educational => "educational",
            Category::Social => "social",
            Category::Launcher => "launcher",
            Category::Ignored => "ignored",
        }
    }

    /// Does time in this category count toward the daily total?
    pub fn is_tracked(self) -> bool {
        !matches!(self, Category::Ignored)
    }
}

impl FromStr for Category {
    type Err = PatternError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gaming" => Ok(Category::Gaming),
            "educational" => Ok(Category::Educational),
            "social" => Ok(Category::Social),
            "launcher" => Ok(Category::Launcher),
            "ignored" => Ok(Category::Ignored),
            other => Err(PatternError::UnknownCategory(other.into())),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of activity key a pattern matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Process,
    BrowserDomain,
}

impl PatternType {
    pub fn as_str(self) -> &'static str {
        match self {
            PatternType::Process => "process",
            PatternType::BrowserDomain => "browser_domain",
        }
    }
}

impl FromStr for PatternType {
    type Err = PatternError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "process" => Ok(PatternType::Process),
            "browser_domain" => Ok(PatternType::BrowserDomain),
            other => Err(PatternError::UnknownPatternType(other.into())),
        }
    }
}

/// Lifecycle state of a pattern. Only `active` rules participate in
/// enforcement matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Active,
    Discovered,
    Ignored,
}

impl MonitorState {
    pub fn as_str(self) -> &'static str {
        match self {
            MonitorState::Active => "active",
            MonitorState::Discovered => "discovered",
            MonitorState::Ignored => "ignored",
        }
    }
}

impl FromStr for MonitorState {
    type Err = PatternError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MonitorState::Active),
            "discovered" => Ok(MonitorState::Discovered),
            "ignored" => Ok(MonitorState::Ignored),
            other => Err(PatternError::UnknownState(other.into())),
        }
    }
}

/// A persisted classification rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: i64,
    /// Owning user, or `None` for a global rule.
    pub owner: Option<String>,
    pub pattern_type: PatternType,
    pub regex: String,
    pub display_name: String,
    pub category: Category,
    pub monitor_state: MonitorState,
    /// Lower evaluates earlier within its partition.
    pub priority: i64,
    /// Browser family that produced a browser_domain rule.
    pub browser: Option<String>,
    pub cpu_threshold: Option<f32>,
    pub sample_window_sec: Option<i64>,
    pub min_samples: Option<i64>,
    pub discovered_cmdline: Option<String>,
    pub times_seen: i64,
    pub total_runtime_sec: i64,
}

/// Compile a rule regex, rejecting it on error.
///
/// Matching is case-insensitive throughout, the way the seeded rules
/// expect (`steam` matches `Steam`).
pub fn compile_rule(pattern: &str) -> Result<Regex, PatternError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| PatternError::InvalidRegex {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

struct CompiledRule {
    pattern: Pattern,
    regex: Regex,
}

/// Result of classifying one activity.
#[derive(Debug, Clone)]
pub enum Classification {
    /// First matching active rule, by partition then priority then id.
    Matched(Pattern),
    /// No active rule matched; candidate for discovery.
    Unknown,
}

/// Compiled, partitioned rule set.
///
/// Owned by the daemon loop and rebuilt under an epoch comparison at
/// the start of a tick; never mutated while a tick is in flight.
pub struct PatternEngine {
    /// user name → that user's active rules, ordered.
    user_active: HashMap<String, Vec<CompiledRule>>,
    /// Global active rules, ordered.
    global_active: Vec<CompiledRule>,
    /// Store change epoch this engine was built from.
    epoch: i64,
}

impl PatternEngine {
    /// Build from the full pattern list. Rules whose regex no longer
    /// compiles are skipped with a warning rather than poisoning the
    /// whole set.
    pub fn build(patterns: Vec<Pattern>, epoch: i64) -> Self {
        let mut user_active: HashMap<String, Vec<CompiledRule>> = HashMap::new();
        let mut global_active = Vec::new();

        for pattern in patterns {
            if pattern.monitor_state != MonitorState::Active {
                continue;
            }
            let regex = match compile_rule(&pattern.regex) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(pattern_id = pattern.id, error = %e, "skipping uncompilable pattern");
                    continue;
                }
            };
            let rule = CompiledRule { pattern, regex };
            match rule.pattern.owner.clone() {
                Some(owner) => user_active.entry(owner).or_default().push(rule),
                None => global_active.push(rule),
            }
        }

        for rules in user_active.values_mut() {
            rules.sort_by_key(|r| (r.pattern.priority, r.pattern.id));
        }
        global_active.sort_by_key(|r| (r.pattern.priority, r.pattern.id));

        Self {
            user_active,
            global_active,
            epoch,
        }
    }

    pub fn epoch(&self) -> i64 {
        self.epoch
    }

    /// Classify one activity for a user: user-specific active rules
    /// first, then global active rules; first match wins.
    pub fn classify(&self, user: &str, activity: &DetectedActivity) -> Classification {
        let partitions = [
            self.user_active.get(user).map(Vec::as_slice).unwrap_or(&[]),
            self.global_active.as_slice(),
        ];
        for rules in partitions {
            for rule in rules {
                if rule.pattern.pattern_type != activity.pattern_type() {
                    continue;
                }
                if rule_matches(rule, activity) {
                    return Classification::Matched(rule.pattern.clone());
                }
            }
        }
        Classification::Unknown
    }
}

fn rule_matches(rule: &CompiledRule, activity: &DetectedActivity) -> bool {
    if rule.regex.is_match(&activity.key) {
        return true;
    }
    // Plain process rules also match against the command line, so
    // `java.*minecraft` style rules see the full invocation. Proton
    // activities match on their extracted key alone; a generic
    // `\.exe$` rule must not swallow a disambiguated game.
    if rule.pattern.pattern_type == PatternType::Process
        && activity.source == crate::detect::ActivitySource::Process
    {
        if let Some(cmdline) = &activity.cmdline {
            return rule.regex.is_match(cmdline);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{ActivitySource, DetectedActivity};

    fn pattern(id: i64, owner: Option<&str>, regex: &str, category: Category) -> Pattern {
        Pattern {
            id,
            owner: owner.map(String::from),
            pattern_type: PatternType::Process,
            regex: regex.into(),
            display_name: regex.into(),
            category,
            monitor_state: MonitorState::Active,
            priority: 100,
            browser: None,
            cpu_threshold: None,
            sample_window_sec: None,
            min_samples: None,
            discovered_cmdline: None,
            times_seen: 0,
            total_runtime_sec: 0,
        }
    }

    fn process(key: &str, cmdline: &str) -> DetectedActivity {
        DetectedActivity {
            key: key.into(),
            source: ActivitySource::Process,
            pid: Some(4242),
            cpu_percent: Some(20.0),
            cmdline: Some(cmdline.into()),
        }
    }

    #[test]
    fn user_rules_shadow_global_rules() {
        let engine = PatternEngine::build(
            vec![
                pattern(1, None, "minecraft", Category::Gaming),
                pattern(2, Some("anders"), "minecraft", Category::Educational),
            ],
            0,
        );
        let activity = process("java", "java -jar minecraft.jar");
        match engine.classify("anders", &activity) {
            Classification::Matched(p) => assert_eq!(p.id, 2),
            Classification::Unknown => panic!("expected a match"),
        }
        match engine.classify("kari", &activity) {
            Classification::Matched(p) => assert_eq!(p.id, 1),
            Classification::Unknown => panic!("expected global match"),
        }
    }

    #[test]
    fn priority_breaks_ties_then_id() {
        let mut a = pattern(5, None, "steam", Category::Launcher);
        a.priority = 10;
        let b = pattern(1, None, "steam", Category::Gaming);
        let engine = PatternEngine::build(vec![b, a], 0);
        match engine.classify("anders", &process("steam", "/usr/bin/steam")) {
            Classification::Matched(p) => assert_eq!(p.id, 5),
            Classification::Unknown => panic!("expected a match"),
        }
    }

    #[test]
    fn discovered_and_ignored_never_match() {
        let mut discovered = pattern(1, None, "factorio", Category::Gaming);
        discovered.monitor_state = MonitorState::Discovered;
        let mut ignored = pattern(2, None, "factorio", Category::Gaming);
        ignored.monitor_state = MonitorState::Ignored;
        let engine = PatternEngine::build(vec![discovered, ignored], 0);
        assert!(matches!(
            engine.classify("anders", &process("factorio", "factorio")),
            Classification::Unknown
        ));
    }

    #[test]
    fn browser_rules_only_match_domains() {
        let mut rule = pattern(1, None, "discord\\.com", Category::Social);
        rule.pattern_type = PatternType::BrowserDomain;
        let engine = PatternEngine::build(vec![rule], 0);

        let domain = DetectedActivity {
            key: "discord.com".into(),
            source: ActivitySource::Browser("chrome".into()),
            pid: None,
            cpu_percent: None,
            cmdline: None,
        };
        assert!(matches!(
            engine.classify("anders", &domain),
            Classification::Matched(_)
        ));
        // A process whose cmdline mentions the domain must not match a
        // browser_domain rule.
        assert!(matches!(
            engine.classify("anders", &process("discord.com", "discord.com")),
            Classification::Unknown
        ));
    }

    #[test]
    fn invalid_regex_is_rejected_on_compile() {
        assert!(compile_rule("steam(").is_err());
        assert!(compile_rule(r"\.exe$").is_ok());
    }
}
