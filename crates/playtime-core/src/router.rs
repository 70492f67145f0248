//! Message router: event → template variant → rendered notification.
//!
//! Picks one enabled variant for the event's intention (random or
//! sequential per configuration), substitutes `{name}` placeholders
//! (missing names render literally, never abort), hands the result to
//! the dispatcher, and records the delivery in the message log.
//! Duplicate suppression is not the router's job; the kernel's
//! warning flags guarantee at-most-once for thresholded intentions.

use rand::Rng;
use std::collections::HashMap;

use crate::error::DatabaseError;
use crate::config::VariantSelection;
use crate::events::Event;
use crate::notify::{Dispatcher, Notification};
use crate::storage::{Database, MessageTemplate, UserRecord};

/// Substitute `{name}` placeholders from `vars`. Unknown placeholders
/// pass through unmodified.
pub fn render_template(template: &str, vars: &std::collections::BTreeMap<String, String>) -> String {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        result.push_str(&rest[..open]);
        let tail = &rest[open..];
        match tail.find('}') {
            Some(close) => {
                let name = &tail[1..close];
                let is_ident =
                    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_');
                match (is_ident, vars.get(name)) {
                    (true, Some(value)) => result.push_str(value),
                    _ => result.push_str(&tail[..=close]),
                }
                rest = &tail[close + 1..];
            }
            None => {
                result.push_str(tail);
                return result;
            }
        }
    }
    result.push_str(rest);
    result
}

/// Routes events into rendered, logged notifications.
pub struct MessageRouter {
    selection: VariantSelection,
    /// intention name → next sequential index.
    cursors: HashMap<String, usize>,
}

impl MessageRouter {
    pub fn new(selection: VariantSelection) -> Self {
        Self {
            selection,
            cursors: HashMap::new(),
        }
    }

    /// Render and dispatch one event.
    ///
    /// Message-log write failures are logged and swallowed; a missing
    /// template variant downgrades to a warning, never a panic.
    pub fn dispatch(
        &mut self,
        db: &Database,
        dispatcher: &mut Dispatcher,
        user: &UserRecord,
        event: &Event,
    ) -> Result<(), DatabaseError> {
        let intention = event.intention.name();
        let variants = db.enabled_templates(&intention)?;
        let Some(template) = self.pick(&intention, &variants) else {
            tracing::warn!(intention = %intention, "no enabled template variant");
            return Ok(());
        };
        let template = template.clone();

        let vars = event.vars.to_map();
        let notification = Notification {
            title: render_template(&template.title, &vars),
            body: render_template(&template.body, &vars),
            icon: template.icon.clone(),
            urgency: template.urgency,
        };

        let (notification_id, backend) = dispatcher.send(user, &notification);
        tracing::debug!(
            intention = %intention,
            backend,
            notification_id,
            "dispatched notification"
        );

        if let Err(e) = db.append_message_log(
            &event.user,
            &intention,
            Some(template.id),
            &notification.title,
            &notification.body,
            backend,
            notification_id,
        ) {
            tracing::warn!(error = %e, "message log write failed");
        }
        Ok(())
    }

    fn pick<'a>(
        &mut self,
        intention: &str,
        variants: &'a [MessageTemplate],
    ) -> Option<&'a MessageTemplate> {
        if variants.is_empty() {
            return None;
        }
        let index = match self.selection {
            VariantSelection::Random => rand::thread_rng().gen_range(0..variants.len()),
            VariantSelection::Sequential => {
                let cursor = self.cursors.entry(intention.to_string()).or_insert(0);
                let index = *cursor % variants.len();
                *cursor = cursor.wrapping_add(1);
                index
            }
        };
        variants.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{Intention, TemplateVars};
    use crate::notify::{NotificationBackend, Urgency};
    use chrono::Utc;

    #[test]
    fn render_substitutes_known_placeholders() {
        let mut vars = std::collections::BTreeMap::new();
        vars.insert("process".to_string(), "Minecraft".to_string());
        vars.insert("time_left".to_string(), "30".to_string());
        assert_eq!(
            render_template("{process} closes in {time_left} minutes", &vars),
            "Minecraft closes in 30 minutes"
        );
    }

    #[test]
    fn render_leaves_unknown_placeholders_literal() {
        let vars = std::collections::BTreeMap::new();
        assert_eq!(
            render_template("Hello {nobody}, brace {for impact", &vars),
            "Hello {nobody}, brace {for impact"
        );
    }

    #[test]
    fn sequential_selection_cycles_variants() {
        let db = Database::open_in_memory().unwrap();
        db.insert_template("process_start", 2, "B", "b", "i", Urgency::Normal)
            .unwrap();
        let variants = db.enabled_templates("process_start").unwrap();
        assert_eq!(variants.len(), 2);

        let mut router = MessageRouter::new(VariantSelection::Sequential);
        let first = router.pick("process_start", &variants).unwrap().variant;
        let second = router.pick("process_start", &variants).unwrap().variant;
        let third = router.pick("process_start", &variants).unwrap().variant;
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    struct CaptureBackend {
        last: Option<Notification>,
    }

    impl NotificationBackend for CaptureBackend {
        fn name(&self) -> &'static str {
            "capture"
        }
        fn is_available(&mut self, _user: &UserRecord) -> bool {
            true
        }
        fn send(&mut self, _user: &UserRecord, n: &Notification) -> i64 {
            self.last = Some(n.clone());
            7
        }
        fn close(&mut self, _user: &UserRecord, _id: i64) -> bool {
            true
        }
    }

    #[test]
    fn dispatch_renders_and_logs() {
        let db = Database::open_in_memory().unwrap();
        let user = UserRecord {
            id: 1,
            name: "anders".into(),
            uid: 1000,
            enabled: true,
        };
        let mut dispatcher =
            Dispatcher::with_backends(vec![Box::new(CaptureBackend { last: None })]);
        let mut router = MessageRouter::new(VariantSelection::Sequential);

        let event = Event::new(
            Intention::TimeWarning(30),
            "anders",
            TemplateVars {
                user: "anders".into(),
                process: "Minecraft".into(),
                time_left: 30,
                time_limit: 120,
                ..TemplateVars::default()
            },
            Utc::now(),
        );
        router.dispatch(&db, &mut dispatcher, &user, &event).unwrap();

        let logged: (String, String, i64) = db
            .conn()
            .query_row(
                "SELECT intention, backend, notification_id FROM message_log",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(logged.0, "time_warning_30");
        assert_eq!(logged.1, "capture");
        assert_eq!(logged.2, 7);
    }
}
