//! Best-effort deployment notifications.
//!
//! Messages go to the application's topic as a JSON envelope keyed by
//! delivery protocol. A missing topic skips the message; a failed publish is
//! logged and never aborts the deployment.

use awskit::backend::NotificationService;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Sends notifications about one application.
#[derive(Clone)]
pub struct Notifier {
    service: Arc<dyn NotificationService>,
    topic_arn: Option<String>,
    application: String,
}

impl Notifier {
    /// Create a notifier; `topic_arn = None` makes every send a no-op.
    pub fn new(
        service: Arc<dyn NotificationService>,
        application: &str,
        topic_arn: Option<String>,
    ) -> Self {
        Self {
            service,
            topic_arn,
            application: application.to_string(),
        }
    }

    /// Publish `message`, logging instead of failing.
    pub fn send(&self, message: &str, subject: Option<&str>, extra: &BTreeMap<String, String>) {
        let Some(topic) = &self.topic_arn else {
            log::debug!("No notification topic for {}; skipping: {message}", self.application);
            return;
        };

        let body = match envelope(&self.application, message, extra) {
            Ok(body) => body,
            Err(e) => {
                log::warn!("Failed to encode notification: {e}");
                return;
            }
        };

        match self.service.publish(topic, &body, subject, Some("json")) {
            Ok(()) => log::debug!("Notified {topic}: {message}"),
            Err(e) => log::warn!("Failed to send notification to {topic}: {e}"),
        }
    }
}

/// Encode the `{"default": "<json>"}` envelope.
pub fn envelope(
    application: &str,
    message: &str,
    extra: &BTreeMap<String, String>,
) -> serde_json::Result<String> {
    let mut attributes: Map<String, Value> = extra
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    attributes.insert("Type".to_string(), Value::from("Notification"));
    attributes.insert("Application".to_string(), Value::from(application));
    attributes.insert("Message".to_string(), Value::from(message));

    let inner = serde_json::to_string(&attributes)?;
    let mut outer = Map::new();
    outer.insert("default".to_string(), Value::String(inner));
    serde_json::to_string(&outer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use awskit::{FaultKind, MockCloud};

    #[test]
    fn test_envelope_wraps_attributes() {
        let extra = BTreeMap::from([("Elapsed".to_string(), "03:12".to_string())]);
        let body = envelope("web", "Deployment finished", &extra).unwrap();

        let outer: Value = serde_json::from_str(&body).unwrap();
        let inner: Value = serde_json::from_str(outer["default"].as_str().unwrap()).unwrap();
        assert_eq!(inner["Type"], "Notification");
        assert_eq!(inner["Application"], "web");
        assert_eq!(inner["Message"], "Deployment finished");
        assert_eq!(inner["Elapsed"], "03:12");
    }

    #[test]
    fn test_send_without_topic_is_skipped() {
        let mock = MockCloud::new();
        let notifier = Notifier::new(mock.clients().notifications, "web", None);
        notifier.send("hello", None, &BTreeMap::new());
        assert_eq!(mock.call_count("publish"), 0);
    }

    #[test]
    fn test_send_failure_does_not_propagate() {
        let mock = MockCloud::new();
        mock.fail_next("publish", FaultKind::Auth);
        let notifier = Notifier::new(
            mock.clients().notifications,
            "web",
            Some("arn:aws:sns:eu-west-1:1:deploys".to_string()),
        );
        notifier.send("first", Some("Deploy"), &BTreeMap::new());
        notifier.send("second", Some("Deploy"), &BTreeMap::new());

        let published = mock.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].message_structure.as_deref(), Some("json"));
        assert_eq!(published[0].subject.as_deref(), Some("Deploy"));
    }
}
