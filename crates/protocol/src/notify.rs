//! Server-initiated push notification payloads
//!
//! Every payload carries the subscription token in `id`; the Notification
//! Router uses it to find the owning subscription before the payload is
//! decoded into one of these types.

use serde::{Deserialize, Serialize};

use crate::types::{SessionMeta, Settings};
use crate::SubscriptionId;

pub const WATCH_CHANGED: &str = "watch.changed";
pub const SESSION_CHANGED: &str = "session.changed";
pub const SETTINGS_CHANGED: &str = "settings.changed";

/// A watched file or directory changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchChanged {
    pub id: SubscriptionId,
    pub path: String,
}

/// Operation applied to the session list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionListOp {
    Create,
    Update,
    Delete,
}

/// The session list changed. `session` is set for create/update,
/// `session_id` for delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionListChanged {
    pub id: SubscriptionId,
    pub operation: SessionListOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionMeta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Settings changed server-side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsChanged {
    pub id: SubscriptionId,
    pub settings: Settings,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_session_create_notification() {
        let raw = r#"{
          "id":"w_a1b2c3d4e5",
          "operation":"create",
          "session":{"id":"s9","title":"New Chat","created_at":"0Z","updated_at":"0Z"}
        }"#;
        let changed: SessionListChanged = serde_json::from_str(raw).expect("parse");
        assert_eq!(changed.operation, SessionListOp::Create);
        assert_eq!(changed.session.expect("session").id, "s9");
        assert!(changed.session_id.is_none());
    }

    #[test]
    fn parses_session_delete_notification() {
        let raw = r#"{"id":"w_a1b2c3d4e5","operation":"delete","session_id":"s9"}"#;
        let changed: SessionListChanged = serde_json::from_str(raw).expect("parse");
        assert_eq!(changed.operation, SessionListOp::Delete);
        assert_eq!(changed.session_id.as_deref(), Some("s9"));
    }

    #[test]
    fn parses_settings_notification() {
        let raw = r#"{"id":"w_f6g7h8i9j0","settings":{"sandbox":true}}"#;
        let changed: SettingsChanged = serde_json::from_str(raw).expect("parse");
        assert!(changed.settings.sandbox);
    }
}
