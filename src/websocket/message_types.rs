use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::Message;

/// Commands a client may issue over an authenticated connection. Closed set:
/// dispatch matches exhaustively, so adding a command forces every handler
/// site to be revisited.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    #[serde(rename = "join")]
    Join { conversation_id: Uuid },

    #[serde(rename = "leave")]
    Leave { conversation_id: Uuid },

    #[serde(rename = "send")]
    Send {
        conversation_id: Option<Uuid>,
        receiver_id: Option<Uuid>,
        content: String,
        #[serde(default)]
        kind: crate::models::MessageKind,
        correlation_id: Option<String>,
    },

    // Typing indicators carry the raw id string: a malformed id is silently
    // ignored rather than errored.
    #[serde(rename = "typing")]
    Typing { conversation_id: String },

    #[serde(rename = "stop_typing")]
    StopTyping { conversation_id: String },

    #[serde(rename = "mark_read")]
    MarkRead { conversation_id: Uuid },
}

/// Events pushed to clients, named object.action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "conversation.joined")]
    Joined { conversation_id: Uuid },

    /// Full message payload, fanned out to channel subscribers. The
    /// correlation token is echoed unchanged for optimistic-UI reconcile.
    #[serde(rename = "message.new")]
    MessageNew {
        conversation_id: Uuid,
        message: Message,
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },

    /// Lightweight new-message signal for receiver handles not joined to
    /// the channel, so unread badges can update without a join.
    #[serde(rename = "message.notify")]
    MessageNotify {
        conversation_id: Uuid,
        sender_id: Uuid,
        preview: String,
    },

    /// Send failure, delivered only to the originating handle.
    #[serde(rename = "message.rejected")]
    MessageRejected {
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<String>,
    },

    #[serde(rename = "typing.started")]
    TypingStarted {
        conversation_id: Uuid,
        user_id: Uuid,
    },

    #[serde(rename = "typing.stopped")]
    TypingStopped {
        conversation_id: Uuid,
        user_id: Uuid,
    },

    #[serde(rename = "conversation.read")]
    Read {
        conversation_id: Uuid,
        user_id: Uuid,
    },

    #[serde(rename = "presence.changed")]
    PresenceChanged { user_id: Uuid, online: bool },

    #[serde(rename = "error")]
    Error { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_commands_deserialize_by_tag() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"join","conversation_id":"6dd9d63e-9ad0-4baf-8a07-3ac06b9e5455"}"#)
                .unwrap();
        assert!(matches!(cmd, ClientCommand::Join { .. }));

        let cmd: ClientCommand = serde_json::from_str(
            r#"{"type":"send","receiver_id":"6dd9d63e-9ad0-4baf-8a07-3ac06b9e5455","content":"hi","correlation_id":"c1"}"#,
        )
        .unwrap();
        match cmd {
            ClientCommand::Send {
                conversation_id,
                kind,
                correlation_id,
                ..
            } => {
                assert!(conversation_id.is_none());
                assert_eq!(kind, crate::models::MessageKind::Text);
                assert_eq!(correlation_id.as_deref(), Some("c1"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn typing_accepts_arbitrary_id_strings() {
        let cmd: ClientCommand =
            serde_json::from_str(r#"{"type":"typing","conversation_id":"not-a-uuid"}"#).unwrap();
        assert!(matches!(cmd, ClientCommand::Typing { .. }));
    }

    #[test]
    fn outbound_events_carry_type_tags() {
        let event = ServerEvent::PresenceChanged {
            user_id: Uuid::new_v4(),
            online: true,
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(value["type"], "presence.changed");
        assert_eq!(value["online"], true);

        let event = ServerEvent::MessageRejected {
            reason: "not_entitled".into(),
            correlation_id: None,
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(value["type"], "message.rejected");
        assert!(value.get("correlation_id").is_none());
    }
}
