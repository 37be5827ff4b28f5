use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of characters of content kept in a conversation's last-message
/// preview.
pub const PREVIEW_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    File,
    System,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::File => "file",
            MessageKind::System => "system",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "image" => MessageKind::Image,
            "file" => MessageKind::File,
            "system" => MessageKind::System,
            _ => MessageKind::Text,
        }
    }
}

/// A persisted message. Immutable except for the read and soft-delete flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn preview(&self) -> String {
        preview_of(&self.content)
    }
}

pub fn preview_of(content: &str) -> String {
    content.chars().take(PREVIEW_CHARS).collect()
}

/// Input to `ChatStore::record_message`. Built only by the message pipeline
/// after validation passes.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn new(
        conversation_id: Uuid,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: String,
        kind: MessageKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            sender_id,
            receiver_id,
            content,
            kind,
            created_at: Utc::now(),
        }
    }

    pub fn into_message(self) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            receiver_id: self.receiver_id,
            content: self.content,
            kind: self.kind,
            is_read: false,
            read_at: None,
            deleted_at: None,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_round_trips_through_str() {
        for kind in [
            MessageKind::Text,
            MessageKind::Image,
            MessageKind::File,
            MessageKind::System,
        ] {
            assert_eq!(MessageKind::parse(kind.as_str()), kind);
        }
        assert_eq!(MessageKind::parse("bogus"), MessageKind::Text);
    }

    #[test]
    fn preview_is_bounded() {
        let long = "x".repeat(500);
        assert_eq!(preview_of(&long).chars().count(), PREVIEW_CHARS);
        assert_eq!(preview_of("hi"), "hi");
    }
}
