use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use serde::{ Deserialize, Serialize };
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "User"),
            Role::Assistant => write!(f, "Assistant"),
        }
    }
}

/// Binary payload attached to a user message, base64-encoded exactly once
/// when the attachment is created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    encoded: String,
    byte_len: usize,
}

impl Attachment {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            encoded: STANDARD.encode(bytes),
            byte_len: bytes.len(),
        }
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn byte_len(&self) -> usize {
        self.byte_len
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    role: Role,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    attachment: Option<Attachment>,
    timestamp: i64,
}

impl Message {
    pub fn user(content: impl Into<String>, attachment: Option<Attachment>) -> Self {
        Self::new(Role::User, content.into(), attachment)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content.into(), None)
    }

    fn new(role: Role, content: String, attachment: Option<Attachment>) -> Self {
        Self {
            role,
            content,
            attachment,
            timestamp: Utc::now().timestamp(),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn attachment(&self) -> Option<&Attachment> {
        self.attachment.as_ref()
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_is_encoded_on_creation() {
        let attachment = Attachment::from_bytes(b"\x89PNG");
        assert_eq!(attachment.encoded(), "iVBORw==");
        assert_eq!(attachment.byte_len(), 4);

        let msg = Message::user("what is this?", Some(attachment.clone()));
        assert_eq!(msg.role(), Role::User);
        assert_eq!(msg.attachment(), Some(&attachment));
    }

    #[test]
    fn role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(Role::User.to_string(), "User");
    }
}
