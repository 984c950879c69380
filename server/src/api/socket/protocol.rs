//! Inbound WebSocket intents (§6 external interfaces)
//!
//! One variant per inbound event name; `type` is the JSON discriminant,
//! fields are renamed individually to match the wire's camelCase convention
//! (mirrors `data::types::Message`'s explicit per-field renames rather than
//! a blanket `rename_all`).

use serde::Deserialize;

use crate::domain::messaging::envelope::DeleteType;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum InboundIntent {
    #[serde(rename = "authenticate")]
    Authenticate { token: String },

    #[serde(rename = "privateMessage")]
    PrivateMessage {
        #[serde(rename = "recipientId")]
        recipient_id: String,
        content: String,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
        #[serde(default, rename = "replyTo")]
        reply_to: Option<String>,
    },

    #[serde(rename = "groupMessage")]
    GroupMessage {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        content: String,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
        #[serde(default, rename = "replyTo")]
        reply_to: Option<String>,
    },

    #[serde(rename = "markMessageDelivered")]
    MarkMessageDelivered {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(default, rename = "conversationId")]
        conversation_id: Option<String>,
    },

    #[serde(rename = "markMessageRead")]
    MarkMessageRead {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(default, rename = "conversationId")]
        conversation_id: Option<String>,
    },

    #[serde(rename = "editMessage")]
    EditMessage {
        #[serde(rename = "messageId")]
        message_id: String,
        content: String,
    },

    #[serde(rename = "deleteMessage")]
    DeleteMessage {
        #[serde(rename = "messageId")]
        message_id: String,
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "deleteType")]
        delete_type: DeleteType,
    },

    #[serde(rename = "typing")]
    Typing {
        #[serde(rename = "conversationId")]
        conversation_id: String,
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },

    #[serde(rename = "getOnlineUsers")]
    GetOnlineUsers {
        #[serde(rename = "conversationId")]
        conversation_id: String,
    },

    #[serde(rename = "ping")]
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authenticate_parses() {
        let intent: InboundIntent = serde_json::from_str(r#"{"type":"authenticate","token":"abc"}"#).unwrap();
        assert!(matches!(intent, InboundIntent::Authenticate { token } if token == "abc"));
    }

    #[test]
    fn test_private_message_parses_camel_case_fields() {
        let json = r#"{"type":"privateMessage","recipientId":"bob","content":"hi"}"#;
        let intent: InboundIntent = serde_json::from_str(json).unwrap();
        match intent {
            InboundIntent::PrivateMessage { recipient_id, content, metadata, reply_to } => {
                assert_eq!(recipient_id, "bob");
                assert_eq!(content, "hi");
                assert!(metadata.is_none());
                assert!(reply_to.is_none());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_delete_message_parses_delete_type() {
        let json = r#"{"type":"deleteMessage","messageId":"m1","conversationId":"c1","deleteType":"FOR_EVERYONE"}"#;
        let intent: InboundIntent = serde_json::from_str(json).unwrap();
        assert!(matches!(intent, InboundIntent::DeleteMessage { delete_type: DeleteType::ForEveryone, .. }));
    }

    #[test]
    fn test_unknown_type_fails() {
        let result: Result<InboundIntent, _> = serde_json::from_str(r#"{"type":"bogus"}"#);
        assert!(result.is_err());
    }
}
