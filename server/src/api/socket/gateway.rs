//! SocketGateway (§4.8 C12)
//!
//! Authenticates on handshake, then bridges one WebSocket connection to the
//! messaging core: inbound intents are dispatched to `ResilientPublisher`,
//! outbound events arrive over the per-session channel registered with
//! `SessionSinks`. A gateway-initiated ping/pong keepalive and a per-session
//! outbound-queue watermark (`SessionSinks`'s overflow flag) are the two
//! things that can end a connection outside of the client closing it.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::api::auth::AuthManager;
use crate::core::constants::{
    SOCKET_MAX_MISSED_PONGS, SOCKET_PING_INTERVAL_MS, STREAM_EVENTS_TYPING, STREAM_MESSAGES_CHANNEL,
    STREAM_MESSAGES_GROUP, STREAM_MESSAGES_PRIVATE,
};
use crate::data::traits::{ConversationRepository, MessageRepository, UserProfileRepository};
use crate::data::types::{Conversation, ConversationType, Message as ChatMessage, MessageStatus, MessageType};
use crate::domain::messaging::delivery::PendingStore;
use crate::domain::messaging::envelope::DeleteType;
use crate::domain::messaging::errors::MessagingError;
use crate::domain::messaging::presence::PresenceRegistry;
use crate::domain::messaging::publisher::{PublishOutcome, ResilientPublisher};
use crate::domain::messaging::user_cache::{CachedUserProfile, UserCache};
use crate::domain::messaging::{OutboundEvent, SessionSinks};

use super::protocol::InboundIntent;

/// Everything the gateway needs to authenticate a session and carry out the
/// use cases behind each inbound intent. Cheap to clone: every field is an
/// `Arc` (or `Copy`), so a fresh clone is handed to each connection task.
#[derive(Clone)]
pub struct SocketGateway {
    auth: Arc<AuthManager>,
    publisher: Arc<ResilientPublisher>,
    presence: Arc<PresenceRegistry>,
    sinks: Arc<SessionSinks>,
    pending: Arc<PendingStore>,
    user_cache: Arc<UserCache>,
    users: Arc<dyn UserProfileRepository>,
    messages: Arc<dyn MessageRepository>,
    conversations: Arc<dyn ConversationRepository>,
    max_pending: usize,
}

impl SocketGateway {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        auth: Arc<AuthManager>,
        publisher: Arc<ResilientPublisher>,
        presence: Arc<PresenceRegistry>,
        sinks: Arc<SessionSinks>,
        pending: Arc<PendingStore>,
        user_cache: Arc<UserCache>,
        users: Arc<dyn UserProfileRepository>,
        messages: Arc<dyn MessageRepository>,
        conversations: Arc<dyn ConversationRepository>,
        max_pending: usize,
    ) -> Self {
        Self {
            auth,
            publisher,
            presence,
            sinks,
            pending,
            user_cache,
            users,
            messages,
            conversations,
            max_pending,
        }
    }

    pub fn router(&self) -> Router {
        Router::new().route("/ws", get(ws_handler)).with_state(self.clone())
    }

    /// Drives one connection end to end: handshake, replay, then the
    /// select loop over inbound frames, outbound events, and the ping timer.
    async fn handle_connection(self, mut socket: WebSocket) {
        let Some(user_id) = self.authenticate(&mut socket).await else {
            return;
        };

        let session_id = Uuid::new_v4().to_string();
        let (tx, mut rx) = mpsc::channel(self.max_pending.max(1));
        let overflowed = self.sinks.register(session_id.clone(), tx);
        self.presence.on_connect(session_id.clone(), user_id.clone()).await;
        tracing::debug!(session_id, user_id, "socket session connected");

        for event in self.pending.drain(&user_id) {
            if socket.send(Message::Text(event.to_json().into())).await.is_err() {
                self.close_session(&session_id, &user_id, &HashSet::new()).await;
                return;
            }
        }

        let mut joined_rooms: HashSet<String> = HashSet::new();
        let mut ping_interval = tokio::time::interval(Duration::from_millis(SOCKET_PING_INTERVAL_MS));
        ping_interval.tick().await; // first tick fires immediately, skip it
        let mut missed_pongs: u32 = 0;

        loop {
            if overflowed.load(Ordering::Relaxed) {
                tracing::debug!(session_id, "closing session: outbound queue exceeded max_pending");
                break;
            }

            tokio::select! {
                biased;
                _ = ping_interval.tick() => {
                    if missed_pongs >= SOCKET_MAX_MISSED_PONGS {
                        tracing::debug!(session_id, "closing session: missed pong keepalive");
                        break;
                    }
                    missed_pongs += 1;
                    if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                outbound = rx.recv() => {
                    let Some(event) = outbound else { break };
                    if socket.send(Message::Text(event.to_json().into())).await.is_err() {
                        break;
                    }
                }
                incoming = socket.recv() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if !self.handle_inbound(&text, &user_id, &mut joined_rooms, &mut socket).await {
                                break;
                            }
                        }
                        Some(Ok(Message::Pong(_))) => missed_pongs = 0,
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::debug!(session_id, error = %e, "websocket read error, closing");
                            break;
                        }
                    }
                }
            }
        }

        self.close_session(&session_id, &user_id, &joined_rooms).await;
    }

    async fn close_session(&self, session_id: &str, user_id: &str, joined_rooms: &HashSet<String>) {
        self.sinks.unregister(session_id);
        self.presence.on_disconnect(session_id).await;
        for conversation_id in joined_rooms {
            self.presence.leave(user_id, conversation_id);
        }
        tracing::debug!(session_id, user_id, "socket session disconnected");
    }

    /// Accepts only an `authenticate` intent as the first frame. When auth is
    /// disabled (`--no-auth`) the supplied token is trusted as the user id
    /// directly, matching the dev-mode bypass `AuthManager::is_enabled` gates
    /// elsewhere; otherwise it must be a valid HS256 session token.
    async fn authenticate(&self, socket: &mut WebSocket) -> Option<String> {
        while let Some(frame) = socket.recv().await {
            match frame {
                Ok(Message::Text(text)) => match serde_json::from_str::<InboundIntent>(&text) {
                    Ok(InboundIntent::Authenticate { token }) => {
                        if !self.auth.is_enabled() {
                            return Some(token);
                        }
                        return match self.auth.validate_session(&token) {
                            Ok(claims) => Some(claims.user_id().to_string()),
                            Err(e) => {
                                let _ = send_event(socket, error_event(&format!("authentication failed: {e}"))).await;
                                None
                            }
                        };
                    }
                    Ok(_) => {
                        let _ = send_event(socket, error_event("expected an authenticate intent first")).await;
                    }
                    Err(e) => {
                        let _ = send_event(socket, error_event(&format!("malformed message: {e}"))).await;
                    }
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
        None
    }

    /// Parses and dispatches one inbound frame. Returns `false` when the
    /// connection should close (write failure, or an auth error mid-session).
    async fn handle_inbound(
        &self,
        text: &str,
        user_id: &str,
        joined_rooms: &mut HashSet<String>,
        socket: &mut WebSocket,
    ) -> bool {
        let intent = match serde_json::from_str::<InboundIntent>(text) {
            Ok(intent) => intent,
            Err(e) => return send_event(socket, error_event(&format!("malformed message: {e}"))).await.is_ok(),
        };

        match self.dispatch_intent(intent, user_id, joined_rooms).await {
            Ok(Some(event)) => send_event(socket, event).await.is_ok(),
            Ok(None) => true,
            Err(e) => {
                let is_auth_error = matches!(e, MessagingError::Auth(_));
                let _ = send_event(socket, error_event(&e.to_string())).await;
                !is_auth_error
            }
        }
    }

    async fn dispatch_intent(
        &self,
        intent: InboundIntent,
        user_id: &str,
        joined_rooms: &mut HashSet<String>,
    ) -> Result<Option<OutboundEvent>, MessagingError> {
        match intent {
            InboundIntent::Authenticate { .. } => {
                Err(MessagingError::Validation("already authenticated".to_string()))
            }
            InboundIntent::PrivateMessage { recipient_id, content, metadata, reply_to } => {
                self.handle_private_message(user_id, recipient_id, content, metadata, reply_to, joined_rooms).await
            }
            InboundIntent::GroupMessage { conversation_id, content, metadata, reply_to } => {
                self.track_room(user_id, &conversation_id, joined_rooms);
                self.handle_group_message(user_id, conversation_id, content, metadata, reply_to).await
            }
            InboundIntent::MarkMessageDelivered { message_id, conversation_id } => {
                self.handle_mark_status(user_id, message_id, conversation_id, MessageStatus::Delivered).await
            }
            InboundIntent::MarkMessageRead { message_id, conversation_id } => {
                self.handle_mark_status(user_id, message_id, conversation_id, MessageStatus::Read).await
            }
            InboundIntent::EditMessage { message_id, content } => {
                self.handle_edit_message(user_id, message_id, content).await
            }
            InboundIntent::DeleteMessage { message_id, conversation_id, delete_type } => {
                self.handle_delete_message(user_id, message_id, conversation_id, delete_type).await
            }
            InboundIntent::Typing { conversation_id, is_typing } => {
                self.track_room(user_id, &conversation_id, joined_rooms);
                self.publisher
                    .publish_room_event(STREAM_EVENTS_TYPING, &conversation_id, user_id, vec![("isTyping".to_string(), is_typing.to_string())])
                    .await?;
                Ok(None)
            }
            InboundIntent::GetOnlineUsers { conversation_id } => {
                self.track_room(user_id, &conversation_id, joined_rooms);
                let online: Vec<String> = self.presence.online_participants(&conversation_id).into_iter().collect();
                Ok(Some(OutboundEvent {
                    event: "onlineUsers",
                    data: serde_json::json!({"conversationId": conversation_id, "userIds": online}),
                }))
            }
            InboundIntent::Ping => Ok(Some(OutboundEvent { event: "pong", data: serde_json::json!({}) })),
        }
    }

    fn track_room(&self, user_id: &str, conversation_id: &str, joined_rooms: &mut HashSet<String>) {
        if joined_rooms.insert(conversation_id.to_string()) {
            self.presence.join(user_id, conversation_id);
        }
    }

    /// Resolves or creates the PRIVATE conversation for `sender`/`recipient_id`,
    /// publishes the message, and acks only when the publish was staged
    /// (`Accepted`) — the `Stored` case reaches the sender the normal way,
    /// via the delivery fan-out, since they are one of the conversation's
    /// own participants.
    async fn handle_private_message(
        &self,
        sender: &str,
        recipient_id: String,
        content: String,
        metadata: Option<serde_json::Value>,
        reply_to: Option<String>,
        joined_rooms: &mut HashSet<String>,
    ) -> Result<Option<OutboundEvent>, MessagingError> {
        let content = ChatMessage::validate_content(&content).map_err(MessagingError::Validation)?;
        let conversation_id = Conversation::private_key(sender, &recipient_id);
        self.track_room(sender, &conversation_id, joined_rooms);

        let conversation = match self.conversations.find_by_id(&conversation_id).await? {
            Some(conversation) => conversation,
            None => {
                let now = Utc::now();
                let conversation = Conversation {
                    conversation_id: conversation_id.clone(),
                    kind: ConversationType::Private,
                    participants: vec![sender.to_string(), recipient_id.clone()],
                    admins: vec![],
                    created_by: sender.to_string(),
                    created_at: now,
                    updated_at: now,
                    last_message: None,
                    unread_counts: Default::default(),
                    user_metadata: vec![],
                    audit_log: Some(vec![]),
                };
                conversation.validate().map_err(MessagingError::Validation)?;
                self.conversations.save(&conversation).await?
            }
        };

        let sender_name = self.resolve_sender_name(sender).await?;
        let message = ChatMessage {
            message_id: Uuid::new_v4().to_string(),
            conversation_id: conversation.conversation_id.clone(),
            sender_id: sender.to_string(),
            receiver_id: Some(recipient_id.clone()),
            content,
            kind: MessageType::Text,
            status: MessageStatus::Sent,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            edited_at: None,
            deleted_at: None,
            reply_to,
            reactions: Default::default(),
            metadata: metadata.unwrap_or(serde_json::Value::Null),
        };

        let outcome = self.publisher.publish_message(message, STREAM_MESSAGES_PRIVATE, sender_name, None).await?;
        self.conversations.set_last_message(&conversation.conversation_id, &outcome.message_id()).await?;
        self.conversations.increment_unread(&conversation.conversation_id, &recipient_id).await?;
        Ok(ack_for_outcome(outcome))
    }

    async fn handle_group_message(
        &self,
        sender: &str,
        conversation_id: String,
        content: String,
        metadata: Option<serde_json::Value>,
        reply_to: Option<String>,
    ) -> Result<Option<OutboundEvent>, MessagingError> {
        let content = ChatMessage::validate_content(&content).map_err(MessagingError::Validation)?;
        let conversation = self
            .conversations
            .find_by_id(&conversation_id)
            .await?
            .ok_or_else(|| MessagingError::NotFound(format!("conversation {conversation_id}")))?;
        if !conversation.participants.contains(&sender.to_string()) {
            return Err(MessagingError::Forbidden("sender is not a participant of this conversation".to_string()));
        }

        let stream = match conversation.kind {
            ConversationType::Channel => STREAM_MESSAGES_CHANNEL,
            _ => STREAM_MESSAGES_GROUP,
        };

        let sender_name = self.resolve_sender_name(sender).await?;
        let message = ChatMessage {
            message_id: Uuid::new_v4().to_string(),
            conversation_id: conversation.conversation_id.clone(),
            sender_id: sender.to_string(),
            receiver_id: None,
            content,
            kind: MessageType::Text,
            status: MessageStatus::Sent,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            edited_at: None,
            deleted_at: None,
            reply_to,
            reactions: Default::default(),
            metadata: metadata.unwrap_or(serde_json::Value::Null),
        };

        let participants = conversation.participants.clone();
        let outcome = self.publisher.publish_message(message, stream, sender_name, Some(participants)).await?;
        self.conversations.set_last_message(&conversation.conversation_id, &outcome.message_id()).await?;
        Ok(ack_for_outcome(outcome))
    }

    /// `messageDelivered`/`messageRead` broadcasts exclude the acting user
    /// (§4.6 `dispatch_status`), so the gateway acks them directly here.
    async fn handle_mark_status(
        &self,
        user_id: &str,
        message_id: String,
        conversation_id: Option<String>,
        status: MessageStatus,
    ) -> Result<Option<OutboundEvent>, MessagingError> {
        self.publisher
            .publish_message_status(message_id.clone(), user_id.to_string(), status, conversation_id.clone(), None)
            .await?;
        let event = match status {
            MessageStatus::Delivered => "messageDelivered",
            MessageStatus::Read => "messageRead",
            _ => unreachable!("handle_mark_status only called with Delivered/Read"),
        };
        Ok(Some(OutboundEvent {
            event,
            data: serde_json::json!({"messageId": message_id, "conversationId": conversation_id}),
        }))
    }

    async fn handle_edit_message(
        &self,
        actor: &str,
        message_id: String,
        content: String,
    ) -> Result<Option<OutboundEvent>, MessagingError> {
        let mut message = self
            .messages
            .find_by_id(&message_id)
            .await?
            .ok_or_else(|| MessagingError::NotFound(format!("message {message_id}")))?;
        if message.sender_id != actor {
            return Err(MessagingError::Forbidden("only the sender may edit this message".to_string()));
        }
        message.content = ChatMessage::validate_content(&content).map_err(MessagingError::Validation)?;
        message.status = MessageStatus::Edited;
        message.edited_at = Some(Utc::now());
        message.updated_at = Utc::now();
        let updated = self.messages.update(&message).await?;

        self.publisher
            .publish_message_status(updated.message_id.clone(), actor.to_string(), MessageStatus::Edited, Some(updated.conversation_id.clone()), None)
            .await?;
        Ok(Some(OutboundEvent { event: "messageEdited", data: serde_json::to_value(&updated).unwrap_or_default() }))
    }

    /// `ForEveryone` requires ownership and mutates the stored message
    /// (§8 S6); `ForMe` is a client-local hide, never checked against
    /// ownership and never touches the primary store.
    async fn handle_delete_message(
        &self,
        actor: &str,
        message_id: String,
        conversation_id: String,
        delete_type: DeleteType,
    ) -> Result<Option<OutboundEvent>, MessagingError> {
        if delete_type == DeleteType::ForEveryone {
            let mut message = self
                .messages
                .find_by_id(&message_id)
                .await?
                .ok_or_else(|| MessagingError::NotFound(format!("message {message_id}")))?;
            if message.sender_id != actor {
                return Err(MessagingError::Forbidden("only the sender may delete this message for everyone".to_string()));
            }
            message.status = MessageStatus::Deleted;
            message.deleted_at = Some(Utc::now());
            message.updated_at = Utc::now();
            self.messages.update(&message).await?;
        }

        self.publisher
            .publish_message_status(message_id.clone(), actor.to_string(), MessageStatus::Deleted, Some(conversation_id.clone()), Some(delete_type))
            .await?;
        Ok(Some(OutboundEvent {
            event: "messageDeleted",
            data: serde_json::json!({"messageId": message_id, "conversationId": conversation_id, "deleteType": delete_type}),
        }))
    }

    /// Cache-then-repository lookup for the display name every published
    /// message must carry (§9: senderName required on every NEW_MESSAGE).
    /// A miss in both falls through as `NotFound` rather than publishing
    /// without a name.
    async fn resolve_sender_name(&self, matricule: &str) -> Result<String, MessagingError> {
        if let Some(cached) = self.user_cache.get(matricule).await? {
            return Ok(cached.full_name);
        }
        let profile = self
            .users
            .find_by_matricule(matricule)
            .await?
            .ok_or_else(|| MessagingError::NotFound(format!("user profile for {matricule}")))?;
        let cached = CachedUserProfile::from(&profile);
        let name = cached.full_name.clone();
        self.user_cache.set(&cached).await?;
        Ok(name)
    }
}

fn ack_for_outcome(outcome: PublishOutcome) -> Option<OutboundEvent> {
    match outcome {
        PublishOutcome::Stored(_) => None,
        PublishOutcome::Accepted(message) => {
            Some(OutboundEvent { event: "messagePending", data: serde_json::to_value(&message).unwrap_or_default() })
        }
    }
}

fn error_event(message: &str) -> OutboundEvent {
    OutboundEvent { event: "message_error", data: serde_json::json!({"message": message}) }
}

async fn send_event(socket: &mut WebSocket, event: OutboundEvent) -> Result<(), axum::Error> {
    socket.send(Message::Text(event.to_json().into())).await
}

async fn ws_handler(State(gateway): State<SocketGateway>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| gateway.handle_connection(socket))
}

trait PublishOutcomeExt {
    fn message_id(&self) -> String;
}

impl PublishOutcomeExt for PublishOutcome {
    fn message_id(&self) -> String {
        match self {
            PublishOutcome::Stored(m) | PublishOutcome::Accepted(m) => m.message_id.clone(),
        }
    }
}
