//! DeliveryEngine (§4.6 C11)
//!
//! Drains the message, status, typing/reaction and conversation-event
//! streams and fans each entry out to the sockets of whichever recipients
//! are online, queuing `NEW_MESSAGE`/status entries for offline recipients
//! so they replay on reconnect. Per-conversation ordering only has to hold
//! within a single conversation, not across the whole stream, so entries
//! are hashed by `conversationId` onto a fixed pool of workers rather than
//! processed by one global sequential loop (§5: "ordering guarantees").
//!
//! The state machine is `Idle -> Reading -> Dispatching -> Acking -> Idle`,
//! with `Paused` as a side-state entered when a recipient's outbound queue
//! is full; reader tasks implement Reading, worker tasks implement
//! Dispatching/Acking.

use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rustc_hash::FxHasher;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::core::constants::{
    DEADLINE_STREAM_READ_MS, DEFAULT_DELIVERY_WORKER_POOL_SIZE, DEFAULT_WORKER_BATCH_SIZE,
    PENDING_EVENT_TTL_SECS, STREAM_EVENTS_CONVERSATIONS, STREAM_EVENTS_REACTIONS,
    STREAM_EVENTS_REPLIES, STREAM_EVENTS_TYPING, STREAM_MESSAGES_CHANNEL, STREAM_MESSAGES_GROUP,
    STREAM_MESSAGES_PRIVATE, STREAM_STATUS_DELETED, STREAM_STATUS_DELIVERED, STREAM_STATUS_EDITED,
    STREAM_STATUS_READ,
};
use crate::data::streams::{StreamEntry, StreamFabric};
use crate::data::traits::ConversationRepository;

use super::envelope::{ConversationEvent, NewMessageEnvelope, StatusEnvelope};
use super::presence::PresenceRegistry;

/// Which kind of stream an entry came from, and therefore which recipient
/// resolution rule and outbound event name apply (§4.6 step 1).
#[derive(Debug, Clone, Copy)]
enum StreamFamily {
    NewMessage,
    Status,
    RoomBroadcast,
    ConversationEvent,
}

struct WorkItem {
    entry: StreamEntry,
    source_stream: &'static str,
    family: StreamFamily,
}

/// A fully-formed event ready to hand to a socket session; serialized as
/// JSON text by whatever owns the WebSocket write half.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEvent {
    pub event: &'static str,
    pub data: serde_json::Value,
}

impl OutboundEvent {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Per-session outbound channels, populated by the socket gateway on
/// connect/disconnect and consumed by the delivery workers. Kept separate
/// from `PresenceRegistry` because presence answers "is this user online
/// anywhere" while this answers "how do I actually hand this session a
/// message".
#[derive(Default)]
pub struct SessionSinks {
    senders: DashMap<String, (mpsc::Sender<OutboundEvent>, Arc<AtomicBool>)>,
}

impl SessionSinks {
    pub fn new() -> Self {
        Self { senders: DashMap::new() }
    }

    /// Registers `sender` for `session_id` and returns the shared overflow
    /// flag the gateway should poll: once set, the session's outbound queue
    /// has exceeded `maxPending` and the gateway must close it (§5
    /// backpressure policy).
    pub fn register(&self, session_id: String, sender: mpsc::Sender<OutboundEvent>) -> Arc<AtomicBool> {
        let overflowed = Arc::new(AtomicBool::new(false));
        self.senders.insert(session_id, (sender, Arc::clone(&overflowed)));
        overflowed
    }

    pub fn unregister(&self, session_id: &str) {
        self.senders.remove(session_id);
    }

    /// Best-effort, non-blocking send. Returns `false` if the session is
    /// unknown or its outbound queue is full — the gateway (which owns the
    /// queue capacity) is responsible for closing sessions that back up,
    /// not this dispatcher (§5 backpressure policy).
    fn try_send(&self, session_id: &str, event: OutboundEvent) -> bool {
        match self.senders.get(session_id) {
            Some(entry) => {
                let (tx, overflowed) = entry.value();
                match tx.try_send(event) {
                    Ok(()) => true,
                    Err(_) => {
                        overflowed.store(true, Ordering::Relaxed);
                        false
                    }
                }
            }
            None => false,
        }
    }
}

/// Per-user queue of events that arrived while every one of the user's
/// sessions was offline, so they can be replayed once the user reconnects.
/// Only `NEW_MESSAGE` and status events are queued (§4.6 step 3: "other
/// event types are dropped when there is no online session").
pub struct PendingStore {
    queues: DashMap<String, Vec<(Instant, OutboundEvent)>>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self { queues: DashMap::new() }
    }

    fn push(&self, user_id: &str, event: OutboundEvent) {
        self.queues.entry(user_id.to_string()).or_default().push((Instant::now(), event));
    }

    /// Drains and returns every still-live entry for `user_id`, discarding
    /// anything older than `PENDING_EVENT_TTL_SECS`.
    pub fn drain(&self, user_id: &str) -> Vec<OutboundEvent> {
        let Some((_, entries)) = self.queues.remove(user_id) else { return Vec::new() };
        let ttl = Duration::from_secs(PENDING_EVENT_TTL_SECS);
        entries
            .into_iter()
            .filter(|(queued_at, _)| queued_at.elapsed() < ttl)
            .map(|(_, event)| event)
            .collect()
    }
}

/// Hashes `conversation_id` onto `[0, pool_size)` so every entry for a
/// given conversation lands on the same worker and is processed in the
/// order it was read (§5: per-conversation FIFO, cross-conversation
/// unordered).
fn worker_index(conversation_id: &str, pool_size: usize) -> usize {
    let mut hasher = FxHasher::default();
    conversation_id.hash(&mut hasher);
    (hasher.finish() as usize) % pool_size.max(1)
}

/// Owns the worker pool's inbound senders; reader tasks feed it, the
/// gateway consults it indirectly through `PresenceRegistry`/`PendingStore`
/// for reconnect replay.
pub struct DeliveryEngine {
    worker_senders: Vec<mpsc::Sender<WorkItem>>,
    pub pending: Arc<PendingStore>,
}

impl DeliveryEngine {
    /// Spawns the stream readers and the fixed worker pool, returning the
    /// engine handle plus every background task's `JoinHandle` for
    /// shutdown registration.
    pub fn spawn(
        streams: Arc<StreamFabric>,
        conversations: Arc<dyn ConversationRepository>,
        presence: Arc<PresenceRegistry>,
        sinks: Arc<SessionSinks>,
        pool_size: usize,
        shutdown_rx: watch::Receiver<bool>,
    ) -> (Arc<Self>, Vec<JoinHandle<()>>) {
        let pool_size = if pool_size == 0 { DEFAULT_DELIVERY_WORKER_POOL_SIZE } else { pool_size };
        let pending = Arc::new(PendingStore::new());
        let mut worker_senders = Vec::with_capacity(pool_size);
        let mut handles = Vec::new();

        for _ in 0..pool_size {
            let (tx, rx) = mpsc::channel(DEFAULT_WORKER_BATCH_SIZE * 4);
            worker_senders.push(tx);
            handles.push(spawn_dispatch_worker(
                rx,
                Arc::clone(&streams),
                Arc::clone(&conversations),
                Arc::clone(&presence),
                Arc::clone(&sinks),
                Arc::clone(&pending),
                shutdown_rx.clone(),
            ));
        }

        let engine = Arc::new(Self { worker_senders, pending });

        let consumed: &[(&'static str, StreamFamily)] = &[
            (STREAM_MESSAGES_PRIVATE, StreamFamily::NewMessage),
            (STREAM_MESSAGES_GROUP, StreamFamily::NewMessage),
            (STREAM_MESSAGES_CHANNEL, StreamFamily::NewMessage),
            (STREAM_STATUS_DELIVERED, StreamFamily::Status),
            (STREAM_STATUS_READ, StreamFamily::Status),
            (STREAM_STATUS_EDITED, StreamFamily::Status),
            (STREAM_STATUS_DELETED, StreamFamily::Status),
            (STREAM_EVENTS_TYPING, StreamFamily::RoomBroadcast),
            (STREAM_EVENTS_REACTIONS, StreamFamily::RoomBroadcast),
            (STREAM_EVENTS_REPLIES, StreamFamily::RoomBroadcast),
            (STREAM_EVENTS_CONVERSATIONS, StreamFamily::ConversationEvent),
        ];
        for &(stream, family) in consumed {
            handles.push(spawn_stream_reader(
                Arc::clone(&streams),
                stream,
                family,
                engine.worker_senders.clone(),
                shutdown_rx.clone(),
            ));
        }

        (engine, handles)
    }
}

/// Reads one stream (Idle -> Reading), routes each entry to the worker
/// owning its conversation, and lets that worker ack it once dispatched.
fn spawn_stream_reader(
    streams: Arc<StreamFabric>,
    stream: &'static str,
    family: StreamFamily,
    worker_senders: Vec<mpsc::Sender<WorkItem>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let group = streams.manager().consumer_group().to_string();
        let consumer = format!("delivery-reader-{stream}");
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::debug!(stream, "delivery reader shutting down");
                        break;
                    }
                }
                leased = streams.manager().backend().read_group(
                    stream, &group, &consumer, DEFAULT_WORKER_BATCH_SIZE, DEADLINE_STREAM_READ_MS,
                ) => {
                    match leased {
                        Ok(entries) => {
                            for entry in entries {
                                let conversation_id = entry.field("conversationId").unwrap_or_default().to_string();
                                let idx = worker_index(&conversation_id, worker_senders.len());
                                let item = WorkItem { entry, source_stream: stream, family };
                                if worker_senders[idx].send(item).await.is_err() {
                                    tracing::warn!(stream, "delivery worker channel closed");
                                }
                            }
                        }
                        Err(e) => {
                            tracing::warn!(stream, error = %e, "delivery read_group failed, backing off");
                            tokio::time::sleep(Duration::from_millis(500)).await;
                        }
                    }
                }
            }
        }
    })
}

/// One worker of the fixed pool: Dispatching (resolve recipients, send to
/// online sessions or queue offline) then Acking. Entries for the same
/// conversation always land on the same worker and are handled in the
/// order `recv()` returns them.
fn spawn_dispatch_worker(
    mut rx: mpsc::Receiver<WorkItem>,
    streams: Arc<StreamFabric>,
    conversations: Arc<dyn ConversationRepository>,
    presence: Arc<PresenceRegistry>,
    sinks: Arc<SessionSinks>,
    pending: Arc<PendingStore>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let group = streams.manager().consumer_group().to_string();
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::debug!("delivery worker shutting down");
                        break;
                    }
                }
                item = rx.recv() => {
                    let Some(item) = item else { break };
                    match dispatch(&item, &conversations, &presence, &sinks, &pending).await {
                        Ok(()) => {
                            if let Err(e) = streams.manager().backend()
                                .ack(item.source_stream, &group, &item.entry.id).await
                            {
                                tracing::warn!(stream = item.source_stream, error = %e, "failed to ack delivered entry");
                            }
                        }
                        Err(e) => {
                            // Recipient resolution hit a repository failure; leave the
                            // entry unacked so it is redelivered on the next read
                            // (§4.6: "re-queued to Retry" — our Streams abstraction
                            // has no separate redelivery stream for non-WAL families,
                            // so redelivery-via-non-ack serves the same purpose).
                            tracing::warn!(stream = item.source_stream, id = %item.entry.id, error = %e, "recipient resolution failed, leaving unacked");
                        }
                    }
                }
            }
        }
    })
}

async fn dispatch(
    item: &WorkItem,
    conversations: &Arc<dyn ConversationRepository>,
    presence: &Arc<PresenceRegistry>,
    sinks: &Arc<SessionSinks>,
    pending: &Arc<PendingStore>,
) -> Result<(), super::errors::MessagingError> {
    match item.family {
        StreamFamily::NewMessage => dispatch_new_message(item, conversations, presence, sinks, pending).await,
        StreamFamily::Status => dispatch_status(item, conversations, presence, sinks, pending).await,
        StreamFamily::RoomBroadcast => dispatch_room_broadcast(item, presence, sinks).await,
        StreamFamily::ConversationEvent => dispatch_conversation_event(item, conversations, presence, sinks).await,
    }
}

async fn dispatch_new_message(
    item: &WorkItem,
    conversations: &Arc<dyn ConversationRepository>,
    presence: &Arc<PresenceRegistry>,
    sinks: &Arc<SessionSinks>,
    pending: &Arc<PendingStore>,
) -> Result<(), super::errors::MessagingError> {
    let envelope = match NewMessageEnvelope::from_entry(&item.entry) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(id = %item.entry.id, error = %e, "malformed new-message entry, dropping");
            return Ok(());
        }
    };

    let recipients = match &envelope.participants {
        Some(list) => list.clone(),
        None => resolve_conversation_participants(conversations, &envelope.conversation_id).await?,
    };

    let data = serde_json::to_value(&envelope).unwrap_or_default();
    fan_out(&recipients, OutboundEvent { event: "newMessage", data }, presence, sinks, pending);
    Ok(())
}

async fn dispatch_status(
    item: &WorkItem,
    conversations: &Arc<dyn ConversationRepository>,
    presence: &Arc<PresenceRegistry>,
    sinks: &Arc<SessionSinks>,
    pending: &Arc<PendingStore>,
) -> Result<(), super::errors::MessagingError> {
    let envelope = match StatusEnvelope::from_entry(&item.entry) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(id = %item.entry.id, error = %e, "malformed status entry, dropping");
            return Ok(());
        }
    };

    let Some(conversation_id) = &envelope.conversation_id else {
        tracing::debug!(id = %item.entry.id, "status entry without conversationId, dropping");
        return Ok(());
    };

    let mut recipients = resolve_conversation_participants(conversations, conversation_id).await?;
    recipients.retain(|id| id != &envelope.user_id);

    let event_name = match item.source_stream {
        s if s == STREAM_STATUS_DELIVERED => "messageDelivered",
        s if s == STREAM_STATUS_READ => "messageRead",
        s if s == STREAM_STATUS_EDITED => "messageEdited",
        s if s == STREAM_STATUS_DELETED => "messageDeleted",
        _ => "messageDelivered",
    };

    let data = serde_json::to_value(&envelope).unwrap_or_default();
    fan_out(&recipients, OutboundEvent { event: event_name, data }, presence, sinks, pending);
    Ok(())
}

/// Typing indicators, reactions and reply threads are transient: they fan
/// out to whoever is in the room right now and are dropped, never queued,
/// for anyone offline (§4.6 step 3).
async fn dispatch_room_broadcast(
    item: &WorkItem,
    presence: &Arc<PresenceRegistry>,
    sinks: &Arc<SessionSinks>,
) -> Result<(), super::errors::MessagingError> {
    let Some(conversation_id) = item.entry.field("conversationId") else {
        tracing::debug!(id = %item.entry.id, "room broadcast without conversationId, dropping");
        return Ok(());
    };
    let emitter = item.entry.field("userId").unwrap_or_default();

    let event_name = match item.source_stream {
        s if s == STREAM_EVENTS_TYPING => "typing",
        s if s == STREAM_EVENTS_REACTIONS => "messageReaction",
        s if s == STREAM_EVENTS_REPLIES => "messageReply",
        _ => "typing",
    };
    let data = raw_fields_as_json(&item.entry);

    for user_id in presence.online_participants(conversation_id) {
        if user_id == emitter {
            continue;
        }
        for session_id in presence.sessions_for(&user_id) {
            sinks.try_send(&session_id, OutboundEvent { event: event_name, data: data.clone() });
        }
    }
    Ok(())
}

async fn dispatch_conversation_event(
    item: &WorkItem,
    conversations: &Arc<dyn ConversationRepository>,
    presence: &Arc<PresenceRegistry>,
    sinks: &Arc<SessionSinks>,
) -> Result<(), super::errors::MessagingError> {
    let event: ConversationEvent = match item.entry.data() {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(id = %item.entry.id, error = %e, "malformed conversation event, dropping");
            return Ok(());
        }
    };

    let (event_name, recipients) = match &event {
        ConversationEvent::Created { participants, .. } => ("conversationUpdated", participants.clone()),
        ConversationEvent::ParticipantAdded { conversation_id, .. } => {
            ("conversation:participant:added", resolve_conversation_participants(conversations, conversation_id).await?)
        }
        ConversationEvent::ParticipantRemoved { conversation_id, .. } => {
            ("conversation:participant:removed", resolve_conversation_participants(conversations, conversation_id).await?)
        }
    };

    let data = serde_json::to_value(&event).unwrap_or_default();
    for user_id in &recipients {
        for session_id in presence.sessions_for(user_id) {
            sinks.try_send(&session_id, OutboundEvent { event: event_name, data: data.clone() });
        }
    }
    Ok(())
}

async fn resolve_conversation_participants(
    conversations: &Arc<dyn ConversationRepository>,
    conversation_id: &str,
) -> Result<Vec<String>, super::errors::MessagingError> {
    match conversations.find_by_id(conversation_id).await? {
        Some(conversation) => Ok(conversation.participants),
        None => {
            tracing::debug!(conversation_id, "conversation not found during recipient resolution");
            Ok(Vec::new())
        }
    }
}

/// Sends to every online session of every recipient; a recipient with no
/// open session gets the event appended to their pending queue for
/// reconnect replay instead (§4.6 step 3 — NEW_MESSAGE/status only).
fn fan_out(
    recipients: &[String],
    event: OutboundEvent,
    presence: &Arc<PresenceRegistry>,
    sinks: &Arc<SessionSinks>,
    pending: &Arc<PendingStore>,
) {
    for user_id in recipients {
        let sessions = presence.sessions_for(user_id);
        if sessions.is_empty() {
            pending.push(user_id, event.clone());
            continue;
        }
        for session_id in sessions {
            sinks.try_send(&session_id, event.clone());
        }
    }
}

fn raw_fields_as_json(entry: &StreamEntry) -> serde_json::Value {
    serde_json::to_value(entry.fields.clone()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_index_is_stable_for_same_conversation() {
        let a = worker_index("c1", 16);
        let b = worker_index("c1", 16);
        assert_eq!(a, b);
    }

    #[test]
    fn test_worker_index_within_bounds() {
        for id in ["c1", "c2", "conversation-with-a-much-longer-id"] {
            assert!(worker_index(id, 16) < 16);
        }
    }

    #[tokio::test]
    async fn test_pending_store_drains_queued_event() {
        let store = PendingStore::new();
        store.push("alice", OutboundEvent { event: "newMessage", data: serde_json::json!({"a": 1}) });
        let drained = store.drain("alice");
        assert_eq!(drained.len(), 1);
        assert!(store.drain("alice").is_empty());
    }
}
