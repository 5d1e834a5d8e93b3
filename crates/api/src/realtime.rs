use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};

use careline_domain::chat::{ChatMessage, ChatThread};

use crate::observability;

/// Realtime fanout group. One shared room for the whole admin pool, one room
/// per patient id; there is no per-thread room because each patient has
/// exactly one thread and every admin sees all threads.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Room {
    Admins,
    Patient(String),
}

impl Room {
    pub fn kind(&self) -> &'static str {
        match self {
            Room::Admins => "admins",
            Room::Patient(_) => "patient",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    ChatJoined {
        thread: ChatThread,
    },
    NewMessage {
        message: ChatMessage,
        thread: ChatThread,
    },
    UserTyping {
        thread_id: String,
        user_id: String,
        email: String,
        is_typing: bool,
    },
    MessagesRead {
        thread_id: String,
        updated_count: u64,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::ChatJoined { .. } => "chat_joined",
            ServerEvent::NewMessage { .. } => "new_message",
            ServerEvent::UserTyping { .. } => "user_typing",
            ServerEvent::MessagesRead { .. } => "messages_read",
            ServerEvent::Error { .. } => "error",
        }
    }
}

/// Process-wide room table. Constructed once and injected everywhere a
/// broadcast is needed (REST handlers included) rather than exposed through
/// a global accessor. The table is the only shared mutable state in the
/// realtime layer; it is touched only on subscribe, and `publish` takes the
/// read path so fanout never observes a torn membership list.
pub struct RealtimeHub {
    rooms: RwLock<HashMap<Room, broadcast::Sender<ServerEvent>>>,
    capacity: usize,
}

impl RealtimeHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            capacity: capacity.max(16),
        }
    }

    pub async fn subscribe(&self, room: &Room) -> broadcast::Receiver<ServerEvent> {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(room.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drops the room's channel when no receiver is left. Called after a
    /// socket disconnects so the table does not accumulate one sender per
    /// patient id forever. Returns whether the entry was removed.
    pub async fn prune(&self, room: &Room) -> bool {
        let mut rooms = self.rooms.write().await;
        match rooms.get(room) {
            Some(sender) if sender.receiver_count() == 0 => {
                rooms.remove(room);
                true
            }
            _ => false,
        }
    }

    /// Delivers the event to every live subscriber of the room. A room with
    /// no subscribers is not an error; the event just has no audience.
    pub async fn publish(&self, room: &Room, event: ServerEvent) -> usize {
        observability::register_realtime_event(event.name(), room.kind());
        let rooms = self.rooms.read().await;
        match rooms.get(room) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }
}
