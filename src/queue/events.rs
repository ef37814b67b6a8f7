use serde::Serialize;
use tokio::sync::broadcast;

use crate::queue::song::{SlotId, SongId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEvent {
    SongAdded { id: SongId, code: String, position: usize },
    FetchRequested { id: SongId, slot: SlotId },
    FetchCompleted { id: SongId },
    FetchFailed { id: SongId, reason: String },
    TrackStarted { id: SongId },
    TrackFinished { id: SongId },
    Paused,
    Resumed,
    Skipped { id: SongId },
    EngineReset,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: QueueEvent) {
        // nobody listening is fine
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }
}
