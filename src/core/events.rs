//! Editor Event Broadcasting
//!
//! Mutating timeline operations emit change descriptors over a broadcast
//! channel so observers (preview UI, autosave, history debouncing) can react
//! without the model knowing about them.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::{RailId, SegmentId, SourceKey, TimeUs, TransitionId};

/// Default capacity of the editor event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Change descriptor emitted after each committed timeline mutation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EditorEvent {
    SourcePlaced {
        key: SourceKey,
        rail_id: RailId,
        segment_id: SegmentId,
    },
    SourceRemoved {
        key: SourceKey,
    },
    SourceMetaChanged {
        key: SourceKey,
    },
    SegmentResized {
        segment_id: SegmentId,
        start: TimeUs,
        end: TimeUs,
    },
    SegmentSplit {
        segment_id: SegmentId,
        at: TimeUs,
    },
    SegmentDeleted {
        segment_id: SegmentId,
    },
    RailFlagsChanged {
        rail_id: RailId,
    },
    TransitionApplied {
        transition_id: TransitionId,
        rail_id: RailId,
    },
    TransitionRemoved {
        transition_id: TransitionId,
    },
    AnimationChanged {
        key: SourceKey,
    },
    DurationChanged {
        duration: TimeUs,
    },
    Reconciled,
}

/// Broadcast hub for [`EditorEvent`]s
///
/// Sending never blocks; events are dropped when no receiver is subscribed.
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<EditorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribes to subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<EditorEvent> {
        self.sender.subscribe()
    }

    /// Emits an event to all current subscribers.
    pub fn emit(&self, event: EditorEvent) {
        // A send error only means nobody is listening right now.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(EditorEvent::SourceRemoved {
            key: "abc".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            EditorEvent::SourceRemoved {
                key: "abc".to_string()
            }
        );
    }

    #[test]
    fn test_emit_without_subscribers_is_noop() {
        let bus = EventBus::new();
        bus.emit(EditorEvent::Reconciled);
    }
}
