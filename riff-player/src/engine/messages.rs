//! Positioned player-message delivery
//!
//! The engine keeps every sent message with a position until playback crosses
//! it inside the right window. Messages without a position deliver as soon as
//! they are dequeued. Messages kept after delivery (`delete_after_delivery =
//! false`) re-arm whenever their window is traversed again.

use std::sync::atomic::Ordering;

use riff_common::time::ms_to_us;
use tracing::{debug, warn};

use super::core::Engine;
use super::{AppThreadDelivery, EngineEvent};
use crate::message::MessageSpec;

/// One message tracked by the engine.
pub(super) struct PendingMessage {
    pub spec: MessageSpec,
    /// Insertion order; messages at the same position deliver in this order.
    pub seq: u64,
    /// Set once delivered in the current traversal of its window; cleared
    /// when the window is entered again.
    pub delivered_this_traversal: bool,
}

impl Engine {
    pub(super) fn handle_send_message(&mut self, spec: MessageSpec) {
        if spec.state.canceled.load(Ordering::Acquire) {
            return;
        }
        match spec.position {
            None => {
                // Immediate delivery on the playback task as soon as the
                // message is dequeued.
                deliver(&spec, &self.event_tx);
            }
            Some((window_index, _)) => {
                if !self.timeline.is_empty() && window_index >= self.timeline.window_count() {
                    debug!(window_index, "dropping message for out-of-range window");
                    return;
                }
                let seq = self.next_message_seq;
                self.next_message_seq += 1;
                self.messages.push(PendingMessage {
                    spec,
                    seq,
                    delivered_this_traversal: false,
                });
            }
        }
    }

    /// Deliver every due message for `window_index` at `window_position_us`,
    /// in (position, insertion) order.
    pub(super) fn deliver_due_messages(&mut self, window_index: usize, window_position_us: u64) {
        let mut due: Vec<usize> = self
            .messages
            .iter()
            .enumerate()
            .filter(|(_, message)| {
                !message.delivered_this_traversal
                    && !message.spec.state.canceled.load(Ordering::Acquire)
                    && message
                        .spec
                        .position
                        .is_some_and(|(window, position_ms)| {
                            window == window_index && ms_to_us(position_ms) <= window_position_us
                        })
            })
            .map(|(index, _)| index)
            .collect();
        if due.is_empty() {
            return;
        }
        due.sort_by_key(|&index| {
            let message = &self.messages[index];
            (
                message.spec.position.map(|(_, ms)| ms).unwrap_or(0),
                message.seq,
            )
        });
        for &index in &due {
            let message = &mut self.messages[index];
            deliver(&message.spec, &self.event_tx);
            message.delivered_this_traversal = true;
        }
        self.messages.retain(|message| {
            !(message.delivered_this_traversal && message.spec.delete_after_delivery)
        });
    }

    /// Re-arm kept messages for a fresh traversal of `window_index`.
    pub(super) fn rearm_messages_for_window(&mut self, window_index: usize) {
        for message in &mut self.messages {
            if message
                .spec
                .position
                .is_some_and(|(window, _)| window == window_index)
            {
                message.delivered_this_traversal = false;
            }
        }
    }

    /// After a seek within `window_index`, messages positioned at or after
    /// the new position become deliverable again.
    pub(super) fn rearm_messages_after_seek(&mut self, window_index: usize, position_us: u64) {
        for message in &mut self.messages {
            if message
                .spec
                .position
                .is_some_and(|(window, position_ms)| {
                    window == window_index && ms_to_us(position_ms) >= position_us
                })
            {
                message.delivered_this_traversal = false;
            }
        }
    }

    /// Drop canceled messages and messages whose target window no longer
    /// exists in the timeline.
    pub(super) fn prune_messages(&mut self) {
        let window_count = self.timeline.window_count();
        self.messages.retain(|message| {
            if message.spec.state.canceled.load(Ordering::Acquire) {
                return false;
            }
            match message.spec.position {
                Some((window, _)) if window_count > 0 && window >= window_count => {
                    debug!(window, "dropping message: target window left the timeline");
                    false
                }
                _ => true,
            }
        });
    }
}

/// Invoke one message's target, either inline on the playback task or by
/// shipping it to the application thread.
fn deliver(
    spec: &MessageSpec,
    event_tx: &tokio::sync::mpsc::UnboundedSender<EngineEvent>,
) {
    if spec.deliver_on_app_thread {
        let _ = event_tx.send(EngineEvent::DeliverMessage(AppThreadDelivery {
            target: spec.target.clone(),
            message_type: spec.message_type,
            payload: spec.payload.clone(),
            state: spec.state.clone(),
        }));
        return;
    }
    match spec.target.lock() {
        Ok(mut target) => {
            if let Err(error) =
                target.handle_message(spec.message_type, spec.payload.as_deref())
            {
                warn!(%error, "message target failed");
            }
            spec.state.delivered.store(true, Ordering::Release);
        }
        Err(_) => warn!("message target mutex poisoned; delivery skipped"),
    }
}
