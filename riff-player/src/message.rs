//! Targeted player messages
//!
//! A `PlayerMessage` delivers a typed payload to a target either immediately
//! on the playback task or the first time playback crosses a given
//! (window, position) pair. Built through [`crate::player::Player::create_message`],
//! configured, then consumed by [`PlayerMessage::send`], which returns a
//! handle for cancellation and delivery tracking.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::engine::EngineCommand;
use crate::error::Result;

/// Numeric message type. Values below [`MSG_CUSTOM_BASE`] are reserved.
pub type MessageType = u32;

/// Ask a renderer to adopt a new output surface.
pub const MSG_SET_SURFACE: MessageType = 1;

/// First message type available for application-defined messages.
pub const MSG_CUSTOM_BASE: MessageType = 10_000;

/// Opaque payload carried by a message. `Sync` is required because kept
/// messages may be delivered from both the playback task and the
/// application thread.
pub type MessagePayload = Box<dyn Any + Send + Sync>;

/// Receiver of targeted messages.
pub trait MessageTarget: Send {
    fn handle_message(
        &mut self,
        message_type: MessageType,
        payload: Option<&MessagePayload>,
    ) -> Result<()>;
}

impl<F> MessageTarget for F
where
    F: FnMut(MessageType, Option<&MessagePayload>) -> Result<()> + Send,
{
    fn handle_message(
        &mut self,
        message_type: MessageType,
        payload: Option<&MessagePayload>,
    ) -> Result<()> {
        self(message_type, payload)
    }
}

/// Flags shared between the application-side handle and the engine.
#[derive(Debug, Default)]
pub(crate) struct MessageState {
    pub canceled: AtomicBool,
    pub delivered: AtomicBool,
}

/// Target handle shared between the engine and application-thread delivery.
/// Re-armed messages (`delete_after_delivery = false`) are invoked more than
/// once, so the target cannot be consumed on first delivery.
pub(crate) type SharedMessageTarget = Arc<Mutex<Box<dyn MessageTarget>>>;

/// Everything the engine needs to track and deliver one message.
pub(crate) struct MessageSpec {
    pub target: SharedMessageTarget,
    pub message_type: MessageType,
    pub payload: Option<Arc<MessagePayload>>,
    /// `(window_index, window_position_ms)`; `None` delivers immediately.
    pub position: Option<(usize, u64)>,
    pub delete_after_delivery: bool,
    pub deliver_on_app_thread: bool,
    pub state: Arc<MessageState>,
}

/// Builder for one targeted message.
pub struct PlayerMessage {
    target: Box<dyn MessageTarget>,
    message_type: MessageType,
    payload: Option<MessagePayload>,
    position: Option<(usize, u64)>,
    delete_after_delivery: bool,
    deliver_on_app_thread: bool,
    sender: UnboundedSender<EngineCommand>,
}

impl PlayerMessage {
    pub(crate) fn new(
        sender: UnboundedSender<EngineCommand>,
        target: Box<dyn MessageTarget>,
    ) -> Self {
        Self {
            target,
            message_type: MSG_CUSTOM_BASE,
            payload: None,
            position: None,
            delete_after_delivery: true,
            deliver_on_app_thread: false,
            sender,
        }
    }

    pub fn with_type(mut self, message_type: MessageType) -> Self {
        self.message_type = message_type;
        self
    }

    pub fn with_payload(mut self, payload: MessagePayload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Deliver at or after the first time playback crosses the position,
    /// while the period containing it is being read.
    pub fn at_position(mut self, window_index: usize, position_ms: u64) -> Self {
        self.position = Some((window_index, position_ms));
        self
    }

    /// Keep the message armed after delivery. Combined with repeat modes the
    /// message re-arms at each loop traversal.
    pub fn with_delete_after_delivery(mut self, delete_after_delivery: bool) -> Self {
        self.delete_after_delivery = delete_after_delivery;
        self
    }

    /// Invoke the target on the application thread (during event processing)
    /// instead of on the playback task.
    pub fn deliver_on_app_thread(mut self) -> Self {
        self.deliver_on_app_thread = true;
        self
    }

    /// Hand the message to the engine. Returns a handle usable from any
    /// thread to cancel or observe delivery.
    pub fn send(self) -> MessageHandle {
        let state = Arc::new(MessageState::default());
        let spec = MessageSpec {
            target: Arc::new(Mutex::new(self.target)),
            message_type: self.message_type,
            payload: self.payload.map(Arc::new),
            position: self.position,
            delete_after_delivery: self.delete_after_delivery,
            deliver_on_app_thread: self.deliver_on_app_thread,
            state: Arc::clone(&state),
        };
        if self.sender.send(EngineCommand::SendMessage(spec)).is_err() {
            debug!("player message dropped: engine already released");
        }
        MessageHandle { state }
    }
}

/// Handle to a sent message.
#[derive(Clone)]
pub struct MessageHandle {
    state: Arc<MessageState>,
}

impl MessageHandle {
    /// Cancel the message if it has not been delivered yet. Idempotent, and
    /// a no-op after delivery.
    pub fn cancel(&self) {
        self.state.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.state.canceled.load(Ordering::Acquire)
    }

    /// Whether the target has been invoked at least once.
    pub fn is_delivered(&self) -> bool {
        self.state.delivered.load(Ordering::Acquire)
    }
}
