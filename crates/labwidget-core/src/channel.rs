//! Change channel messages and endpoints.
//!
//! Traffic between the backend and a view is a pair of bounded queues:
//!
//! - backend -> view: one queue per view, filled by fan-out with [`ToView`]
//!   messages. Multicast is simply "push to every view of the object".
//! - view -> backend: a single queue per session carrying [`ToBackend`]
//!   messages tagged with the sending view. The session drains it in
//!   [`Session::process_pending`](crate::Session::process_pending).
//!
//! Neither side ever blocks on send. Ordering is FIFO per queue, which gives
//! per-property FIFO between one view and the backend; sequence numbers on
//! diffs let a view discard anything older than what it already holds.

use std::collections::BTreeMap;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::event::Origin;
use crate::object::ObjectId;
use crate::value::Value;
use crate::view::ViewId;

/// A message from the backend to one view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToView {
    /// Every Set property of the object. Supersedes all diffs up to `seq`.
    Snapshot {
        /// Displayed object.
        object_id: ObjectId,
        /// Property values; Unset properties are absent.
        properties: BTreeMap<String, Value>,
        /// Sequence number the snapshot is consistent with.
        seq: u64,
    },
    /// One property changed.
    Diff {
        /// Displayed object.
        object_id: ObjectId,
        /// Property name.
        property: String,
        /// New value.
        value: Value,
        /// Who caused the change.
        origin: Origin,
        /// Global change sequence number.
        seq: u64,
    },
    /// A trigger fired.
    Event {
        /// Displayed object.
        object_id: ObjectId,
        /// Trigger name.
        event: String,
        /// Trigger payload.
        payload: Value,
        /// Who fired it.
        origin: Origin,
    },
    /// Authoritative value after a write sent by this view.
    Ack {
        /// Displayed object.
        object_id: ObjectId,
        /// Property name.
        property: String,
        /// Value held by the backend once the write settled.
        value: Value,
        /// Sequence number of that value.
        seq: u64,
    },
    /// A write sent by this view was refused.
    Rejected {
        /// Displayed object.
        object_id: ObjectId,
        /// Property name the view wrote.
        property: String,
        /// Value the backend holds for that name; `None` if it has none.
        value: Option<Value>,
        /// Why the write was refused.
        reason: String,
    },
    /// The object was destroyed or the view detached; no further messages follow.
    Closed {
        /// Displayed object.
        object_id: ObjectId,
    },
}

impl ToView {
    /// The object the message concerns.
    pub fn object_id(&self) -> ObjectId {
        match self {
            Self::Snapshot { object_id, .. }
            | Self::Diff { object_id, .. }
            | Self::Event { object_id, .. }
            | Self::Ack { object_id, .. }
            | Self::Rejected { object_id, .. }
            | Self::Closed { object_id } => *object_id,
        }
    }
}

/// A message from a view to the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToBackend {
    /// The user edited a property.
    Set {
        /// Sending view.
        view: ViewId,
        /// Target object.
        object_id: ObjectId,
        /// Property name.
        property: String,
        /// New value.
        value: Value,
    },
    /// The user interacted with a trigger.
    Event {
        /// Sending view.
        view: ViewId,
        /// Target object.
        object_id: ObjectId,
        /// Trigger name.
        event: String,
        /// Interaction payload.
        payload: Value,
    },
    /// Ask for a fresh snapshot.
    RequestSnapshot {
        /// Sending view.
        view: ViewId,
    },
    /// Tear the view down.
    Detach {
        /// Sending view.
        view: ViewId,
    },
}

impl ToBackend {
    /// The sending view.
    pub fn view(&self) -> ViewId {
        match self {
            Self::Set { view, .. }
            | Self::Event { view, .. }
            | Self::RequestSnapshot { view }
            | Self::Detach { view } => *view,
        }
    }
}

/// Sending half of the session's inbound queue.
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: Sender<ToBackend>,
}

impl InboundSender {
    pub(crate) fn new(tx: Sender<ToBackend>) -> Self {
        Self { tx }
    }

    /// Queue a message for the backend without blocking.
    pub fn send(&self, message: ToBackend) -> Result<()> {
        self.tx.try_send(message).map_err(|err| match err {
            TrySendError::Full(_) => SyncError::ChannelClosed("inbound queue is full"),
            TrySendError::Disconnected(_) => SyncError::ChannelClosed("session has shut down"),
        })
    }
}

/// Both ends a render collaborator needs to drive one view.
///
/// Returned by [`Session::attach_link`](crate::Session::attach_link). The
/// first message on `outbound` is always the attach snapshot.
#[derive(Debug)]
pub struct ViewLink {
    /// Id of the new view.
    pub view: ViewId,
    /// The object it displays.
    pub object: ObjectId,
    /// Messages from the backend.
    pub outbound: Receiver<ToView>,
    /// Queue to the backend.
    pub inbound: InboundSender,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_full_is_reported() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let sender = InboundSender::new(tx);
        let view = ViewId::from_raw(1);

        sender.send(ToBackend::RequestSnapshot { view }).unwrap();
        assert!(matches!(
            sender.send(ToBackend::Detach { view }),
            Err(SyncError::ChannelClosed(_))
        ));

        drop(rx);
        assert!(sender.send(ToBackend::Detach { view }).is_err());
    }

    #[test]
    fn test_message_accessors() {
        let view = ViewId::from_raw(9);
        let msg = ToBackend::Event {
            view,
            object_id: ObjectId::from_raw(1),
            event: "click".into(),
            payload: Value::Null,
        };
        assert_eq!(msg.view(), view);

        let out = ToView::Closed {
            object_id: ObjectId::from_raw(5),
        };
        assert_eq!(out.object_id(), ObjectId::from_raw(5));
    }
}
