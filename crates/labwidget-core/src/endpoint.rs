//! View-side endpoint.
//!
//! [`ViewHandle`] is what a render collaborator holds for one rendered view.
//! It keeps the view's local copy of the object's properties, applies
//! backend messages in sequence order and sends user edits back.
//!
//! Writes are optimistic: [`ViewHandle::set`] updates the local copy at once
//! and the backend answers with an `Ack` carrying the authoritative value.
//! The handle only reports the ack as an update when the optimistic value
//! turned out to be wrong. A refused write comes back as `Rejected` and the
//! local value is restored from it.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};

use crate::channel::{InboundSender, ToBackend, ToView, ViewLink};
use crate::error::{Result, SyncError};
use crate::logging::targets;
use crate::event::Origin;
use crate::object::ObjectId;
use crate::value::Value;
use crate::view::ViewId;

/// A change to the view's local state, as reported by [`ViewHandle::drain`].
#[derive(Debug, Clone, PartialEq)]
pub enum ViewUpdate {
    /// The whole local state was replaced by a snapshot.
    Snapshot,
    /// One property took a new value.
    Changed {
        /// Property name.
        property: String,
        /// The value now held locally.
        value: Value,
        /// Who caused the change.
        origin: Origin,
    },
    /// A trigger fired on the backend or in another view.
    Event {
        /// Trigger name.
        event: String,
        /// Payload.
        payload: Value,
        /// Who fired it.
        origin: Origin,
    },
    /// The backend refused a write from this view; the local value was
    /// restored from the backend.
    Rejected {
        /// Property name.
        property: String,
        /// Reason given by the backend.
        reason: String,
    },
    /// The object was destroyed or the view was detached.
    Closed,
}

/// The view-side end of a [`ViewLink`].
///
/// Dropping the handle detaches the view.
#[derive(Debug)]
pub struct ViewHandle {
    view: ViewId,
    object: ObjectId,
    outbound: Receiver<ToView>,
    inbound: InboundSender,
    data: BTreeMap<String, Value>,
    /// Sequence number of the last snapshot; older diffs are stale.
    floor_seq: u64,
    last_seq: HashMap<String, u64>,
    unacked: HashMap<String, usize>,
    queued: BTreeMap<String, Value>,
    closed: bool,
}

impl ViewHandle {
    /// Wrap a link and apply the attach snapshot.
    pub fn from_link(link: ViewLink) -> Self {
        let mut handle = Self {
            view: link.view,
            object: link.object,
            outbound: link.outbound,
            inbound: link.inbound,
            data: BTreeMap::new(),
            floor_seq: 0,
            last_seq: HashMap::new(),
            unacked: HashMap::new(),
            queued: BTreeMap::new(),
            closed: false,
        };
        handle.drain();
        handle
    }

    /// This view's id.
    pub fn id(&self) -> ViewId {
        self.view
    }

    /// The displayed object.
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// The local value of a property.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// All local values.
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// Whether the view has been closed by either side.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Whether writes to `name` are still waiting for the backend.
    pub fn is_pending(&self, name: &str) -> bool {
        self.unacked.get(name).is_some_and(|n| *n > 0) || self.queued.contains_key(name)
    }

    /// Send a user edit and apply it locally.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.send_set(name, value.clone())?;
        self.data.insert(name.to_string(), value);
        Ok(())
    }

    /// Like [`ViewHandle::set`], but while an earlier write to `name` is
    /// unacknowledged only the latest value is kept and sent on the ack.
    pub fn set_soon(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        if self.unacked.get(name).is_some_and(|n| *n > 0) {
            self.ensure_open()?;
            self.queued.insert(name.to_string(), value.clone());
            self.data.insert(name.to_string(), value);
            return Ok(());
        }
        self.set(name, value)
    }

    /// Fire a trigger on the backend object.
    pub fn trigger(&self, event: &str, payload: impl Into<Value>) -> Result<()> {
        self.ensure_open()?;
        self.inbound.send(ToBackend::Event {
            view: self.view,
            object_id: self.object,
            event: event.to_string(),
            payload: payload.into(),
        })
    }

    /// Ask the backend for a fresh snapshot.
    pub fn request_snapshot(&self) -> Result<()> {
        self.ensure_open()?;
        self.inbound.send(ToBackend::RequestSnapshot { view: self.view })
    }

    /// Tear the view down. Idempotent.
    pub fn detach(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inbound.send(ToBackend::Detach { view: self.view })
    }

    /// Apply every message that has arrived and report what changed.
    pub fn drain(&mut self) -> Vec<ViewUpdate> {
        let mut updates = Vec::new();
        loop {
            match self.outbound.try_recv() {
                Ok(message) => self.apply(message, &mut updates),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.mark_closed(&mut updates);
                    break;
                }
            }
        }
        updates
    }

    /// Wait up to `timeout` for at least one message, then drain.
    pub fn drain_timeout(&mut self, timeout: Duration) -> Vec<ViewUpdate> {
        let mut updates = Vec::new();
        match self.outbound.recv_timeout(timeout) {
            Ok(message) => self.apply(message, &mut updates),
            Err(RecvTimeoutError::Timeout) => return updates,
            Err(RecvTimeoutError::Disconnected) => {
                self.mark_closed(&mut updates);
                return updates;
            }
        }
        updates.extend(self.drain());
        updates
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(SyncError::ChannelClosed("view is closed"));
        }
        Ok(())
    }

    fn send_set(&mut self, name: &str, value: Value) -> Result<()> {
        self.ensure_open()?;
        self.inbound.send(ToBackend::Set {
            view: self.view,
            object_id: self.object,
            property: name.to_string(),
            value,
        })?;
        *self.unacked.entry(name.to_string()).or_default() += 1;
        Ok(())
    }

    fn is_fresh(&self, property: &str, seq: u64) -> bool {
        seq > self.floor_seq && seq > self.last_seq.get(property).copied().unwrap_or(0)
    }

    fn apply(&mut self, message: ToView, updates: &mut Vec<ViewUpdate>) {
        match message {
            ToView::Snapshot {
                properties, seq, ..
            } => {
                self.data = properties;
                self.floor_seq = seq;
                self.last_seq.clear();
                // Acks may have been dropped with the diffs this snapshot replaces.
                self.unacked.clear();
                updates.push(ViewUpdate::Snapshot);
                self.flush_queued();
            }
            ToView::Diff {
                property,
                value,
                origin,
                seq,
                ..
            } => {
                if !self.is_fresh(&property, seq) {
                    tracing::trace!(target: targets::VIEW, view = %self.view, %property, seq, "stale diff ignored");
                    return;
                }
                self.last_seq.insert(property.clone(), seq);
                if self.data.get(&property) != Some(&value) {
                    self.data.insert(property.clone(), value.clone());
                    updates.push(ViewUpdate::Changed {
                        property,
                        value,
                        origin,
                    });
                }
            }
            ToView::Ack {
                property,
                value,
                seq,
                ..
            } => self.apply_ack(property, value, seq, updates),
            ToView::Event {
                event,
                payload,
                origin,
                ..
            } => updates.push(ViewUpdate::Event {
                event,
                payload,
                origin,
            }),
            ToView::Rejected {
                property,
                value,
                reason,
                ..
            } => self.apply_rejected(property, value, reason, updates),
            ToView::Closed { .. } => self.mark_closed(updates),
        }
    }

    fn flush_queued(&mut self) {
        for (property, value) in std::mem::take(&mut self.queued) {
            self.data.insert(property.clone(), value.clone());
            if self.send_set(&property, value).is_err() {
                tracing::warn!(target: targets::CHANNEL, view = %self.view, %property, "coalesced write could not be sent");
            }
        }
    }

    fn apply_rejected(
        &mut self,
        property: String,
        value: Option<Value>,
        reason: String,
        updates: &mut Vec<ViewUpdate>,
    ) {
        tracing::debug!(target: targets::VIEW, view = %self.view, %property, %reason, "write rejected");
        self.unacked.remove(&property);
        self.queued.remove(&property);
        match value {
            Some(value) => self.data.insert(property.clone(), value),
            None => self.data.remove(&property),
        };
        updates.push(ViewUpdate::Rejected { property, reason });
    }

    fn apply_ack(&mut self, property: String, value: Value, seq: u64, updates: &mut Vec<ViewUpdate>) {
        let remaining = match self.unacked.get_mut(&property) {
            Some(n) => {
                *n = n.saturating_sub(1);
                *n
            }
            None => 0,
        };
        if remaining > 0 {
            return;
        }
        self.unacked.remove(&property);

        if let Some(next) = self.queued.remove(&property) {
            if self.send_set(&property, next).is_err() {
                tracing::warn!(target: targets::CHANNEL, view = %self.view, %property, "coalesced write could not be sent");
            }
            return;
        }

        let fresh = seq >= self.floor_seq && seq >= self.last_seq.get(&property).copied().unwrap_or(0);
        if !fresh {
            return;
        }
        self.last_seq.insert(property.clone(), seq);
        if self.data.get(&property) != Some(&value) {
            self.data.insert(property.clone(), value.clone());
            updates.push(ViewUpdate::Changed {
                property,
                value,
                origin: Origin::Backend,
            });
        }
    }

    fn mark_closed(&mut self, updates: &mut Vec<ViewUpdate>) {
        if !self.closed {
            self.closed = true;
            updates.push(ViewUpdate::Closed);
        }
    }
}

impl Drop for ViewHandle {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.inbound.send(ToBackend::Detach { view: self.view });
        }
    }
}
