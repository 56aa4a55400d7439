//! View registry.
//!
//! Tracks which rendered views display which object, and owns the outbound
//! half of every view's channel. Fan-out walks [`ViewRegistry::views_of`] and
//! pushes through [`ViewRegistry::deliver`], which never blocks: a full queue
//! marks the view for resynchronization and a disconnected one is reported
//! so the session can detach it.

use std::collections::HashMap;
use std::fmt;

use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};

use crate::channel::ToView;
use crate::logging::targets;
use crate::object::ObjectId;

/// A unique identifier for a rendered view.
///
/// Ids are allocated from a per-session counter and never reused, so a
/// message addressed to a torn-down view cannot reach a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewId(u64);

impl ViewId {
    /// The raw counter value, as used on the wire.
    #[inline]
    pub fn as_raw(self) -> u64 {
        self.0
    }

    /// Rebuild an id from its wire form.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "view#{}", self.0)
    }
}

/// Result of a non-blocking push to a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The message was queued.
    Sent,
    /// The queue was full; the message was dropped and the view needs a snapshot.
    Full,
    /// The view's receiver is gone.
    Disconnected,
    /// No such view is attached.
    Unknown,
}

struct ViewEntry {
    object: ObjectId,
    outbound: Sender<ToView>,
    needs_resync: bool,
}

/// Attached views, indexed by id and by displayed object.
#[derive(Default)]
pub struct ViewRegistry {
    next_id: u64,
    views: HashMap<ViewId, ViewEntry>,
    by_object: HashMap<ObjectId, Vec<ViewId>>,
}

impl ViewRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new view of `object` that receives through `outbound`.
    pub fn attach(&mut self, object: ObjectId, outbound: Sender<ToView>) -> ViewId {
        self.next_id += 1;
        let id = ViewId(self.next_id);
        self.views.insert(
            id,
            ViewEntry {
                object,
                outbound,
                needs_resync: false,
            },
        );
        self.by_object.entry(object).or_default().push(id);
        tracing::debug!(target: targets::VIEW, view = %id, ?object, "view attached");
        id
    }

    /// Remove a view. Returns the object it displayed and its sender, or
    /// `None` if it was not attached.
    pub fn detach(&mut self, view: ViewId) -> Option<(ObjectId, Sender<ToView>)> {
        let entry = self.views.remove(&view)?;
        if let Some(ids) = self.by_object.get_mut(&entry.object) {
            ids.retain(|other| *other != view);
            if ids.is_empty() {
                self.by_object.remove(&entry.object);
            }
        }
        tracing::debug!(target: targets::VIEW, %view, object = ?entry.object, "view detached");
        Some((entry.object, entry.outbound))
    }

    /// Remove every view of an object.
    pub fn detach_object(&mut self, object: ObjectId) -> Vec<(ViewId, Sender<ToView>)> {
        self.views_of(object)
            .into_iter()
            .filter_map(|view| self.detach(view).map(|(_, tx)| (view, tx)))
            .collect()
    }

    /// The object a view displays.
    pub fn object_of(&self, view: ViewId) -> Option<ObjectId> {
        self.views.get(&view).map(|entry| entry.object)
    }

    /// Views of an object, in attach order.
    pub fn views_of(&self, object: ObjectId) -> Vec<ViewId> {
        self.by_object.get(&object).cloned().unwrap_or_default()
    }

    /// Whether any view displays `object`.
    pub fn has_views(&self, object: ObjectId) -> bool {
        self.by_object.contains_key(&object)
    }

    /// Number of attached views across all objects.
    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    /// Push a message without blocking.
    pub fn deliver(&mut self, view: ViewId, message: ToView) -> Delivery {
        let Some(entry) = self.views.get_mut(&view) else {
            return Delivery::Unknown;
        };
        match entry.outbound.try_send(message) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => {
                entry.needs_resync = true;
                Delivery::Full
            }
            Err(TrySendError::Disconnected(_)) => Delivery::Disconnected,
        }
    }

    /// Whether a view has missed messages and must be sent a snapshot.
    pub fn needs_resync(&self, view: ViewId) -> bool {
        self.views.get(&view).is_some_and(|entry| entry.needs_resync)
    }

    /// Clear the resync flag after a snapshot has been queued.
    pub fn clear_resync(&mut self, view: ViewId) {
        if let Some(entry) = self.views.get_mut(&view) {
            entry.needs_resync = false;
        }
    }

    /// Views currently waiting for a snapshot.
    pub fn resync_pending(&self) -> Vec<ViewId> {
        let mut pending: Vec<ViewId> = self
            .views
            .iter()
            .filter(|(_, entry)| entry.needs_resync)
            .map(|(id, _)| *id)
            .collect();
        pending.sort();
        pending
    }
}

impl fmt::Debug for ViewRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewRegistry")
            .field("views", &self.views.len())
            .field("objects", &self.by_object.len())
            .finish()
    }
}
