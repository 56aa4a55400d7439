//! The synchronization session.
//!
//! A [`Session`] owns every object, binding, subscription and view of one
//! process. It is cheap to clone; clones share state.
//!
//! # Propagation passes
//!
//! Every write runs as part of a *pass*. The outermost `set` (or `fire`,
//! `bind`, or inbound view message) opens the pass; the pass then:
//!
//! 1. walks the binding graph depth-first from the written pair, applying
//!    the value to each pair not yet visited in this pass and stopping at
//!    pairs whose value is already equal,
//! 2. pushes a diff to every view of each changed object (except the view
//!    the write came from) and queues one change event per changed pair,
//! 3. releases the state lock and runs the queued callbacks in order.
//!
//! A `set` issued by a callback joins the running pass instead of opening a
//! new one. If it targets a pair the pass already visited, the value is
//! stored and sent to views but no further events fire and no edges are
//! followed. Passes from other threads wait until the running one finishes.
//!
//! # Lock discipline
//!
//! State lives behind one `parking_lot::Mutex`. Anything that may own user
//! closures (removed callbacks) is dropped only after that lock is released,
//! because a closure can hold an [`ObjectHandle`] whose drop re-enters the
//! session.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, ReentrantMutex};

use crate::binding::{BindMode, BindingGraph, BindingId, BindingInfo, PropagationPass};
use crate::channel::{InboundSender, ToBackend, ToView, ViewLink};
use crate::config::SyncConfig;
use crate::endpoint::ViewHandle;
use crate::error::{Result, SyncError};
use crate::event::{
    self, Callback, CallbackError, CallbackFailure, Event, EventDispatcher, Origin,
    SubscriptionGuard, SubscriptionId,
};
use crate::logging::{targets, PerfSpan};
use crate::object::{MemberKind, ObjectHandle, ObjectId, ObjectSpec};
use crate::property::{PropertyKey, PropertyStore, SetOutcome};
use crate::value::{FromValue, Value};
use crate::view::{Delivery, ViewId, ViewRegistry};

#[derive(Default)]
struct ActivePass {
    visited: PropagationPass,
    pending: VecDeque<Event>,
}

/// Everything guarded by the session lock.
pub(crate) struct SessionState {
    pub(crate) store: PropertyStore,
    pub(crate) bindings: BindingGraph,
    pub(crate) dispatcher: EventDispatcher,
    pub(crate) views: ViewRegistry,
    seq: u64,
    property_seq: HashMap<PropertyKey, u64>,
    pass: Option<ActivePass>,
    /// Callbacks removed under the lock, dropped after it is released.
    garbage: Vec<Callback>,
    echo_to_origin: bool,
}

struct Inner {
    config: SyncConfig,
    state: Mutex<SessionState>,
    gate: ReentrantMutex<()>,
    inbound_tx: Sender<ToBackend>,
    inbound_rx: Receiver<ToBackend>,
}

/// Handle to a synchronization session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

static_assertions::assert_impl_all!(Session: Send, Sync);
static_assertions::assert_impl_all!(ObjectHandle: Send, Sync);

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create a session with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    /// Create a session with a custom configuration.
    pub fn with_config(config: SyncConfig) -> Self {
        let (inbound_tx, inbound_rx) = crossbeam_channel::bounded(config.inbound_capacity());
        let state = SessionState {
            store: PropertyStore::new(),
            bindings: BindingGraph::new(),
            dispatcher: EventDispatcher::new(),
            views: ViewRegistry::new(),
            seq: 0,
            property_seq: HashMap::new(),
            pass: None,
            garbage: Vec::new(),
            echo_to_origin: config.echo_to_origin,
        };
        tracing::debug!(target: targets::SESSION, ?config, "session created");
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(state),
                gate: ReentrantMutex::new(()),
                inbound_tx,
                inbound_rx,
            }),
        }
    }

    /// The configuration this session was created with.
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Whether two handles refer to the same session.
    pub fn ptr_eq(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // -------------------------------------------------------------------------
    // Objects
    // -------------------------------------------------------------------------

    /// Create an object and return the first lease on it.
    pub fn create_object(&self, spec: ObjectSpec) -> Result<ObjectHandle> {
        spec.validate()?;
        let id = self.locked(|st| st.store.insert(&spec));
        Ok(ObjectHandle::new(self.clone(), id))
    }

    /// Destroy an object now.
    ///
    /// Bindings touching it are removed (peers keep their values), its
    /// subscriptions are dropped and its views receive `Closed`.
    pub fn destroy(&self, id: ObjectId) -> Result<()> {
        self.locked(|st| st.destroy(id))
    }

    /// Called when the last [`ObjectHandle`] is dropped.
    pub(crate) fn release(&self, id: ObjectId) {
        self.locked(|st| {
            if !st.store.contains(id) {
                return;
            }
            if st.views.has_views(id) {
                let _ = st.store.mark_released(id);
                tracing::debug!(target: targets::SESSION, ?id, "object released; waiting for views to detach");
            } else {
                let _ = st.destroy(id);
            }
        });
    }

    /// Whether the object exists.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.inspect(|st| st.store.contains(id))
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.inspect(|st| st.store.object_count())
    }

    /// The type name the object was declared with.
    pub fn type_name(&self, id: ObjectId) -> Result<String> {
        self.inspect(|st| st.store.type_name(id).map(str::to_string))
    }

    /// Member names and kinds of an object, sorted by name.
    pub fn members(&self, id: ObjectId) -> Result<Vec<(String, MemberKind)>> {
        self.inspect(|st| st.store.members(id))
    }

    // -------------------------------------------------------------------------
    // Properties
    // -------------------------------------------------------------------------

    /// Read a property. `Ok(None)` means Unset.
    pub fn get(&self, id: ObjectId, name: &str) -> Result<Option<Value>> {
        self.inspect(|st| st.store.get(id, name))
    }

    /// Read a property and convert it.
    pub fn get_as<T: FromValue>(&self, id: ObjectId, name: &str) -> Result<Option<T>> {
        self.get(id, name)?
            .map(|value| T::from_value(&value))
            .transpose()
    }

    /// All Set properties of an object.
    pub fn snapshot(&self, id: ObjectId) -> Result<BTreeMap<String, Value>> {
        self.inspect(|st| st.store.snapshot(id))
    }

    /// Write a property from application code.
    ///
    /// Returns `true` if the stored value changed. Writing an equal value is
    /// a no-op: no events, no diffs, no propagation.
    ///
    /// Called from a callback while a pass is running, a write to a property
    /// that pass already changed is stored and sent to views but does not
    /// follow bindings again. Properties mirrored to it keep the value the
    /// pass gave them:
    ///
    /// ```
    /// use labwidget_core::{BindMode, ObjectSpec, Session, Value};
    ///
    /// let session = Session::new();
    /// let a = session.create_object(ObjectSpec::new("A").property("v", 0))?;
    /// let b = session.create_object(ObjectSpec::new("B").property("v", 0))?;
    /// session.bind(b.id(), "v", a.id(), "v", BindMode::Mirror)?;
    ///
    /// let clamp = session.clone();
    /// let a_id = a.id();
    /// session.subscribe(a.id(), "v", move |event| {
    ///     if event.value.as_i64().is_some_and(|v| v > 10) {
    ///         let _ = clamp.set(a_id, "v", 10);
    ///     }
    /// })?;
    ///
    /// a.set("v", 50)?;
    /// assert_eq!(a.get("v")?, Some(Value::Int(10)));
    /// assert_eq!(b.get("v")?, Some(Value::Int(50)));
    /// # Ok::<(), labwidget_core::SyncError>(())
    /// ```
    pub fn set(&self, id: ObjectId, name: &str, value: impl Into<Value>) -> Result<bool> {
        self.set_with_origin(PropertyKey::new(id, name), value.into(), Origin::Backend)
    }

    #[tracing::instrument(skip(self, value), target = "labwidget_core::session", level = "trace")]
    fn set_with_origin(&self, key: PropertyKey, value: Value, origin: Origin) -> Result<bool> {
        self.with_pass(|st| st.propagate(key, value, origin))
    }

    /// Fire a trigger from application code.
    pub fn fire(&self, id: ObjectId, name: &str, payload: impl Into<Value>) -> Result<()> {
        self.fire_with_origin(PropertyKey::new(id, name), payload.into(), Origin::Backend)
    }

    #[tracing::instrument(skip(self, payload), target = "labwidget_core::session", level = "trace")]
    fn fire_with_origin(&self, key: PropertyKey, payload: Value, origin: Origin) -> Result<()> {
        self.with_pass(|st| st.fire(key, payload, origin))
    }

    // -------------------------------------------------------------------------
    // Bindings
    // -------------------------------------------------------------------------

    /// Make `target.target_prop` follow `source.source_prop`.
    ///
    /// The source's current value is copied into the target right away
    /// unless the source is Unset or both are already equal. With
    /// [`BindMode::Mirror`] later changes on the target flow back as well.
    pub fn bind(
        &self,
        target: ObjectId,
        target_prop: &str,
        source: ObjectId,
        source_prop: &str,
        mode: BindMode,
    ) -> Result<BindingId> {
        let target_key = PropertyKey::new(target, target_prop);
        let source_key = PropertyKey::new(source, source_prop);
        self.with_pass(|st| {
            let source_value = st.store.get(source, source_prop)?;
            st.store.get(target, target_prop)?;
            let id = st.bindings.add(target_key.clone(), source_key, mode)?;
            if let Some(value) = source_value {
                st.propagate(target_key, value, Origin::Backend)?;
            }
            Ok(id)
        })
    }

    /// Remove a binding. Both properties keep their current values.
    pub fn unbind(&self, id: BindingId) -> Result<BindingInfo> {
        self.locked(|st| st.bindings.remove(id))
    }

    /// All bindings.
    pub fn bindings(&self) -> Vec<(BindingId, BindingInfo)> {
        self.inspect(|st| st.bindings.iter().collect())
    }

    /// Number of bindings.
    pub fn binding_count(&self) -> usize {
        self.inspect(|st| st.bindings.binding_count())
    }

    // -------------------------------------------------------------------------
    // Events
    // -------------------------------------------------------------------------

    /// Call `callback` on every event named in `names` (space separated).
    ///
    /// Property names fire on change, trigger names on interaction.
    pub fn subscribe<F>(&self, object: ObjectId, names: &str, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.subscribe_fallible(object, names, move |event| {
            callback(event);
            Ok(())
        })
    }

    /// Like [`Session::subscribe`], for callbacks that can fail.
    ///
    /// An `Err` is handled like a panic: logged, reported on the error
    /// trigger, and isolated from other callbacks.
    pub fn subscribe_fallible<F>(
        &self,
        object: ObjectId,
        names: &str,
        callback: F,
    ) -> Result<SubscriptionId>
    where
        F: Fn(&Event) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
    {
        let names = event::split_names(names);
        let callback = event::callback(callback);
        self.locked(|st| {
            let valid = match names.first() {
                None => Err(SyncError::unknown_property(object, "")),
                Some(_) => names
                    .iter()
                    .try_for_each(|name| st.store.member_kind(object, name).map(|_| ())),
            };
            if let Err(err) = valid {
                st.garbage.push(callback);
                return Err(err);
            }
            let id = st.dispatcher.add(object, names, callback);
            tracing::trace!(target: targets::EVENT, ?object, ?id, "subscribed");
            Ok(id)
        })
    }

    /// Subscribe until the returned guard is dropped.
    pub fn subscribe_scoped<F>(
        &self,
        object: ObjectId,
        names: &str,
        callback: F,
    ) -> Result<SubscriptionGuard>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.subscribe(object, names, callback)?;
        Ok(SubscriptionGuard::new(self.clone(), id))
    }

    /// Remove one subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.locked(|st| match st.dispatcher.remove(id) {
            Some(callback) => {
                st.garbage.push(callback);
                true
            }
            None => false,
        })
    }

    /// Remove every listener on `(object, name)`. Returns how many
    /// subscriptions were dropped entirely.
    pub fn unsubscribe_all(&self, object: ObjectId, name: &str) -> usize {
        self.locked(|st| {
            let removed = st.dispatcher.remove_all(object, name);
            let count = removed.len();
            st.garbage.extend(removed);
            count
        })
    }

    /// Number of listeners on `(object, name)`.
    pub fn listener_count(&self, object: ObjectId, name: &str) -> usize {
        self.inspect(|st| st.dispatcher.listener_count(&PropertyKey::new(object, name)))
    }

    // -------------------------------------------------------------------------
    // Views
    // -------------------------------------------------------------------------

    /// Attach a new view of `object` and return its raw channel ends.
    ///
    /// The first message on the link is the object's snapshot.
    pub fn attach_link(&self, object: ObjectId) -> Result<ViewLink> {
        let (tx, rx) = crossbeam_channel::bounded(self.inner.config.view_capacity());
        let view = self.locked(|st| {
            if !st.store.contains(object) {
                return Err(SyncError::UnknownObject(object));
            }
            let view = st.views.attach(object, tx);
            st.send_snapshot(view);
            Ok(view)
        })?;
        Ok(ViewLink {
            view,
            object,
            outbound: rx,
            inbound: InboundSender::new(self.inner.inbound_tx.clone()),
        })
    }

    /// Attach a new view of `object` with an in-process endpoint.
    pub fn attach(&self, object: ObjectId) -> Result<ViewHandle> {
        Ok(ViewHandle::from_link(self.attach_link(object)?))
    }

    /// Detach a view. Idempotent; returns `false` if it was not attached.
    pub fn detach(&self, view: ViewId) -> bool {
        self.locked(|st| st.detach_view(view))
    }

    /// Views currently displaying `object`, in attach order.
    pub fn views_of(&self, object: ObjectId) -> Vec<ViewId> {
        self.inspect(|st| st.views.views_of(object))
    }

    /// Number of attached views.
    pub fn view_count(&self) -> usize {
        self.inspect(|st| st.views.view_count())
    }

    /// Number of view messages waiting to be applied.
    pub fn pending_inbound(&self) -> usize {
        self.inner.inbound_rx.len()
    }

    /// Apply queued view messages and resynchronize views that missed diffs.
    ///
    /// Returns the number of inbound messages applied. Concurrent callers
    /// take turns, so messages are applied in the order they were queued.
    pub fn process_pending(&self) -> usize {
        let _gate = self.inner.gate.lock();
        let limit = self.inner.config.max_drain_batch;
        let mut applied = 0;
        while limit == 0 || applied < limit {
            let Ok(message) = self.inner.inbound_rx.try_recv() else {
                break;
            };
            self.apply_inbound(message);
            applied += 1;
        }
        self.locked(|st| {
            for view in st.views.resync_pending() {
                st.send_snapshot(view);
            }
        });
        if applied > 0 {
            tracing::trace!(target: targets::CHANNEL, applied, "inbound messages processed");
        }
        applied
    }

    fn apply_inbound(&self, message: ToBackend) {
        let view = message.view();
        let Some(object) = self.inspect(|st| st.views.object_of(view)) else {
            let err = SyncError::UnknownView(view);
            tracing::warn!(target: targets::CHANNEL, error = %err, ?message, "message dropped");
            return;
        };
        match message {
            ToBackend::Set {
                object_id,
                property,
                value,
                ..
            } => {
                let key = PropertyKey::new(object, property);
                let result = if object_id == object {
                    self.set_with_origin(key.clone(), value, Origin::View(view))
                } else {
                    Err(SyncError::ViewObjectMismatch {
                        view,
                        expected: object,
                        got: object_id,
                    })
                };
                match result {
                    Ok(_) => self.acknowledge(view, &key),
                    Err(err) => {
                        tracing::warn!(target: targets::CHANNEL, %view, %key, error = %err, "view write dropped");
                        self.reject(view, &key, &err);
                    }
                }
            }
            ToBackend::Event {
                object_id,
                event,
                payload,
                ..
            } => {
                if object_id != object {
                    let err = SyncError::ViewObjectMismatch {
                        view,
                        expected: object,
                        got: object_id,
                    };
                    tracing::warn!(target: targets::CHANNEL, error = %err, "view event dropped");
                    return;
                }
                let key = PropertyKey::new(object, event);
                if let Err(err) = self.fire_with_origin(key.clone(), payload, Origin::View(view)) {
                    tracing::warn!(target: targets::CHANNEL, %view, %key, error = %err, "view event dropped");
                }
            }
            ToBackend::RequestSnapshot { .. } => self.locked(|st| st.send_snapshot(view)),
            ToBackend::Detach { .. } => {
                self.detach(view);
            }
        }
    }

    fn acknowledge(&self, view: ViewId, key: &PropertyKey) {
        self.locked(|st| {
            let Ok(Some(value)) = st.store.get(key.object(), key.name()) else {
                return;
            };
            let seq = st.property_seq.get(key).copied().unwrap_or(0);
            st.send(
                view,
                ToView::Ack {
                    object_id: key.object(),
                    property: key.name().to_string(),
                    value,
                    seq,
                },
            );
        });
    }

    fn reject(&self, view: ViewId, key: &PropertyKey, err: &SyncError) {
        self.locked(|st| {
            let value = st.store.get(key.object(), key.name()).ok().flatten();
            st.send(
                view,
                ToView::Rejected {
                    object_id: key.object(),
                    property: key.name().to_string(),
                    value,
                    reason: err.to_string(),
                },
            );
        });
    }

    // -------------------------------------------------------------------------
    // Pass machinery
    // -------------------------------------------------------------------------

    /// Run `f` under the state lock, then drop collected garbage unlocked.
    fn locked<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut state = self.inner.state.lock();
        let result = f(&mut state);
        let garbage = std::mem::take(&mut state.garbage);
        drop(state);
        drop(garbage);
        result
    }

    /// Read-only access for diagnostics.
    pub(crate) fn inspect<R>(&self, f: impl FnOnce(&SessionState) -> R) -> R {
        let state = self.inner.state.lock();
        f(&state)
    }

    fn with_pass<R>(&self, op: impl FnOnce(&mut SessionState) -> Result<R>) -> Result<R> {
        let _gate = self.inner.gate.lock();
        let _perf = PerfSpan::new("propagation pass");
        let (outermost, result) = self.locked(|st| {
            let outermost = st.pass.is_none();
            if outermost {
                st.pass = Some(ActivePass::default());
            }
            (outermost, op(st))
        });
        if outermost {
            self.run_callbacks();
            self.locked(|st| {
                if let Some(pass) = st.pass.take() {
                    tracing::trace!(target: targets::BINDING, hops = pass.visited.hops(), "pass settled");
                }
            });
        }
        result
    }

    /// Deliver queued events until the pass has nothing left to report.
    fn run_callbacks(&self) {
        loop {
            let batch: Vec<(Event, Vec<(SubscriptionId, Callback)>)> = self.locked(|st| {
                let events: Vec<Event> = match st.pass.as_mut() {
                    Some(pass) => pass.pending.drain(..).collect(),
                    None => Vec::new(),
                };
                events
                    .into_iter()
                    .map(|event| {
                        let callbacks = st.dispatcher.callbacks_for(&event.key());
                        (event, callbacks)
                    })
                    .collect()
            });
            if batch.is_empty() {
                break;
            }
            for (event, callbacks) in batch {
                for (id, callback) in callbacks {
                    if let Err(failure) = event::invoke(id, &callback, &event) {
                        self.report_failure(failure);
                    }
                }
            }
        }
    }

    fn report_failure(&self, failure: CallbackFailure) {
        tracing::error!(
            target: targets::EVENT,
            object = ?failure.event.object,
            event = %failure.event.name,
            error = %failure.message,
            "callback failed"
        );
        let error_event = &self.inner.config.error_event;
        // A failing error handler is only logged.
        if failure.event.name == *error_event {
            return;
        }
        let key = PropertyKey::new(failure.event.object, error_event.clone());
        let declared = self.inspect(|st| {
            matches!(
                st.store.member_kind(key.object(), key.name()),
                Ok(MemberKind::Trigger)
            )
        });
        if declared {
            let _ = self.fire_with_origin(key, Value::from(failure.to_string()), Origin::Backend);
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Session")
            .field("objects", &state.store.object_count())
            .field("bindings", &state.bindings.binding_count())
            .field("views", &state.views.view_count())
            .field("subscriptions", &state.dispatcher.len())
            .finish()
    }
}

impl SessionState {
    fn visit(&mut self, key: &PropertyKey) -> bool {
        self.pass
            .as_mut()
            .map_or(true, |pass| pass.visited.visit(key))
    }

    fn has_visited(&self, key: &PropertyKey) -> bool {
        self.pass
            .as_ref()
            .is_some_and(|pass| pass.visited.has_visited(key))
    }

    fn queue_event(&mut self, event: Event) {
        if let Some(pass) = self.pass.as_mut() {
            pass.pending.push_back(event);
        }
    }

    fn propagate(&mut self, key: PropertyKey, value: Value, origin: Origin) -> Result<bool> {
        let current = self.store.get(key.object(), key.name())?;

        if self.has_visited(&key) {
            if current.as_ref() == Some(&value) {
                return Ok(false);
            }
            self.store.set_silent(key.object(), key.name(), value.clone())?;
            tracing::trace!(target: targets::BINDING, %key, %value, "reentrant write stored without propagation");
            self.publish(&key, &value, origin, true);
            return Ok(true);
        }

        let root = key.clone();
        let mut changed = false;
        let mut stack = vec![(key, value)];
        while let Some((key, value)) = stack.pop() {
            if !self.visit(&key) {
                tracing::trace!(target: targets::BINDING, %key, "value dropped at visited pair");
                continue;
            }
            let previous = match self.store.replace(key.object(), key.name(), value.clone()) {
                Ok(SetOutcome::Changed { previous }) => previous,
                Ok(SetOutcome::Unchanged) => continue,
                Err(err) => {
                    tracing::warn!(target: targets::BINDING, %key, error = %err, "binding target unavailable");
                    continue;
                }
            };
            if key == root {
                changed = true;
            }
            tracing::trace!(target: targets::BINDING, %key, %value, %origin, "propagation hop");
            self.publish(&key, &value, origin, key == root);
            self.queue_event(Event::change(&key, value.clone(), previous, origin));
            for target in self.bindings.targets_of(&key).into_iter().rev() {
                stack.push((target, value.clone()));
            }
        }
        Ok(changed)
    }

    fn fire(&mut self, key: PropertyKey, payload: Value, origin: Origin) -> Result<()> {
        if self.store.member_kind(key.object(), key.name())? != MemberKind::Trigger {
            return Err(SyncError::not_a_trigger(key.object(), key.name()));
        }
        tracing::trace!(target: targets::EVENT, %key, %origin, "trigger fired");
        for view in self.views.views_of(key.object()) {
            if origin.view() == Some(view) {
                continue;
            }
            self.send(
                view,
                ToView::Event {
                    object_id: key.object(),
                    event: key.name().to_string(),
                    payload: payload.clone(),
                    origin,
                },
            );
        }
        self.queue_event(Event::interaction(&key, payload, origin));
        Ok(())
    }

    /// Fan a changed value out to the object's views.
    ///
    /// With `written_by_origin` the origin view already shows `value` and is
    /// skipped; pairs reached through bindings go to every view.
    fn publish(&mut self, key: &PropertyKey, value: &Value, origin: Origin, written_by_origin: bool) {
        self.seq += 1;
        let seq = self.seq;
        self.property_seq.insert(key.clone(), seq);
        for view in self.views.views_of(key.object()) {
            if written_by_origin && origin.view() == Some(view) && !self.echo_to_origin {
                continue;
            }
            if self.views.needs_resync(view) {
                self.send_snapshot(view);
                continue;
            }
            self.send(
                view,
                ToView::Diff {
                    object_id: key.object(),
                    property: key.name().to_string(),
                    value: value.clone(),
                    origin,
                    seq,
                },
            );
        }
    }

    fn send(&mut self, view: ViewId, message: ToView) {
        match self.views.deliver(view, message) {
            Delivery::Sent | Delivery::Unknown => {}
            Delivery::Full => {
                tracing::warn!(target: targets::CHANNEL, %view, "view queue full; message dropped, snapshot scheduled")
            }
            Delivery::Disconnected => {
                tracing::warn!(target: targets::CHANNEL, %view, "view unreachable; detaching");
                self.detach_view(view);
            }
        }
    }

    fn send_snapshot(&mut self, view: ViewId) {
        let Some(object) = self.views.object_of(view) else {
            return;
        };
        let Ok(properties) = self.store.snapshot(object) else {
            return;
        };
        let message = ToView::Snapshot {
            object_id: object,
            properties,
            seq: self.seq,
        };
        match self.views.deliver(view, message) {
            Delivery::Sent => self.views.clear_resync(view),
            Delivery::Full => {
                tracing::debug!(target: targets::CHANNEL, %view, "snapshot deferred; view queue still full")
            }
            Delivery::Disconnected => {
                tracing::warn!(target: targets::CHANNEL, %view, "view unreachable; detaching");
                self.detach_view(view);
            }
            Delivery::Unknown => {}
        }
    }

    fn detach_view(&mut self, view: ViewId) -> bool {
        let Some((object, outbound)) = self.views.detach(view) else {
            return false;
        };
        let _ = outbound.try_send(ToView::Closed { object_id: object });
        if self.store.is_released(object) && !self.views.has_views(object) {
            let _ = self.destroy(object);
        }
        true
    }

    fn destroy(&mut self, id: ObjectId) -> Result<()> {
        if !self.store.contains(id) {
            return Err(SyncError::UnknownObject(id));
        }
        let unbound = self.bindings.remove_object(id);
        let callbacks = self.dispatcher.remove_object(id);
        self.garbage.extend(callbacks);
        for (_, outbound) in self.views.detach_object(id) {
            let _ = outbound.try_send(ToView::Closed { object_id: id });
        }
        self.store.remove(id);
        self.property_seq.retain(|key, _| key.object() != id);
        tracing::debug!(target: targets::SESSION, ?id, bindings = unbound.len(), "object destroyed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter_on(session: &Session, id: ObjectId, names: &str) -> Arc<AtomicUsize> {
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        session
            .subscribe(id, names, move |_| {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        counter
    }

    #[test]
    fn test_set_and_equality_short_circuit() {
        let session = Session::new();
        let obj = session
            .create_object(ObjectSpec::new("Box").property("value", 0))
            .unwrap();
        let counter = counter_on(&session, obj.id(), "value");

        assert!(session.set(obj.id(), "value", 1).unwrap());
        assert!(!session.set(obj.id(), "value", 1).unwrap());
        assert!(session.set(obj.id(), "value", 2).unwrap());

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(session.get_as::<i64>(obj.id(), "value").unwrap(), Some(2));
    }

    #[test]
    fn test_change_event_carries_previous_value() {
        let session = Session::new();
        let obj = session
            .create_object(ObjectSpec::new("Box").unset_property("value"))
            .unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        session
            .subscribe(obj.id(), "value", move |event| {
                s.lock().push((event.previous.clone(), event.value.clone()));
            })
            .unwrap();

        session.set(obj.id(), "value", "a").unwrap();
        session.set(obj.id(), "value", "b").unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                (None, Value::from("a")),
                (Some(Value::from("a")), Value::from("b")),
            ]
        );
    }

    #[test]
    fn test_mirror_cycle_terminates() {
        let session = Session::new();
        let a = session
            .create_object(ObjectSpec::new("A").property("x", 1))
            .unwrap();
        let b = session
            .create_object(ObjectSpec::new("B").property("y", 0))
            .unwrap();
        session
            .bind(b.id(), "y", a.id(), "x", BindMode::Mirror)
            .unwrap();
        assert_eq!(b.get("y").unwrap(), Some(Value::Int(1)));

        let a_events = counter_on(&session, a.id(), "x");
        let b_events = counter_on(&session, b.id(), "y");
        b.set("y", 9).unwrap();

        assert_eq!(a.get("x").unwrap(), Some(Value::Int(9)));
        assert_eq!(a_events.load(Ordering::SeqCst), 1);
        assert_eq!(b_events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_write_to_visited_pair_is_stored_silently() {
        let session = Session::new();
        let obj = session
            .create_object(ObjectSpec::new("Clamp").property("value", 0))
            .unwrap();
        let id = obj.id();
        let s = session.clone();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        session
            .subscribe(id, "value", move |event| {
                c.fetch_add(1, Ordering::SeqCst);
                if event.value.as_i64().unwrap_or(0) > 10 {
                    s.set(id, "value", 10).unwrap();
                }
            })
            .unwrap();

        session.set(id, "value", 50).unwrap();
        assert_eq!(session.get_as::<i64>(id, "value").unwrap(), Some(10));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_write_to_other_object_joins_pass() {
        let session = Session::new();
        let source = session
            .create_object(ObjectSpec::new("Src").property("value", 0))
            .unwrap();
        let mirror = session
            .create_object(ObjectSpec::new("Dst").property("value", 0))
            .unwrap();
        let s = session.clone();
        let dst = mirror.id();
        session
            .subscribe(source.id(), "value", move |event| {
                s.set(dst, "value", event.value.clone()).unwrap();
            })
            .unwrap();
        let dst_events = counter_on(&session, dst, "value");

        source.set("value", 4).unwrap();
        assert_eq!(mirror.get("value").unwrap(), Some(Value::Int(4)));
        assert_eq!(dst_events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failing_callback_is_isolated_and_reported() {
        let session = Session::new();
        let obj = session
            .create_object(
                ObjectSpec::new("Box")
                    .property("value", 0)
                    .trigger("write"),
            )
            .unwrap();
        session
            .subscribe(obj.id(), "value", |_| panic!("handler exploded"))
            .unwrap();
        let after = counter_on(&session, obj.id(), "value");
        let reports = Arc::new(Mutex::new(Vec::new()));
        let r = Arc::clone(&reports);
        session
            .subscribe(obj.id(), "write", move |event| {
                r.lock().push(event.value.as_str().unwrap_or_default().to_string());
            })
            .unwrap();

        assert!(obj.set("value", 1).unwrap());
        assert_eq!(obj.get("value").unwrap(), Some(Value::Int(1)));
        assert_eq!(after.load(Ordering::SeqCst), 1);
        let reports = reports.lock();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].contains("handler exploded"));
    }

    #[test]
    fn test_fallible_callback_error_is_reported() {
        let session = Session::new();
        let obj = session
            .create_object(ObjectSpec::new("Box").property("value", 0).trigger("write"))
            .unwrap();
        session
            .subscribe_fallible(obj.id(), "value", |_| Err("rejected".into()))
            .unwrap();
        let reports = counter_on(&session, obj.id(), "write");

        obj.set("value", 3).unwrap();
        assert_eq!(reports.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscribe_validates_names() {
        let session = Session::new();
        let obj = session
            .create_object(ObjectSpec::new("Box").property("value", 0))
            .unwrap();
        assert!(session.subscribe(obj.id(), "value missing", |_| {}).is_err());
        assert!(session.subscribe(obj.id(), "   ", |_| {}).is_err());
        assert_eq!(session.listener_count(obj.id(), "value"), 0);
    }

    #[test]
    fn test_fire_requires_trigger() {
        let session = Session::new();
        let obj = session
            .create_object(ObjectSpec::new("Button").property("label", "ok").trigger("click"))
            .unwrap();
        let clicks = counter_on(&session, obj.id(), "click");

        obj.fire("click", Value::Null).unwrap();
        obj.fire("click", Value::Null).unwrap();
        assert!(matches!(
            obj.fire("label", Value::Null),
            Err(SyncError::NotATrigger { .. })
        ));
        assert_eq!(clicks.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dropping_last_handle_destroys_object() {
        let session = Session::new();
        let obj = session
            .create_object(ObjectSpec::new("Box").property("value", 0))
            .unwrap();
        let id = obj.id();
        let clone = obj.clone();
        drop(obj);
        assert!(session.contains(id));
        drop(clone);
        assert!(!session.contains(id));
    }

    #[test]
    fn test_released_object_lives_until_last_view_detaches() {
        let session = Session::new();
        let obj = session
            .create_object(ObjectSpec::new("Box").property("value", 0))
            .unwrap();
        let id = obj.id();
        let view = session.attach(id).unwrap();
        drop(obj);
        assert!(session.contains(id));

        assert!(session.detach(view.id()));
        assert!(!session.contains(id));
    }

    #[test]
    fn test_callback_holding_handle_does_not_deadlock_on_destroy() {
        let session = Session::new();
        let obj = session
            .create_object(ObjectSpec::new("Box").property("value", 0))
            .unwrap();
        let other = session
            .create_object(ObjectSpec::new("Other").property("value", 0))
            .unwrap();
        let other_id = other.id();
        session
            .subscribe(obj.id(), "value", move |_| {
                let _ = other.get("value");
            })
            .unwrap();

        session.destroy(obj.id()).unwrap();
        // The callback owned the last lease on `other`.
        assert!(!session.contains(other_id));
    }

    #[test]
    fn test_destroy_unbinds_and_keeps_peer_value() {
        let session = Session::new();
        let a = session
            .create_object(ObjectSpec::new("A").property("x", 5))
            .unwrap();
        let b = session
            .create_object(ObjectSpec::new("B").property("y", 0))
            .unwrap();
        session
            .bind(b.id(), "y", a.id(), "x", BindMode::Mirror)
            .unwrap();
        session.destroy(a.id()).unwrap();

        assert_eq!(session.binding_count(), 0);
        assert_eq!(b.get("y").unwrap(), Some(Value::Int(5)));
        assert!(matches!(a.set("x", 1), Err(SyncError::UnknownObject(_))));
    }
}
