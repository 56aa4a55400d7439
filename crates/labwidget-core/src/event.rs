//! Event dispatch for property changes and interactions.
//!
//! Subscriptions are keyed by `(object, event name)`. The name is either a
//! property, whose subscribers run once per logical change, or a trigger,
//! whose subscribers run every time it is fired.
//!
//! The dispatcher itself only stores callbacks. Delivery happens in the
//! session after its lock is released, so a callback may freely call back
//! into the session; writes issued from a callback join the propagation pass
//! that invoked it.
//!
//! # Key Types
//!
//! - [`Event`] - What a callback receives
//! - [`EventKind`] - Change or interaction
//! - [`Origin`] - Backend or a specific view
//! - [`EventDispatcher`] - Subscription storage
//! - [`SubscriptionGuard`] - RAII unsubscribe
//!
//! # Failure isolation
//!
//! Every callback runs under `catch_unwind`. A panic or an `Err` returned by a
//! fallible callback is turned into a [`CallbackFailure`]; siblings still run
//! and the value that triggered the event stays applied.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use slotmap::{new_key_type, SlotMap};

use crate::object::ObjectId;
use crate::property::PropertyKey;
use crate::session::Session;
use crate::value::Value;
use crate::view::ViewId;

new_key_type! {
    /// A unique identifier for a subscription.
    ///
    /// Use this to unsubscribe a specific callback later.
    pub struct SubscriptionId;
}

/// Where a change or interaction came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Application code on the backend, including binding propagation.
    Backend,
    /// A rendered view.
    View(ViewId),
}

impl Origin {
    /// The originating view, if any.
    pub fn view(self) -> Option<ViewId> {
        match self {
            Self::Backend => None,
            Self::View(id) => Some(id),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend => f.write_str("backend"),
            Self::View(id) => write!(f, "{id}"),
        }
    }
}

// On the wire an origin is either the string "backend" or a numeric view id.
impl Serialize for Origin {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Self::Backend => serializer.serialize_str("backend"),
            Self::View(id) => serializer.serialize_u64(id.as_raw()),
        }
    }
}

impl<'de> Deserialize<'de> for Origin {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            View(u64),
            Named(String),
        }
        match Repr::deserialize(deserializer)? {
            Repr::View(raw) => Ok(Self::View(ViewId::from_raw(raw))),
            Repr::Named(name) if name == "backend" => Ok(Self::Backend),
            Repr::Named(other) => Err(serde::de::Error::custom(format!(
                "unknown origin '{other}'"
            ))),
        }
    }
}

/// The category of an event, fixing the payload shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A property changed. `value` is the new value, `previous` the old one.
    Change,
    /// A trigger fired. `value` is the payload, `previous` is `None`.
    Interaction,
}

/// Delivered to every subscribed callback.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// The object the event belongs to.
    pub object: ObjectId,
    /// Property or trigger name.
    pub name: String,
    /// Change or interaction.
    pub kind: EventKind,
    /// New value, or trigger payload.
    pub value: Value,
    /// Value before the change. `None` for interactions and Unset properties.
    pub previous: Option<Value>,
    /// Who caused the event.
    pub origin: Origin,
}

impl Event {
    pub(crate) fn change(
        key: &PropertyKey,
        value: Value,
        previous: Option<Value>,
        origin: Origin,
    ) -> Self {
        Self {
            object: key.object(),
            name: key.name().to_string(),
            kind: EventKind::Change,
            value,
            previous,
            origin,
        }
    }

    pub(crate) fn interaction(key: &PropertyKey, payload: Value, origin: Origin) -> Self {
        Self {
            object: key.object(),
            name: key.name().to_string(),
            kind: EventKind::Interaction,
            value: payload,
            previous: None,
            origin,
        }
    }

    /// The `(object, name)` this event was raised on.
    pub fn key(&self) -> PropertyKey {
        PropertyKey::new(self.object, self.name.clone())
    }
}

/// Error type a fallible callback may return.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Stored callback form. Infallible callbacks are wrapped to return `Ok`.
pub type Callback = Arc<dyn Fn(&Event) -> std::result::Result<(), CallbackError> + Send + Sync>;

/// A callback that panicked or returned an error.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackFailure {
    /// The subscription whose callback failed.
    pub subscription: SubscriptionId,
    /// The event being delivered.
    pub event: Event,
    /// Panic message or error text.
    pub message: String,
}

impl fmt::Display for CallbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "callback for '{}' on {:?} failed: {}",
            self.event.name, self.event.object, self.message
        )
    }
}

/// Wrap a fallible closure as a stored [`Callback`].
pub fn callback<F>(f: F) -> Callback
where
    F: Fn(&Event) -> std::result::Result<(), CallbackError> + Send + Sync + 'static,
{
    Arc::new(f)
}

struct Subscription {
    object: ObjectId,
    names: Vec<String>,
    callback: Callback,
}

/// Storage for subscriptions, indexed by `(object, name)`.
///
/// Callbacks for one key run in subscription order.
#[derive(Default)]
pub struct EventDispatcher {
    subscriptions: SlotMap<SubscriptionId, Subscription>,
    index: HashMap<PropertyKey, Vec<SubscriptionId>>,
}

impl EventDispatcher {
    /// Create an empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for every name in `names`.
    pub fn add(&mut self, object: ObjectId, names: Vec<String>, callback: Callback) -> SubscriptionId {
        let keys: Vec<PropertyKey> = names
            .iter()
            .map(|name| PropertyKey::new(object, name.clone()))
            .collect();
        let id = self.subscriptions.insert(Subscription {
            object,
            names,
            callback,
        });
        for key in keys {
            self.index.entry(key).or_default().push(id);
        }
        id
    }

    /// Remove one subscription, returning its callback so it can be dropped
    /// outside any lock.
    pub fn remove(&mut self, id: SubscriptionId) -> Option<Callback> {
        let sub = self.subscriptions.remove(id)?;
        for name in &sub.names {
            self.unindex(&PropertyKey::new(sub.object, name.clone()), id);
        }
        Some(sub.callback)
    }

    /// Remove every listener on `(object, name)`.
    ///
    /// A subscription registered for several names keeps its other names.
    pub fn remove_all(&mut self, object: ObjectId, name: &str) -> Vec<Callback> {
        let key = PropertyKey::new(object, name);
        let ids = self.index.remove(&key).unwrap_or_default();
        let mut removed = Vec::new();
        for id in ids {
            let Some(sub) = self.subscriptions.get_mut(id) else {
                continue;
            };
            sub.names.retain(|n| n != name);
            if sub.names.is_empty() {
                if let Some(sub) = self.subscriptions.remove(id) {
                    removed.push(sub.callback);
                }
            }
        }
        removed
    }

    /// Remove every subscription on an object.
    pub fn remove_object(&mut self, object: ObjectId) -> Vec<Callback> {
        let ids: Vec<SubscriptionId> = self
            .subscriptions
            .iter()
            .filter(|(_, sub)| sub.object == object)
            .map(|(id, _)| id)
            .collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Callbacks registered for `key`, in subscription order.
    pub fn callbacks_for(&self, key: &PropertyKey) -> Vec<(SubscriptionId, Callback)> {
        self.index
            .get(key)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| {
                        self.subscriptions
                            .get(*id)
                            .map(|sub| (*id, Arc::clone(&sub.callback)))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of callbacks listening on `key`.
    pub fn listener_count(&self, key: &PropertyKey) -> usize {
        self.index.get(key).map_or(0, Vec::len)
    }

    /// Total number of subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Whether there are no subscriptions.
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    fn unindex(&mut self, key: &PropertyKey, id: SubscriptionId) {
        if let Some(ids) = self.index.get_mut(key) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.index.remove(key);
            }
        }
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("subscriptions", &self.subscriptions.len())
            .field("keys", &self.index.len())
            .finish()
    }
}

/// Split a space-separated list of event names.
pub(crate) fn split_names(names: &str) -> Vec<String> {
    names.split_whitespace().map(str::to_string).collect()
}

/// Run one callback, converting a panic or error into a [`CallbackFailure`].
pub(crate) fn invoke(
    id: SubscriptionId,
    callback: &Callback,
    event: &Event,
) -> std::result::Result<(), CallbackFailure> {
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(event)));
    let message = match outcome {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(err)) => err.to_string(),
        Err(payload) => panic_message(payload.as_ref()),
    };
    Err(CallbackFailure {
        subscription: id,
        event: event.clone(),
        message,
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "callback panicked".to_string()
    }
}

/// A subscription that is removed when the guard is dropped.
///
/// Created by [`Session::subscribe_scoped`].
///
/// ```
/// use labwidget_core::{ObjectSpec, Session};
///
/// let session = Session::new();
/// let obj = session.create_object(ObjectSpec::new("Box").property("value", 0)).unwrap();
/// {
///     let _guard = session.subscribe_scoped(obj.id(), "value", |_| {}).unwrap();
///     assert_eq!(session.listener_count(obj.id(), "value"), 1);
/// }
/// assert_eq!(session.listener_count(obj.id(), "value"), 0);
/// ```
pub struct SubscriptionGuard {
    session: Session,
    id: SubscriptionId,
}

impl SubscriptionGuard {
    pub(crate) fn new(session: Session, id: SubscriptionId) -> Self {
        Self { session, id }
    }

    /// The guarded subscription.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.session.unsubscribe(self.id);
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn object() -> ObjectId {
        let mut ids: SlotMap<ObjectId, ()> = SlotMap::with_key();
        ids.insert(())
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Callback {
        let counter = Arc::clone(counter);
        callback(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_multi_name_subscription() {
        let obj = object();
        let mut dispatcher = EventDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = dispatcher.add(obj, split_names("value  size"), counting(&counter));

        assert_eq!(dispatcher.listener_count(&PropertyKey::new(obj, "value")), 1);
        assert_eq!(dispatcher.listener_count(&PropertyKey::new(obj, "size")), 1);

        assert!(dispatcher.remove(id).is_some());
        assert!(dispatcher.is_empty());
        assert_eq!(dispatcher.listener_count(&PropertyKey::new(obj, "size")), 0);
    }

    #[test]
    fn test_remove_all_keeps_other_names() {
        let obj = object();
        let mut dispatcher = EventDispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));
        dispatcher.add(obj, split_names("value size"), counting(&counter));
        dispatcher.add(obj, split_names("value"), counting(&counter));

        let removed = dispatcher.remove_all(obj, "value");
        assert_eq!(removed.len(), 1);
        assert_eq!(dispatcher.len(), 1);
        assert_eq!(dispatcher.listener_count(&PropertyKey::new(obj, "size")), 1);
    }

    #[test]
    fn test_callbacks_in_subscription_order() {
        let obj = object();
        let mut dispatcher = EventDispatcher::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for tag in 0..3 {
            let order = Arc::clone(&order);
            dispatcher.add(
                obj,
                vec!["value".into()],
                callback(move |_| {
                    order.lock().push(tag);
                    Ok(())
                }),
            );
        }
        let key = PropertyKey::new(obj, "value");
        let event = Event::change(&key, Value::Int(1), None, Origin::Backend);
        for (id, cb) in dispatcher.callbacks_for(&key) {
            invoke(id, &cb, &event).unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_invoke_isolates_panics_and_errors() {
        let obj = object();
        let key = PropertyKey::new(obj, "value");
        let event = Event::interaction(&key, Value::Null, Origin::Backend);
        let mut dispatcher = EventDispatcher::new();
        let id = dispatcher.add(obj, vec!["value".into()], callback(|_| panic!("boom")));
        let failing = callback(|_| Err("bad input".into()));

        let failure = invoke(id, &dispatcher.callbacks_for(&key)[0].1, &event).unwrap_err();
        assert_eq!(failure.message, "boom");
        let failure = invoke(id, &failing, &event).unwrap_err();
        assert_eq!(failure.message, "bad input");
    }

    #[test]
    fn test_origin_wire_form() {
        assert_eq!(serde_json::to_string(&Origin::Backend).unwrap(), r#""backend""#);
        let view = Origin::View(ViewId::from_raw(7));
        assert_eq!(serde_json::to_string(&view).unwrap(), "7");
        assert_eq!(serde_json::from_str::<Origin>("7").unwrap(), view);
        assert_eq!(
            serde_json::from_str::<Origin>(r#""backend""#).unwrap(),
            Origin::Backend
        );
        assert!(serde_json::from_str::<Origin>(r#""elsewhere""#).is_err());
    }
}
