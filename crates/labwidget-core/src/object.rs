//! Stateful objects: identity, declaration and lifetime.
//!
//! An object is a named bag of members. A member is either a **property**,
//! which stores a [`Value`] and notifies on change, or a **trigger**, which
//! carries no value and only fires interaction events (`click`, `write`).
//!
//! Objects are declared with an [`ObjectSpec`] and created through
//! [`Session::create_object`](crate::Session::create_object), which returns an
//! [`ObjectHandle`]. Handles are reference-counted leases: once the last one is
//! dropped the object is destroyed, or, if views still display it, destroyed
//! when its last view detaches.
//!
//! # Key Types
//!
//! - [`ObjectId`] - Stable identifier, also the `object_id` on the wire
//! - [`ObjectSpec`] - Declarative member list used to create an object
//! - [`ObjectHandle`] - Lease that keeps the object alive

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use slotmap::new_key_type;

use crate::error::{Result, SyncError};
use crate::session::Session;
use crate::value::Value;

new_key_type! {
    /// A unique identifier for an object in a [`Session`].
    ///
    /// Ids are never reused for a different object while the session lives;
    /// a destroyed object's id simply stops resolving.
    pub struct ObjectId;
}

impl ObjectId {
    /// Convert the ObjectId to a raw u64 value.
    ///
    /// This is the representation used on the wire.
    #[inline]
    pub fn as_raw(self) -> u64 {
        use slotmap::Key;
        self.data().as_ffi()
    }

    /// Create an ObjectId from a raw u64 value.
    ///
    /// Note: This does not check if the ObjectId exists in any session.
    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self::from(slotmap::KeyData::from_ffi(raw))
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.as_raw())
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        u64::deserialize(deserializer).map(Self::from_raw)
    }
}

/// What kind of member a name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// A stored, bindable value.
    Property,
    /// A value-less event slot.
    Trigger,
}

/// Declaration of a single member.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MemberSpec {
    Property(Option<Value>),
    Trigger,
}

/// A declarative description of an object's members.
///
/// ```
/// use labwidget_core::ObjectSpec;
///
/// let spec = ObjectSpec::new("Textbox")
///     .property("value", "")
///     .property("size", 20)
///     .unset_property("placeholder")
///     .trigger("submit");
/// assert_eq!(spec.member_names().count(), 4);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ObjectSpec {
    pub(crate) type_name: String,
    pub(crate) members: Vec<(String, MemberSpec)>,
}

impl ObjectSpec {
    /// Start a spec. `type_name` is used in diagnostics only.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            members: Vec::new(),
        }
    }

    /// Declare a property with an initial value.
    pub fn property(mut self, name: impl Into<String>, initial: impl Into<Value>) -> Self {
        self.members
            .push((name.into(), MemberSpec::Property(Some(initial.into()))));
        self
    }

    /// Declare a property that starts out Unset.
    pub fn unset_property(mut self, name: impl Into<String>) -> Self {
        self.members.push((name.into(), MemberSpec::Property(None)));
        self
    }

    /// Declare a trigger.
    pub fn trigger(mut self, name: impl Into<String>) -> Self {
        self.members.push((name.into(), MemberSpec::Trigger));
        self
    }

    /// The type name given to [`ObjectSpec::new`].
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Iterate over declared member names in declaration order.
    pub fn member_names(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|(name, _)| name.as_str())
    }

    /// Reject specs that declare a name twice.
    pub(crate) fn validate(&self) -> Result<()> {
        for (i, (name, _)) in self.members.iter().enumerate() {
            if self.members[..i].iter().any(|(other, _)| other == name) {
                return Err(SyncError::DuplicateMember { name: name.clone() });
            }
        }
        Ok(())
    }
}

struct Lease {
    session: Session,
    id: ObjectId,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.session.release(self.id);
    }
}

/// A reference-counted lease on an object.
///
/// Cloning the handle shares the lease. Dropping the last clone releases the
/// object: it is destroyed right away if no view displays it, otherwise when
/// its last view detaches.
#[derive(Clone)]
pub struct ObjectHandle {
    lease: Arc<Lease>,
}

impl ObjectHandle {
    pub(crate) fn new(session: Session, id: ObjectId) -> Self {
        Self {
            lease: Arc::new(Lease { session, id }),
        }
    }

    /// The object's id.
    pub fn id(&self) -> ObjectId {
        self.lease.id
    }

    /// The session that owns the object.
    pub fn session(&self) -> &Session {
        &self.lease.session
    }

    /// Read a property. Shorthand for [`Session::get`].
    pub fn get(&self, name: &str) -> Result<Option<Value>> {
        self.lease.session.get(self.lease.id, name)
    }

    /// Write a property from application code. Shorthand for [`Session::set`].
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<bool> {
        self.lease.session.set(self.lease.id, name, value)
    }

    /// Fire a trigger from application code. Shorthand for [`Session::fire`].
    pub fn fire(&self, name: &str, payload: impl Into<Value>) -> Result<()> {
        self.lease.session.fire(self.lease.id, name, payload)
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("id", &self.lease.id)
            .field("leases", &Arc::strong_count(&self.lease))
            .finish()
    }
}
