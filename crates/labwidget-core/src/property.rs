//! Property store.
//!
//! The store owns every object's member table and is the only place values
//! live. It knows nothing about bindings, views or callbacks: the session
//! calls [`PropertyStore::replace`] and acts on the returned [`SetOutcome`].
//!
//! The equality short-circuit lives here. Writing a value equal to the
//! current one reports [`SetOutcome::Unchanged`] and nothing downstream runs,
//! which is what lets bindings that converge on the same value stop.
//!
//! # Example
//!
//! ```ignore
//! let mut store = PropertyStore::new();
//! let id = store.insert(&ObjectSpec::new("Label").property("value", "a"));
//!
//! assert!(store.replace(id, "value", "a".into())?.is_unchanged());
//! assert!(store.replace(id, "value", "b".into())?.is_changed());
//! ```

use std::collections::BTreeMap;
use std::fmt;

use slotmap::SlotMap;

use crate::error::{Result, SyncError};
use crate::logging::targets;
use crate::object::{MemberKind, MemberSpec, ObjectId, ObjectSpec};
use crate::value::Value;

/// Address of a single member: `(object, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyKey {
    object: ObjectId,
    name: String,
}

impl PropertyKey {
    /// Create a key.
    pub fn new(object: ObjectId, name: impl Into<String>) -> Self {
        Self {
            object,
            name: name.into(),
        }
    }

    /// The object part of the key.
    pub fn object(&self) -> ObjectId {
        self.object
    }

    /// The member name part of the key.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}.{}", self.object, self.name)
    }
}

/// Result of a write against the store.
#[derive(Debug, Clone, PartialEq)]
pub enum SetOutcome {
    /// The new value equals the stored one; nothing was written.
    Unchanged,
    /// The value was written. `previous` is `None` when the property was Unset.
    Changed {
        /// The value before the write.
        previous: Option<Value>,
    },
}

impl SetOutcome {
    /// Returns `true` for [`SetOutcome::Changed`].
    pub fn is_changed(&self) -> bool {
        matches!(self, Self::Changed { .. })
    }

    /// Returns `true` for [`SetOutcome::Unchanged`].
    pub fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged)
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Property(Option<Value>),
    Trigger,
}

impl Slot {
    fn kind(&self) -> MemberKind {
        match self {
            Self::Property(_) => MemberKind::Property,
            Self::Trigger => MemberKind::Trigger,
        }
    }
}

#[derive(Debug)]
struct ObjectData {
    type_name: String,
    members: BTreeMap<String, Slot>,
    /// Every handle has been dropped; destruction waits for the last view.
    released: bool,
}

/// Arena of objects and their member values.
#[derive(Debug, Default)]
pub struct PropertyStore {
    objects: SlotMap<ObjectId, ObjectData>,
}

impl PropertyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            objects: SlotMap::with_key(),
        }
    }

    /// Create an object from a validated spec.
    pub fn insert(&mut self, spec: &ObjectSpec) -> ObjectId {
        let members = spec
            .members
            .iter()
            .map(|(name, member)| {
                let slot = match member {
                    MemberSpec::Property(initial) => Slot::Property(initial.clone()),
                    MemberSpec::Trigger => Slot::Trigger,
                };
                (name.clone(), slot)
            })
            .collect();
        let id = self.objects.insert(ObjectData {
            type_name: spec.type_name.clone(),
            members,
            released: false,
        });
        tracing::trace!(target: targets::PROPERTY, ?id, type_name = %spec.type_name, "registered object");
        id
    }

    /// Remove an object, returning its last property values.
    pub fn remove(&mut self, id: ObjectId) -> Option<BTreeMap<String, Value>> {
        self.objects.remove(id).map(|data| {
            data.members
                .into_iter()
                .filter_map(|(name, slot)| match slot {
                    Slot::Property(Some(v)) => Some((name, v)),
                    _ => None,
                })
                .collect()
        })
    }

    /// Check if an object exists.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Number of live objects.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// All live object ids.
    pub fn object_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.objects.keys()
    }

    /// The diagnostic type name of an object.
    pub fn type_name(&self, id: ObjectId) -> Result<&str> {
        self.data(id).map(|d| d.type_name.as_str())
    }

    /// What kind of member `name` is.
    pub fn member_kind(&self, id: ObjectId, name: &str) -> Result<MemberKind> {
        self.slot(id, name).map(Slot::kind)
    }

    /// Names of all members in sorted order, with their kind.
    pub fn members(&self, id: ObjectId) -> Result<Vec<(String, MemberKind)>> {
        Ok(self
            .data(id)?
            .members
            .iter()
            .map(|(name, slot)| (name.clone(), slot.kind()))
            .collect())
    }

    /// Read a property. `Ok(None)` means the property is Unset.
    pub fn get(&self, id: ObjectId, name: &str) -> Result<Option<Value>> {
        match self.slot(id, name)? {
            Slot::Property(value) => Ok(value.clone()),
            Slot::Trigger => Err(SyncError::not_a_property(id, name)),
        }
    }

    /// Write a property if the value differs from the stored one.
    pub fn replace(&mut self, id: ObjectId, name: &str, value: Value) -> Result<SetOutcome> {
        let current = self.property_mut(id, name)?;
        if current.as_ref() == Some(&value) {
            return Ok(SetOutcome::Unchanged);
        }
        let previous = current.replace(value);
        Ok(SetOutcome::Changed { previous })
    }

    /// Write a property unconditionally, without reporting a change.
    ///
    /// Used for a reentrant second write to a pair already handled in the
    /// current propagation pass.
    pub fn set_silent(&mut self, id: ObjectId, name: &str, value: Value) -> Result<()> {
        *self.property_mut(id, name)? = Some(value);
        Ok(())
    }

    /// All Set properties of an object. Unset properties are omitted.
    pub fn snapshot(&self, id: ObjectId) -> Result<BTreeMap<String, Value>> {
        Ok(self
            .data(id)?
            .members
            .iter()
            .filter_map(|(name, slot)| match slot {
                Slot::Property(Some(v)) => Some((name.clone(), v.clone())),
                _ => None,
            })
            .collect())
    }

    /// Mark an object as released by application code.
    pub fn mark_released(&mut self, id: ObjectId) -> Result<()> {
        self.data_mut(id)?.released = true;
        Ok(())
    }

    /// Whether every handle on the object has been dropped.
    pub fn is_released(&self, id: ObjectId) -> bool {
        self.objects.get(id).is_some_and(|d| d.released)
    }

    fn data(&self, id: ObjectId) -> Result<&ObjectData> {
        self.objects.get(id).ok_or(SyncError::UnknownObject(id))
    }

    fn data_mut(&mut self, id: ObjectId) -> Result<&mut ObjectData> {
        self.objects.get_mut(id).ok_or(SyncError::UnknownObject(id))
    }

    fn slot(&self, id: ObjectId, name: &str) -> Result<&Slot> {
        self.data(id)?
            .members
            .get(name)
            .ok_or_else(|| SyncError::unknown_property(id, name))
    }

    fn property_mut(&mut self, id: ObjectId, name: &str) -> Result<&mut Option<Value>> {
        match self
            .data_mut(id)?
            .members
            .get_mut(name)
            .ok_or_else(|| SyncError::unknown_property(id, name))?
        {
            Slot::Property(value) => Ok(value),
            Slot::Trigger => Err(SyncError::not_a_property(id, name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_label() -> (PropertyStore, ObjectId) {
        let mut store = PropertyStore::new();
        let id = store.insert(
            &ObjectSpec::new("Label")
                .property("value", "hello")
                .unset_property("tooltip")
                .trigger("click"),
        );
        (store, id)
    }

    #[test]
    fn test_replace_detects_change() {
        let (mut store, id) = store_with_label();

        assert_eq!(
            store.replace(id, "value", "hello".into()).unwrap(),
            SetOutcome::Unchanged
        );
        assert_eq!(
            store.replace(id, "value", "world".into()).unwrap(),
            SetOutcome::Changed {
                previous: Some("hello".into())
            }
        );
        assert_eq!(store.get(id, "value").unwrap(), Some("world".into()));
    }

    #[test]
    fn test_unset_to_set_transition() {
        let (mut store, id) = store_with_label();
        assert_eq!(store.get(id, "tooltip").unwrap(), None);

        let outcome = store.replace(id, "tooltip", Value::Null).unwrap();
        assert_eq!(outcome, SetOutcome::Changed { previous: None });
        assert_eq!(store.get(id, "tooltip").unwrap(), Some(Value::Null));
    }

    #[test]
    fn test_trigger_is_not_readable() {
        let (mut store, id) = store_with_label();
        assert!(matches!(
            store.get(id, "click"),
            Err(SyncError::NotAProperty { .. })
        ));
        assert!(matches!(
            store.replace(id, "click", Value::Null),
            Err(SyncError::NotAProperty { .. })
        ));
        assert_eq!(store.member_kind(id, "click").unwrap(), MemberKind::Trigger);
    }

    #[test]
    fn test_unknown_member_and_object() {
        let (mut store, id) = store_with_label();
        assert!(matches!(
            store.get(id, "missing"),
            Err(SyncError::UnknownProperty { .. })
        ));
        store.remove(id);
        assert!(matches!(store.get(id, "value"), Err(SyncError::UnknownObject(_))));
        assert!(!store.contains(id));
    }

    #[test]
    fn test_snapshot_omits_unset_and_triggers() {
        let (store, id) = store_with_label();
        let snapshot = store.snapshot(id).unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot["value"], Value::from("hello"));
    }

    #[test]
    fn test_set_silent_overwrites_equal_check() {
        let (mut store, id) = store_with_label();
        store.set_silent(id, "value", "quiet".into()).unwrap();
        assert_eq!(store.get(id, "value").unwrap(), Some("quiet".into()));
    }

    #[test]
    fn test_release_flag() {
        let (mut store, id) = store_with_label();
        assert!(!store.is_released(id));
        store.mark_released(id).unwrap();
        assert!(store.is_released(id));
    }
}
