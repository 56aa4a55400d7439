//! Typed widget API on top of the synchronization core.
//!
//! Every [`Widget`] carries two standard members: a `style` property that
//! views apply to their top-level element, and a `write` trigger that views
//! use to show text above the widget. Callback failures are reported through
//! `write` by default, so errors raised while handling a view's input show up
//! next to the widget that caused them.
//!
//! # Example
//!
//! ```
//! use labwidget::prelude::*;
//!
//! let session = Session::new();
//! let slider = Widget::builder("Range").property("value", 50).build(&session)?;
//! let number = Widget::builder("Numberbox").property("value", 0).build(&session)?;
//!
//! let value: Prop<i64> = slider.prop("value")?;
//! number.prop::<i64>("value")?.bind_to(&value, BindMode::Mirror)?;
//! assert_eq!(number.prop::<i64>("value")?.get()?, 50);
//! # Ok::<(), SyncError>(())
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use labwidget_core::{
    BindMode, BindingId, Event, FromValue, MemberKind, ObjectHandle, ObjectId, ObjectSpec,
    Result, Session, SubscriptionId, SyncError, Value, ViewHandle,
};

/// Name of the standard style property.
pub const STYLE: &str = "style";

/// Name of the standard write trigger.
pub const WRITE: &str = "write";

/// A typed handle to one property of a widget.
///
/// Holding a `Prop` keeps the widget's object alive.
pub struct Prop<T> {
    handle: ObjectHandle,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Prop<T> {
    fn clone(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Prop<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prop")
            .field("object", &self.handle.id())
            .field("name", &self.name)
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T> Prop<T>
where
    T: FromValue + Into<Value> + Send + 'static,
{
    /// Create a handle, checking that `name` is a property of the object.
    pub fn new(handle: &ObjectHandle, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let kind = handle
            .session()
            .members(handle.id())?
            .into_iter()
            .find(|(member, _)| *member == name)
            .map(|(_, kind)| kind);
        match kind {
            Some(MemberKind::Property) => Ok(Self {
                handle: handle.clone(),
                name,
                _marker: PhantomData,
            }),
            Some(MemberKind::Trigger) => Err(SyncError::not_a_property(handle.id(), name)),
            None => Err(SyncError::unknown_property(handle.id(), name)),
        }
    }

    /// The object this property belongs to.
    pub fn object(&self) -> ObjectId {
        self.handle.id()
    }

    /// The property name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Read the value. Fails if the property is Unset or holds another type.
    pub fn get(&self) -> Result<T> {
        self.try_get()?.ok_or(SyncError::TypeMismatch {
            expected: std::any::type_name::<T>(),
            got: "unset",
        })
    }

    /// Read the value, with `None` for Unset.
    pub fn try_get(&self) -> Result<Option<T>> {
        self.handle.session().get_as(self.handle.id(), &self.name)
    }

    /// Write the value. Returns `true` if it changed.
    pub fn set(&self, value: T) -> Result<bool> {
        self.handle.set(&self.name, value)
    }

    /// Keep this property in step with `source`, starting from its value.
    pub fn bind_to(&self, source: &Prop<T>, mode: BindMode) -> Result<BindingId> {
        self.handle.session().bind(
            self.handle.id(),
            &self.name,
            source.handle.id(),
            &source.name,
            mode,
        )
    }

    /// Call `callback` with the new value on every change.
    ///
    /// A value that does not convert to `T` counts as a callback failure.
    pub fn on_change<F>(&self, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.handle
            .session()
            .subscribe_fallible(self.handle.id(), &self.name, move |event: &Event| {
                callback(T::from_value(&event.value)?);
                Ok(())
            })
    }
}

/// A widget: an object declared with the standard members.
#[derive(Clone, Debug)]
pub struct Widget {
    handle: ObjectHandle,
}

impl Widget {
    /// Start declaring a widget.
    pub fn builder(type_name: impl Into<String>) -> WidgetBuilder {
        WidgetBuilder::new(type_name)
    }

    /// Wrap an existing object. It must declare `style` and `write`.
    pub fn from_handle(handle: ObjectHandle) -> Result<Self> {
        let members = handle.session().members(handle.id())?;
        for (name, kind) in [(STYLE, MemberKind::Property), (WRITE, MemberKind::Trigger)] {
            if !members.iter().any(|(m, k)| m == name && *k == kind) {
                return Err(SyncError::unknown_property(handle.id(), name));
            }
        }
        Ok(Self { handle })
    }

    /// The underlying object lease.
    pub fn handle(&self) -> &ObjectHandle {
        &self.handle
    }

    /// The object id.
    pub fn id(&self) -> ObjectId {
        self.handle.id()
    }

    /// The owning session.
    pub fn session(&self) -> &Session {
        self.handle.session()
    }

    /// A typed handle to one of the widget's properties.
    pub fn prop<T>(&self, name: &str) -> Result<Prop<T>>
    where
        T: FromValue + Into<Value> + Send + 'static,
    {
        Prop::new(&self.handle, name)
    }

    /// The standard style property.
    pub fn style(&self) -> Result<Prop<Value>> {
        self.prop(STYLE)
    }

    /// Show `text` above the widget in every view.
    pub fn write(&self, text: impl Into<String>) -> Result<()> {
        self.handle.fire(WRITE, text.into())
    }

    /// Listen on a space-separated list of properties and triggers.
    pub fn on<F>(&self, names: &str, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.session().subscribe(self.id(), names, callback)
    }

    /// Remove every listener on each space-separated name.
    pub fn off(&self, names: &str) -> usize {
        names
            .split_whitespace()
            .map(|name| self.session().unsubscribe_all(self.id(), name))
            .sum()
    }

    /// Create a new view of the widget.
    pub fn render(&self) -> Result<ViewHandle> {
        self.session().attach(self.id())
    }
}

/// Builder for [`Widget`].
#[derive(Debug, Clone)]
pub struct WidgetBuilder {
    spec: ObjectSpec,
    style: Option<BTreeMap<String, Value>>,
}

impl WidgetBuilder {
    /// Start a widget of the given type name.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            spec: ObjectSpec::new(type_name),
            style: None,
        }
    }

    /// Initial style entries.
    pub fn style(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.style
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Declare a property with an initial value.
    pub fn property(mut self, name: impl Into<String>, initial: impl Into<Value>) -> Self {
        self.spec = self.spec.property(name, initial);
        self
    }

    /// Declare a property that starts Unset.
    pub fn unset_property(mut self, name: impl Into<String>) -> Self {
        self.spec = self.spec.unset_property(name);
        self
    }

    /// Declare a trigger.
    pub fn trigger(mut self, name: impl Into<String>) -> Self {
        self.spec = self.spec.trigger(name);
        self
    }

    /// Create the widget in `session`.
    pub fn build(self, session: &Session) -> Result<Widget> {
        let style = self.style.map_or(Value::Null, Value::Map);
        let spec = self.spec.property(STYLE, style).trigger(WRITE);
        let handle = session.create_object(spec)?;
        Ok(Widget { handle })
    }
}
