//! Core synchronization systems for labwidget.
//!
//! This crate keeps property values consistent between in-process backend
//! objects, any number of rendered views of those objects, and other objects
//! whose properties are bound together:
//!
//! - **Property Store**: per-object member tables with an equality short-circuit
//! - **Binding Graph**: mirror and one-way edges with cycle-safe propagation
//! - **Change Channel**: bounded, non-blocking queues between backend and views
//! - **View Registry**: which views display which object, with fan-out
//! - **Event Dispatcher**: change and interaction callbacks, once per change
//!
//! Everything hangs off a [`Session`].
//!
//! # Binding Example
//!
//! ```
//! use labwidget_core::{BindMode, ObjectSpec, Session, Value};
//!
//! let session = Session::new();
//! let slider = session.create_object(ObjectSpec::new("Slider").property("value", 3))?;
//! let label = session.create_object(ObjectSpec::new("Label").unset_property("text"))?;
//!
//! // The label follows the slider, starting with the slider's current value.
//! session.bind(label.id(), "text", slider.id(), "value", BindMode::Mirror)?;
//! assert_eq!(label.get("text")?, Some(Value::Int(3)));
//!
//! // Mirror bindings flow back.
//! label.set("text", 7)?;
//! assert_eq!(slider.get("value")?, Some(Value::Int(7)));
//! # Ok::<(), labwidget_core::SyncError>(())
//! ```
//!
//! # View Example
//!
//! ```
//! use labwidget_core::{ObjectSpec, Session, Value, ViewUpdate};
//!
//! let session = Session::new();
//! let obj = session.create_object(ObjectSpec::new("Textbox").property("value", ""))?;
//! let mut first = session.attach(obj.id())?;
//! let mut second = session.attach(obj.id())?;
//!
//! // A user edit in one view reaches the backend and the other view.
//! first.set("value", "hello")?;
//! session.process_pending();
//! assert_eq!(obj.get("value")?, Some(Value::from("hello")));
//! assert!(matches!(second.drain().as_slice(), [ViewUpdate::Changed { .. }]));
//!
//! // The origin only gets an acknowledgement that matches what it shows.
//! assert!(first.drain().is_empty());
//! # Ok::<(), labwidget_core::SyncError>(())
//! ```

pub mod binding;
pub mod channel;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod logging;
pub mod object;
pub mod property;
pub mod session;
pub mod value;
pub mod view;
pub mod wire;

#[cfg(feature = "tokio")]
pub mod pump;

pub use binding::{BindMode, BindingGraph, BindingId, BindingInfo, PropagationPass};
pub use channel::{InboundSender, ToBackend, ToView, ViewLink};
pub use config::SyncConfig;
pub use endpoint::{ViewHandle, ViewUpdate};
pub use error::{Result, SyncError};
pub use event::{
    Callback, CallbackError, CallbackFailure, Event, EventDispatcher, EventKind, Origin,
    SubscriptionGuard, SubscriptionId,
};
pub use logging::{PerfSpan, SessionDebug};
pub use object::{MemberKind, ObjectHandle, ObjectId, ObjectSpec};
pub use property::{PropertyKey, PropertyStore, SetOutcome};
pub use session::Session;
pub use value::{FromValue, Value};
pub use view::{Delivery, ViewId, ViewRegistry};

#[cfg(feature = "tokio")]
pub use pump::{spawn_inbound_pump, InboundPump};
