//! labwidget: live widgets whose properties stay in step across views.
//!
//! A widget is a backend object with named properties and triggers. Each time
//! it is rendered a new view is attached, and from then on every property
//! change made in the backend, in any view, or through a binding to another
//! widget reaches every other participant.
//!
//! The heavy lifting lives in [`labwidget_core`]; this crate adds the typed
//! [`Widget`] and [`Prop`] wrappers and re-exports the core API.
//!
//! # Example
//!
//! ```
//! use labwidget::prelude::*;
//!
//! let session = Session::new();
//! let textbox = Widget::builder("Textbox").property("value", "").build(&session)?;
//! let mut view = textbox.render()?;
//!
//! textbox.prop::<String>("value")?.set("hi".to_string())?;
//! view.drain();
//! assert_eq!(view.get("value"), Some(&Value::from("hi")));
//! # Ok::<(), SyncError>(())
//! ```

pub use labwidget_core::*;

pub mod prelude;
pub mod widget;

pub use widget::{Prop, Widget, WidgetBuilder};

static_assertions::assert_impl_all!(Widget: Send, Sync);
static_assertions::assert_impl_all!(Prop<i64>: Send, Sync);
