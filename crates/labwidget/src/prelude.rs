//! Prelude module for labwidget.
//!
//! ```
//! use labwidget::prelude::*;
//! ```
//!
//! This provides access to:
//! - The session and its configuration (`Session`, `SyncConfig`)
//! - Widgets and typed properties (`Widget`, `WidgetBuilder`, `Prop`)
//! - Values and conversions (`Value`, `FromValue`)
//! - Bindings, events and views

// ============================================================================
// Session
// ============================================================================

pub use crate::{Result, Session, SyncConfig, SyncError};

// ============================================================================
// Widgets and Values
// ============================================================================

pub use crate::widget::{Prop, Widget, WidgetBuilder};
pub use crate::{FromValue, ObjectHandle, ObjectId, ObjectSpec, Value};

// ============================================================================
// Bindings and Events
// ============================================================================

pub use crate::{BindMode, BindingId, Event, EventKind, Origin, SubscriptionGuard, SubscriptionId};

// ============================================================================
// Views
// ============================================================================

pub use crate::{ViewHandle, ViewId, ViewUpdate};
