//! Error types for labwidget.

use std::path::PathBuf;

use crate::object::ObjectId;
use crate::view::ViewId;

/// A specialized Result type for synchronization operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors raised by the synchronization core.
///
/// Conditions that the core treats as soft failures (messages addressed to
/// destroyed objects, unreachable views, cyclic bindings) never surface here;
/// they are logged and dropped at the channel boundary.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The object does not exist or has been destroyed.
    #[error("Unknown or destroyed object {0:?}")]
    UnknownObject(ObjectId),

    /// The object has no member with this name.
    #[error("Object {object:?} has no property or trigger '{name}'")]
    UnknownProperty { object: ObjectId, name: String },

    /// A trigger was used where a stored property is required.
    #[error("'{name}' on {object:?} is a trigger, not a property")]
    NotAProperty { object: ObjectId, name: String },

    /// A property was fired as if it were a trigger.
    #[error("'{name}' on {object:?} is a property, not a trigger")]
    NotATrigger { object: ObjectId, name: String },

    /// The same member name was declared twice on one object.
    #[error("Member '{name}' declared twice")]
    DuplicateMember { name: String },

    /// A binding from a property to itself.
    #[error("Cannot bind '{name}' on {object:?} to itself")]
    SelfBinding { object: ObjectId, name: String },

    /// An identical binding edge already exists.
    #[error("'{target}' is already bound to '{source_name}'")]
    DuplicateBinding { target: String, source_name: String },

    /// The binding id is invalid or already unbound.
    #[error("Invalid or already removed binding")]
    UnknownBinding,

    /// The view id is not attached.
    #[error("View {0} is not attached")]
    UnknownView(ViewId),

    /// A view addressed an object other than the one it displays.
    #[error("View {view} displays {expected:?}, not {got:?}")]
    ViewObjectMismatch {
        view: ViewId,
        expected: ObjectId,
        got: ObjectId,
    },

    /// The inbound queue is full or the backend has gone away.
    #[error("Channel to backend is unavailable: {0}")]
    ChannelClosed(&'static str),

    /// A value could not be converted to the requested type.
    #[error("Type mismatch: expected {expected}, got {got}")]
    TypeMismatch {
        expected: &'static str,
        got: &'static str,
    },

    /// Wire encoding or decoding failed.
    #[error("Wire codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// The configuration could not be parsed.
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    /// The configuration file could not be read.
    #[error("Failed to read configuration '{path}': {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    /// Create an unknown property error.
    pub fn unknown_property(object: ObjectId, name: impl Into<String>) -> Self {
        Self::UnknownProperty {
            object,
            name: name.into(),
        }
    }

    /// Create a not-a-property error.
    pub fn not_a_property(object: ObjectId, name: impl Into<String>) -> Self {
        Self::NotAProperty {
            object,
            name: name.into(),
        }
    }

    /// Create a not-a-trigger error.
    pub fn not_a_trigger(object: ObjectId, name: impl Into<String>) -> Self {
        Self::NotATrigger {
            object,
            name: name.into(),
        }
    }

    /// Create a configuration I/O error.
    pub fn config_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ConfigIo {
            path: path.into(),
            source,
        }
    }
}
