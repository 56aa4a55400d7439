//! Logging and debugging facilities for labwidget.
//!
//! This module provides:
//! - Integration with the `tracing` crate for structured logging
//! - A human-readable dump of a session's objects, bindings and views
//! - Performance tracing hooks for propagation passes
//!
//! # Tracing Integration
//!
//! labwidget uses the `tracing` crate for instrumentation. To see logs,
//! install a subscriber in your application:
//!
//! ```ignore
//! tracing_subscriber::fmt()
//!     .with_env_filter("labwidget_core::channel=warn,labwidget_core::binding=trace")
//!     .init();
//! ```
//!
//! Dropped channel messages and unreachable views log at `warn`, callback
//! failures at `error`, and each propagation hop at `trace`.
//!
//! # Debug Visualization
//!
//! ```ignore
//! use labwidget_core::logging::SessionDebug;
//!
//! println!("{}", SessionDebug::new().format(&session));
//! ```

use std::fmt::{self, Write as FmtWrite};

use crate::binding::BindMode;
use crate::object::MemberKind;
use crate::session::Session;

/// Target names for log filtering.
///
/// Use these with `tracing` directives to filter logs by subsystem.
pub mod targets {
    /// Core crate target.
    pub const CORE: &str = "labwidget_core";
    /// Property store target.
    pub const PROPERTY: &str = "labwidget_core::property";
    /// Binding graph and propagation target.
    pub const BINDING: &str = "labwidget_core::binding";
    /// Change channel target.
    pub const CHANNEL: &str = "labwidget_core::channel";
    /// View registry target.
    pub const VIEW: &str = "labwidget_core::view";
    /// Event dispatch target.
    pub const EVENT: &str = "labwidget_core::event";
    /// Session lifecycle target.
    pub const SESSION: &str = "labwidget_core::session";
}

/// Style options for the session dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeStyle {
    /// ASCII characters for tree branches.
    Ascii,
    /// Unicode box-drawing characters.
    #[default]
    Unicode,
}

/// Configuration for [`SessionDebug`] output.
#[derive(Debug, Clone)]
pub struct DebugFormatOptions {
    /// The style of tree visualization.
    pub style: TreeStyle,
    /// Whether to show object IDs.
    pub show_ids: bool,
    /// Whether to list property values.
    pub show_values: bool,
    /// Whether to list attached views per object.
    pub show_views: bool,
    /// Whether to append the binding list.
    pub show_bindings: bool,
}

impl Default for DebugFormatOptions {
    fn default() -> Self {
        Self {
            style: TreeStyle::default(),
            show_ids: true,
            show_values: true,
            show_views: true,
            show_bindings: true,
        }
    }
}

impl DebugFormatOptions {
    /// Object names only.
    pub fn minimal() -> Self {
        Self {
            show_ids: false,
            show_values: false,
            show_views: false,
            show_bindings: false,
            ..Default::default()
        }
    }
}

/// Debug utility for dumping a session's state.
#[derive(Debug, Clone, Default)]
pub struct SessionDebug {
    options: DebugFormatOptions,
}

impl SessionDebug {
    /// Create a dumper with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a dumper with custom options.
    pub fn with_options(options: DebugFormatOptions) -> Self {
        Self { options }
    }

    /// Render the session as a tree of objects.
    pub fn format(&self, session: &Session) -> String {
        let mut output = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_into(session, &mut output);
        output
    }

    fn write_into(&self, session: &Session, out: &mut String) -> fmt::Result {
        session.inspect(|state| {
            let (branch, corner, last) = match self.options.style {
                TreeStyle::Ascii => ("|", "+--", "`--"),
                TreeStyle::Unicode => ("\u{2502}", "\u{251c}\u{2500}\u{2500}", "\u{2514}\u{2500}\u{2500}"),
            };

            let mut ids: Vec<_> = state.store.object_ids().collect();
            ids.sort_by_key(|id| id.as_raw());
            writeln!(
                out,
                "Session ({} objects, {} bindings, {} views):",
                ids.len(),
                state.bindings.binding_count(),
                state.views.view_count()
            )?;
            if ids.is_empty() {
                writeln!(out, "  (empty)")?;
            }

            for (i, id) in ids.iter().enumerate() {
                let is_last = i + 1 == ids.len();
                let connector = if is_last { last } else { corner };
                let indent = if is_last { " " } else { branch };
                let type_name = state.store.type_name(*id).unwrap_or("?");
                write!(out, "{connector} {type_name}")?;
                if self.options.show_ids {
                    write!(out, " [{}]", id.as_raw())?;
                }
                if state.store.is_released(*id) {
                    write!(out, " (released)")?;
                }
                writeln!(out)?;

                if self.options.show_values {
                    for (name, kind) in state.store.members(*id).unwrap_or_default() {
                        match kind {
                            MemberKind::Trigger => writeln!(out, "{indent}     !{name}")?,
                            MemberKind::Property => match state.store.get(*id, &name) {
                                Ok(Some(value)) => writeln!(out, "{indent}     .{name} = {value}")?,
                                _ => writeln!(out, "{indent}     .{name} (unset)")?,
                            },
                        }
                    }
                }
                if self.options.show_views {
                    let views = state.views.views_of(*id);
                    if !views.is_empty() {
                        let list: Vec<String> = views.iter().map(ToString::to_string).collect();
                        writeln!(out, "{indent}     views: {}", list.join(", "))?;
                    }
                }
            }

            if self.options.show_bindings && state.bindings.binding_count() > 0 {
                writeln!(out, "Bindings:")?;
                let mut lines: Vec<String> = state
                    .bindings
                    .iter()
                    .map(|(_, info)| {
                        let arrow = match info.mode {
                            BindMode::Mirror => "<->",
                            BindMode::OneWay => "->",
                        };
                        format!(
                            "  {}.{} {arrow} {}.{}",
                            info.source.object().as_raw(),
                            info.source.name(),
                            info.target.object().as_raw(),
                            info.target.name()
                        )
                    })
                    .collect();
                lines.sort();
                for line in lines {
                    writeln!(out, "{line}")?;
                }
            }
            Ok(())
        })
    }
}

/// A span guard for performance tracing.
///
/// This is useful for tracking the duration of propagation passes.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span.
    ///
    /// The span will be active until the guard is dropped.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::trace_span!(target: "labwidget_core::perf", "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

/// Macros for common tracing patterns.
///
/// These are wrappers around the `tracing` crate macros with consistent
/// target naming.
#[macro_export]
macro_rules! sync_trace {
    ($($arg:tt)*) => {
        tracing::trace!(target: "labwidget_core", $($arg)*)
    };
}

#[macro_export]
macro_rules! sync_debug {
    ($($arg:tt)*) => {
        tracing::debug!(target: "labwidget_core", $($arg)*)
    };
}

#[macro_export]
macro_rules! sync_info {
    ($($arg:tt)*) => {
        tracing::info!(target: "labwidget_core", $($arg)*)
    };
}

#[macro_export]
macro_rules! sync_warn {
    ($($arg:tt)*) => {
        tracing::warn!(target: "labwidget_core", $($arg)*)
    };
}

#[macro_export]
macro_rules! sync_error {
    ($($arg:tt)*) => {
        tracing::error!(target: "labwidget_core", $($arg)*)
    };
}
