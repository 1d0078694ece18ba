//! Capture description types
//!
//! Everything the client ships to the capture service when a session
//! starts: the target process, its module snapshot, and the selection of
//! functions, tracepoints, and user regions to instrument. These types are
//! built by the caller (usually from a symbol-resolution pass that is not
//! this crate's concern) and consumed by value when a session begins.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ============================================================================
// Target description
// ============================================================================

/// The process a capture session attaches to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub command_line: Option<String>,
}

impl ProcessInfo {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
            command_line: None,
        }
    }
}

/// One loaded module in the target's address space.
///
/// `load_bias` is the offset between link-time and runtime addresses;
/// the service needs it to translate instrumented addresses back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleInfo {
    pub path: String,
    pub build_id: String,
    pub load_bias: u64,
    pub address_start: u64,
    pub address_end: u64,
}

// ============================================================================
// Selection
// ============================================================================

/// A function selected for dynamic instrumentation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionInfo {
    pub name: String,
    pub module_path: String,
    pub address: u64,
    pub size: u64,
}

/// A kernel tracepoint selected for capture, addressed by category and name
/// (e.g. `sched:sched_switch`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TracepointInfo {
    pub category: String,
    pub name: String,
}

impl TracepointInfo {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
        }
    }
}

/// A user-defined capture region bracketed by two instrumented functions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRegion {
    pub label: String,
    pub begin_function_id: u64,
    pub end_function_id: u64,
}

/// The caller-specified set of things to instrument for one session.
///
/// Functions are keyed by a caller-assigned unique id; the service echoes
/// that id back in `FunctionCall` events so the client side never has to
/// re-resolve addresses. Immutable once a session starts.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SelectionSet {
    pub functions: HashMap<u64, FunctionInfo>,
    pub tracepoints: Vec<TracepointInfo>,
    pub regions: Vec<UserRegion>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function(mut self, id: u64, function: FunctionInfo) -> Self {
        self.functions.insert(id, function);
        self
    }

    pub fn with_tracepoint(mut self, tracepoint: TracepointInfo) -> Self {
        self.tracepoints.push(tracepoint);
        self
    }

    pub fn with_region(mut self, region: UserRegion) -> Self {
        self.regions.push(region);
        self
    }

    /// True when nothing at all is selected. The service still produces
    /// scheduling and sampling data for an empty selection.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty() && self.tracepoints.is_empty() && self.regions.is_empty()
    }
}

// ============================================================================
// Options
// ============================================================================

/// Capture tuning sent with the start request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureOptions {
    /// Also capture the profiler's own threads (lightweight
    /// self-introspection during capture).
    pub enable_introspection: bool,
    /// Callstack sampling period in microseconds; `None` leaves the
    /// service default in place.
    pub sampling_period_us: Option<u64>,
    /// Collect scheduler slices alongside instrumented functions.
    pub collect_scheduling_info: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            enable_introspection: false,
            sampling_period_us: None,
            collect_scheduling_info: true,
        }
    }
}

impl CaptureOptions {
    pub fn with_introspection(mut self, enabled: bool) -> Self {
        self.enable_introspection = enabled;
        self
    }

    pub fn with_sampling_period_us(mut self, period_us: u64) -> Self {
        self.sampling_period_us = Some(period_us);
        self
    }
}

// ============================================================================
// Start request body
// ============================================================================

/// The complete description of one capture session, serialized into the
/// start request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaptureSpec {
    pub process: ProcessInfo,
    pub modules: Vec<ModuleInfo>,
    pub selection: SelectionSet,
    pub options: CaptureOptions,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn selection_builder_accumulates() {
        let selection = SelectionSet::new()
            .with_function(
                7,
                FunctionInfo {
                    name: "render_frame".to_string(),
                    module_path: "/opt/game/libengine.so".to_string(),
                    address: 0x4f20,
                    size: 512,
                },
            )
            .with_tracepoint(TracepointInfo::new("sched", "sched_switch"))
            .with_region(UserRegion {
                label: "frame".to_string(),
                begin_function_id: 7,
                end_function_id: 7,
            });

        assert!(!selection.is_empty());
        assert_eq!(selection.functions.len(), 1);
        assert_eq!(selection.functions[&7].name, "render_frame");
        assert_eq!(selection.tracepoints[0].category, "sched");
    }

    #[test]
    fn empty_selection_is_empty() {
        assert!(SelectionSet::new().is_empty());
    }

    #[test]
    fn options_default_leaves_sampling_to_service() {
        let options = CaptureOptions::default();
        assert!(!options.enable_introspection);
        assert_eq!(options.sampling_period_us, None);
        assert!(options.collect_scheduling_info);
    }
}
