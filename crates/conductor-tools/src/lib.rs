//! Tool descriptor cache for the Conductor agent scheduler.
//!
//! Agents may call tools while executing a task. Which tools they see depends
//! on the execution context: the tools a user supplied for one request,
//! unioned with the process-wide system tools.
//!
//! # Main types
//!
//! - [`ToolDescriptor`]: Opaque record of a callable capability.
//! - [`ToolScope`]: The `(username, request_id)` cache key.
//! - [`ToolRegistry`]: Concurrent cache with load, lookup and invalidation.

/// Tool descriptor records.
pub mod descriptor;
/// Per-request tool cache.
pub mod registry;

pub use descriptor::ToolDescriptor;
pub use registry::{ToolRegistry, ToolScope};
