//! Resumable task-iteration loop.
//!
//! Drives an opaque worker command through a JSON backlog, one task per
//! iteration, until the backlog is done or a limit is hit. The architecture
//! enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (selection, attribution, stop
//!   conditions). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (backlog and progress files, process
//!   execution, configuration). Isolated behind small types and traits.
//!
//! Orchestration modules ([`controller`], [`select`], [`status`], [`validate`])
//! coordinate core logic with I/O to implement CLI commands.

pub mod backlog;
pub mod controller;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod select;
pub mod status;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod validate;
