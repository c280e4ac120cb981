//! Deterministic, pure logic shared by the loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod attribution;
pub mod detector;
pub mod invariants;
pub mod selector;
pub mod types;
