//! Deterministic, pure logic shared by the harvester.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and take the clock as an argument, so every output is
//! reproducible in tests.

pub mod backoff;
pub mod checkpoint;
pub mod identity;
pub mod reconcile;
pub mod types;
