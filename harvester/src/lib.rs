//! Checkpointed scrape-and-store controller.
//!
//! Each scheduled invocation runs one cycle: launch an external scraping agent
//! with bounded retries, reconcile its batch against the durable record
//! snapshot, advance the checkpoint, and leave a session record behind. The
//! architecture enforces a strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (identity, reconcile, checkpoint
//!   transition, backoff). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (atomic files, stores, process
//!   execution, Markdown artifacts). Isolated behind traits for tests.
//!
//! The orchestration module [`cycle`] coordinates core logic with I/O to
//! implement `harvester run`.

pub mod core;
pub mod cycle;
pub mod exit_codes;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
