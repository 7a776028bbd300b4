//! Extraction invocation
//!
//! The core abstraction is the [`ExtractionInvoker`] trait: one call maps an
//! extractor name and a batch of payloads to per-task output lists. Two
//! implementations are provided:
//!
//! - [`LocalInvoker`]: [`Extractor`] trait objects compiled into the agent,
//!   run on the blocking thread pool
//! - [`ProcessInvoker`]: extractor modules installed as executables, one
//!   child process per batch
//!
//! Both classify failures the same way. A routine that reports an error
//! yields [`ExtractionError::Failed`](crate::error::ExtractionError::Failed);
//! a routine that panics, is killed, times out, or is interrupted by shutdown
//! yields [`ExtractionError::WorkerCrashed`](crate::error::ExtractionError::WorkerCrashed).

mod local;
mod process;
mod traits;

pub use local::LocalInvoker;
pub use process::ProcessInvoker;
pub use traits::{BatchOutputs, ExtractionInvoker, Extractor};
