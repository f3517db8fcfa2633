//! Asynchronous chunk write pipeline.
//!
//! One [`process`](ChunkProcessor::process) call drains one inbound chunk:
//! it awaits rate-limiter allowance, reads the request body in small
//! bursts, CRCs what it read, appends to the target file and advances the
//! persistent counters. The outcome, success or a typed error, reaches the
//! caller through a completion listener, invoked exactly once.

mod error;
mod listener;
mod processor;

pub use error::ProcessError;
pub use listener::{oneshot_listener, CompletionListener};
pub use processor::{ChunkProcessor, ProcessorSettings, WRITE_BUFFER_SIZE};
