//! Sinks that drain output queues.
//!
//! The only sink is [`SinkWriter`], which appends records to a
//! newline-delimited JSON file.

mod writer;

pub use writer::{SinkWriter, WriterReport};
