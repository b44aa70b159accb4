//! The in-process message pipeline.
//!
//! A bounded multi-producer / single-consumer queue decouples ingress
//! latency from persistence latency and gives per-instance FIFO for both
//! persistence and fanout. Every producer enqueues here — the realtime
//! gateway and the REST message endpoint alike; only on enqueue failure
//! (queue full or draft rejected) does the producer process the draft
//! synchronously instead.

mod pipeline;
mod processor;

pub use pipeline::{MessagePipeline, PipelineError, Result, Submission};
pub use processor::MessageProcessor;
