//! certsift ingestion pipeline components.
//!
//! This crate provides the pipeline that turns the upstream CT event stream
//! into rows in the local store.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────┐
//! │ StreamConsumer │  websocket to the CT feed, reconnects forever
//! └───────┬────────┘
//!         │ bounded frame queue
//!         ▼
//! ┌────────────────┐
//! │   Processor    │  schema-tolerant decode, CertRecord batching
//! └───────┬────────┘
//!         │ bounded batch channel
//!         ▼
//! ┌────────────────┐
//! │  StoreWriter   │  per-batch transaction with retry, SQLite
//! └────────────────┘
//! ```
//!
//! The consumer and processor are tokio tasks; the writer runs on its own
//! thread so SQLite work never blocks the async runtime. Both queues are
//! bounded, so a slow store stalls the processor and ultimately the
//! websocket read, which is the intended backpressure.

pub mod error;
pub mod processor;
pub mod store;
pub mod stream;

pub use error::{Error, Result};
pub use processor::{parse_frame, FrameError, Processor};
pub use store::{StoreWriter, WriterConfig};
pub use stream::{StreamConfig, StreamConsumer};
