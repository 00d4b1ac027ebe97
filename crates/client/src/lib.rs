//! Client side of the hopper import pipeline.
//!
//! A file is planned, sent to the server whole or in ordered chunks, handed
//! to a processing job and then polled until the job finishes:
//! - [`transport`]: one request per transfer unit, with byte progress
//! - [`session`]: sequential chunk delivery with retries
//! - [`poller`]: job status polling
//! - [`controller`]: the state machine tying them together

pub mod api_client;
pub mod controller;
pub mod error;
pub mod poller;
pub mod session;
pub mod transport;

pub use api_client::{ApiClient, ImportApi};
pub use controller::{CancelHandle, PipelineController, PipelineEvent, PipelineResult, PipelineState};
pub use error::{PipelineError, TransportError};
pub use poller::JobStatusPoller;
pub use session::UploadSession;
pub use transport::{Ack, HttpTransport, TransferUnit, UploadTransport};
