mod api;
mod config;
mod error;
mod logging;
mod manager;
mod poller;
mod progress;
mod session;
mod transport;

pub const APP_NAME: &str = "bluelift";

pub use api::{
    ChunkBody, InitiateBody, InitiateRequest, ResultBody, StatusBody, TaskResult, TaskStatus,
};
pub use config::{
    DEFAULT_CHUNK_SIZE_BYTES, DEFAULT_POLL_INTERVAL_MS, DEFAULT_UPLOAD_FILENAME, UploadConfig,
};
pub use error::{Error, Result};
pub use logging::init_logging;
pub use manager::{Outcome, SessionManager, SubmitOptions};
pub use progress::{ProgressSink, UploadProgress};
pub use session::{AttemptState, UploadAttempt, chunk_count};
pub use transport::{CSRF_HEADER, HttpTransport, HttpTransportConfig, Reply, Transport};
