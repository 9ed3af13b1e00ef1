pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config: {message}")]
    InvalidConfig { message: String },

    #[error("invalid input: {message}")]
    Validation { message: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("upload initiation failed: {message}")]
    Initiation { message: String },

    #[error("chunk {index} upload failed: {message}")]
    ChunkUpload { index: u32, message: String },

    #[error("status poll failed: {message}")]
    PollingTransport { message: String },

    #[error("task failed: {message}")]
    TaskFailure { message: String },
}
