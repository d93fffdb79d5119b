use thiserror::Error;

/// Library error type for focal-frame operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The photo lacks the metadata needed to open the overlay session
    /// (no focal length or no dimensions). Fatal to opening; the message is
    /// suitable for showing to the user.
    #[error("missing photo metadata: {0}")]
    MetadataMissing(String),

    /// One render job failed. The session keeps running; the next state
    /// change retries.
    #[error("render failed: {0}")]
    Render(String),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
