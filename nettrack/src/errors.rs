use thiserror::Error;

/// Error taxonomy for the flow tracking engine.
///
/// The first five variants are startup-time and fatal: the process cannot
/// run without a successfully attached probe and a valid map handle. The
/// remaining variants are per-record runtime errors, recovered locally by
/// skipping the offending record or operation.
#[derive(Error, Debug)]
pub enum TrackError {
    #[error("Failed to load probe object: {0}")]
    LoadFailure(String),
    #[error("Program not found in probe object: {0}")]
    ProgramNotFound(String),
    #[error("Failed to attach program {program} to {target}: {reason}")]
    AttachFailure {
        program: String,
        target: String,
        reason: String,
    },
    #[error("Map not found in probe object: {0}")]
    MapNotFound(String),
    #[error("Failed to initialize ring buffer {name}: {reason}")]
    RingBufferInitFailure { name: String, reason: String },
    #[error("Malformed record: expected {expected} bytes, got {got}")]
    MalformedRecord { expected: usize, got: usize },
    #[error("Key not found in kernel map")]
    KeyNotFound,
    #[error("Kernel map operation failed: {0}")]
    UpdateFailure(String),
}
