//! Per-kind report writers.
//!
//! Each kind has a small worker pool pulling from a shared queue.  A worker
//! validates and enriches the payload through the identifier cache, marshals
//! the at-rest document, and issues a single create against the store.  A
//! bad envelope never takes a worker down: every drop path logs and returns
//! to the queue.

pub mod eld;
pub mod transponder;
pub mod video;

pub use eld::run_eld_writer;
pub use transponder::run_transponder_writer;
pub use video::run_video_sink;

/// Why a report never reached the store.
#[derive(Debug, PartialEq, Eq)]
pub enum BuildError {
    /// Required identifier fields absent from the payload.
    MissingIdentifiers,
    /// Account ID present but not in the identifier cache.
    UnmappedAccount(String),
    /// Device ID present but not in the identifier cache.
    UnmappedDevice(String),
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::MissingIdentifiers => write!(f, "required identifier fields missing"),
            BuildError::UnmappedAccount(id) => {
                write!(f, "no internal mapping for account {}", id)
            }
            BuildError::UnmappedDevice(id) => {
                write!(f, "no internal mapping for transponder {}", id)
            }
        }
    }
}

/// The report parsed but cannot marshal to a store document.
#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    #[error("dataType is not compatible: {data_type}")]
    NotCompatible { data_type: String },
}
