use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Transport-level failure. Non-2xx responses are not errors at this layer.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error for {url}: {source}")]
    Network {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("invalid url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed bencode: {0}")]
    Bencode(#[from] serde_bencode::Error),
    #[error("artifact has no usable name")]
    MissingName,
}

/// Per-item failures. Caught at the item boundary, logged, and counted against the run budget.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("unsuccessful status code {status} for {url}")]
    HttpStatus { url: String, status: u16 },
    #[error("no listings matched the seed threshold on {0}")]
    NoListings(String),
    #[error("magnet link not found on {0}")]
    LocatorNotFound(String),
    #[error("no content hash in locator {0}")]
    HashNotFound(String),
    #[error("unable to download {url}: {reason}")]
    Download { url: String, reason: String },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: DecodeError,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failure of one labeling request. Counted against the annotation budget.
#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error("annotation request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("annotation service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("reply contained no text")]
    EmptyReply,
    #[error("reply is not a JSON array: {0}")]
    Parse(#[from] serde_json::Error),
}
