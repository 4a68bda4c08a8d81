use std::path::PathBuf;

use thiserror::Error;

/// Why a single fetch attempt (or a whole fetch) failed.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("blocked: {0}")]
    Blocked(BlockSignal),

    #[error("HTTP status {0}")]
    Status(u16),

    #[error("gave up on {url} after {attempts} attempts (last: {last})")]
    Exhausted {
        url: String,
        attempts: u32,
        last: Box<FetchError>,
    },
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        FetchError::Network(e.to_string())
    }
}

/// What made a response look like automated-traffic detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockSignal {
    Status(u16),
    Redirect(String),
    Keyword(String),
}

impl std::fmt::Display for BlockSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockSignal::Status(s) => write!(f, "status {s}"),
            BlockSignal::Redirect(to) => write!(f, "redirect to {to}"),
            BlockSignal::Keyword(k) => write!(f, "body matched {k:?}"),
        }
    }
}

/// One listing or field that could not be extracted.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no price in {0:?}")]
    NoPrice(String),

    #[error("price {price} outside {min}..={max}")]
    OutOfBounds { price: u64, min: u64, max: u64 },

    #[error("bad link {0:?}")]
    BadLink(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("insufficient data: {got} samples")]
pub struct InsufficientData {
    pub got: usize,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("decode {path}: {source}")]
    Decode {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("write {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Why the price database refused a record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RejectReason {
    #[error("median {median} below sanity floor {floor}")]
    MedianTooLow { median: u64, floor: u64 },

    #[error("record has no median price")]
    MissingMedian,

    #[error("record has empty model name")]
    MissingModel,
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
