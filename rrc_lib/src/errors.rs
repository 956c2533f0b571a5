/** ------------------------------------------------------------
 * Error types raised by this lib.
 * ------------------------------------------------------------- */
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RrcError {
    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("Writing dataframe failed: {0}")]
    Polars(#[from] polars::error::PolarsError),
    #[error("Reading capture failed: {0}")]
    Pcap(#[from] pcap::Error),
    #[error("JSON conversion failed: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unknown profile type {0:?} (expected T3G, LTE or WIFI)")]
    UnknownProfileType(String),
    #[error("Unsupported capture link type {0}")]
    UnsupportedLinkType(i32),
    #[error("Packet {index} could not be decoded: {reason}")]
    MalformedPacket { index: usize, reason: String },
}
