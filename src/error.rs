//! Crate-wide error types.
//!
//! Follows two idioms side by side, matching how errors are layered in this
//! codebase: a hand-written enum with manual trait impls for the import-time
//! catalog/MIDI-file boundary (mirroring the old MIDI-import error type this
//! crate grew out of), and `thiserror`-derived enums for engine-internal
//! failures that are genuinely exceptional rather than everyday misses.

use thiserror::Error;

/// Errors raised while loading an instrument catalog file (§6 line format).
#[derive(Debug)]
pub enum CatalogError {
    /// The file could not be read.
    IoError(std::io::Error),
    /// A line didn't match any recognized record type.
    ParseError(String),
    /// The header declared an unsupported catalog version.
    UnsupportedVersion(String),
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::IoError(e) => write!(f, "IO error: {}", e),
            CatalogError::ParseError(e) => write!(f, "catalog parse error: {}", e),
            CatalogError::UnsupportedVersion(e) => write!(f, "unsupported catalog version: {}", e),
        }
    }
}

impl std::error::Error for CatalogError {}

impl From<std::io::Error> for CatalogError {
    fn from(e: std::io::Error) -> Self {
        CatalogError::IoError(e)
    }
}

/// Byte exit codes returned by `Engine::start` on error (§6).
pub mod exit_code {
    pub const NO_TRACKS: u8 = 0xF0;
    pub const NO_OUTPUT_PORTS: u8 = 0xF1;
    pub const NO_CHANNEL_STATE: u8 = 0xF2;
}

/// Resource and protocol failures that are exceptional enough to propagate
/// as `Result` rather than degrade silently (§7: "Resource", part of
/// "Protocol").
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no tracks in MIDI file")]
    NoTracks,
    #[error("no output ports configured")]
    NoOutputPorts,
    #[error("channel state not initialized")]
    NoChannelState,
    #[error("failed to open output port {0}")]
    PortOpenFailed(usize),
}

impl EngineError {
    /// Maps to the byte exit code named in §6.
    pub fn exit_code(&self) -> u8 {
        match self {
            EngineError::NoTracks => exit_code::NO_TRACKS,
            EngineError::NoOutputPorts => exit_code::NO_OUTPUT_PORTS,
            EngineError::NoChannelState => exit_code::NO_CHANNEL_STATE,
            EngineError::PortOpenFailed(_) => exit_code::NO_OUTPUT_PORTS,
        }
    }
}
