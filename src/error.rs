// Error kinds surfaced by the imaging core
//
// Every probe and copy operation returns one of these; only the binary decides
// whether a failure ends the process.

use crate::disk::ControlQuery;
use std::io;
use thiserror::Error;

/// Errors raised while resolving, sizing or copying a device
#[derive(Error, Debug)]
pub enum ImagingError {
    #[error("failed to open device {path}: {source}")]
    DeviceOpenError {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{query} query rejected by {path}: {source}")]
    QueryFailed {
        query: ControlQuery,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("{query} response from {path} is {actual} bytes, expected at least {expected}")]
    MalformedResponse {
        query: ControlQuery,
        path: String,
        expected: usize,
        actual: usize,
    },

    #[error("partition layout response is malformed: {reason}")]
    MalformedLayout { reason: String },

    #[error("geometry of {path} does not describe a representable capacity")]
    GeometryOverflow { path: String },

    #[error("no partition #{partition_number} in the layout of {device}")]
    NoMatchingPartition {
        device: String,
        partition_number: u32,
    },

    #[error("{path} is encrypted and could not be redirected to its physical device")]
    RedirectionFailed { path: String },

    #[error("source {path} is not readable: {source}")]
    SourceUnreadable {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("could not determine the size of {path}")]
    UnknownCapacity { path: String },

    #[error("failed to query free space for {path}: {source}")]
    FreeSpaceQueryFailed {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("destination has {available} bytes free but the source needs {required}")]
    InsufficientCapacity { available: u64, required: u64 },

    #[error("failed to open destination {path}: {source}")]
    DestinationOpenError {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("source offset {offset} on {path} is not a multiple of its {sector_size} byte sectors")]
    UnalignedSourceOffset {
        path: String,
        offset: u64,
        sector_size: u32,
    },

    #[error("failed to position source at byte {offset}: {source}")]
    SourceSeekError {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("failed to position destination at byte {offset}: {source}")]
    DestinationSeekError {
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("read from source failed after {bytes_copied} bytes: {source}")]
    SourceReadError {
        bytes_copied: u64,
        #[source]
        source: io::Error,
    },

    #[error("write to destination failed after {bytes_copied} bytes: {source}")]
    DestinationWriteError {
        bytes_copied: u64,
        #[source]
        source: io::Error,
    },
}

impl ImagingError {
    /// Bytes that reached the destination before a mid-copy failure
    pub fn bytes_copied(&self) -> Option<u64> {
        match self {
            Self::SourceReadError { bytes_copied, .. }
            | Self::DestinationWriteError { bytes_copied, .. } => Some(*bytes_copied),
            _ => None,
        }
    }
}
