// Values shared between the resolver, the imaging engine and the CLI

use crate::disk::RedirectedSource;

/// Device chosen for streaming and the byte offset where the source begins on it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub device_path: String,
    pub base_offset: u64,
}

impl ResolvedSource {
    /// The named path is read as is
    pub fn direct(path: &str) -> Self {
        Self {
            device_path: path.to_string(),
            base_offset: 0,
        }
    }

    pub fn redirected(source: RedirectedSource) -> Self {
        Self {
            device_path: source.device_path,
            base_offset: source.starting_offset,
        }
    }

    pub fn is_redirected(&self) -> bool {
        self.base_offset != 0
    }
}

/// Fully resolved description of one imaging run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyRange {
    pub source_path: String,
    /// Offset of the logical source within `source_path`
    pub source_base_offset: u64,
    /// Extra offset into the source, relative to the base offset
    pub seek: u64,
    /// Offset in the destination where the first byte lands
    pub skip: u64,
    /// Size of the logical source in bytes
    pub total_capacity: u64,
}

impl CopyRange {
    pub fn new(source: &ResolvedSource, seek: u64, skip: u64, total_capacity: u64) -> Self {
        Self {
            source_path: source.device_path.clone(),
            source_base_offset: source.base_offset,
            seek,
            skip,
            total_capacity,
        }
    }

    /// Absolute source position of the first byte to copy
    pub fn source_start(&self) -> Option<u64> {
        self.source_base_offset.checked_add(self.seek)
    }

    /// A redirected source sits inside a larger device, so the copy must stop
    /// at `total_capacity` rather than at end of stream.
    ///
    /// The limit counts bytes copied, not a source position: with a non-zero
    /// `seek` the copy ends at `source_base_offset + seek + total_capacity`,
    /// which is `seek` bytes past the end of the partition.
    pub fn is_bounded(&self) -> bool {
        self.source_base_offset != 0
    }
}

/// Running total of an imaging run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyProgress {
    pub bytes_copied: u64,
}

impl CopyProgress {
    /// Completion ratio in `0.0..=1.0`
    pub fn fraction(&self, total: u64) -> f64 {
        if total == 0 {
            return 0.0;
        }
        (self.bytes_copied as f64 / total as f64).min(1.0)
    }
}

/// Lifecycle of the imaging engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImagingState {
    Idle,
    Copying,
    Completed,
    Failed,
}
