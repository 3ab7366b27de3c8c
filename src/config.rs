// Immutable run configuration, built once at startup

use std::path::PathBuf;

pub const DEFAULT_BLOCK_SIZE_MIB: u32 = 16;
pub const MAX_BLOCK_SIZE_MIB: u32 = 64;
const MIB: usize = 1024 * 1024;

/// Everything an imaging run needs from the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagingConfig {
    /// Device or file to image
    pub source: String,
    /// File receiving the image; created when absent, never truncated
    pub destination: PathBuf,
    /// Copy chunk size in MiB, within `1..=MAX_BLOCK_SIZE_MIB`
    pub block_size_mib: u32,
    /// Bytes to skip at the start of the source
    pub seek: u64,
    /// Bytes to leave untouched at the start of the destination
    pub skip: u64,
    /// Render a progress bar
    pub progress: bool,
}

impl ImagingConfig {
    pub fn new(
        source: &str,
        destination: impl Into<PathBuf>,
        block_size_mib: u32,
        seek: u64,
        skip: u64,
        progress: bool,
    ) -> Self {
        Self {
            source: Self::device_name(source),
            destination: destination.into(),
            block_size_mib: block_size_mib.clamp(1, MAX_BLOCK_SIZE_MIB),
            seek,
            skip,
            progress,
        }
    }

    /// Bytes read and written per iteration of the copy loop
    pub fn chunk_size(&self) -> usize {
        self.block_size_mib as usize * MIB
    }

    #[cfg(windows)]
    fn device_name(source: &str) -> String {
        crate::disk::normalize_device_path(source)
    }

    #[cfg(not(windows))]
    fn device_name(source: &str) -> String {
        source.to_string()
    }
}
