// Device access with platform abstraction
//
// The imaging core talks to devices only through `DeviceAccess`. Each
// platform module provides one implementation; the probes, the redirector and
// the resolver are written once against the trait.

use crate::error::ImagingError;
use regex::Regex;
use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub mod layout;
pub mod probe;
pub mod redirect;
pub mod resolver;

#[cfg(target_os = "linux")]
mod linux;

#[cfg(windows)]
mod windows;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(target_os = "linux")]
pub use linux::LinuxDeviceAccess as PlatformDeviceAccess;

#[cfg(windows)]
pub use windows::WindowsDeviceAccess as PlatformDeviceAccess;

pub use layout::{DiskGeometry, DriveLayout, PartitionRecord, PartitionStyle, StorageDeviceNumber};
pub use redirect::{EncryptedVolumeRedirector, RedirectedSource};
pub use resolver::SourceResolver;

/// Receive buffer size for the drive-layout query
pub const LAYOUT_BUFFER_SIZE: usize = 4096;

/// Bytes read by the exploratory probe of a source
pub const PROBE_READ_SIZE: usize = 1024;

const PHYSICAL_DRIVE_PREFIX: &str = r"\\.\PhysicalDrive";

static PHYSICAL_DRIVE_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:\\\\\.\\)?PHYSICALDRIVE(\d+)$").ok());

/// Control queries issued against an open device handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlQuery {
    Geometry,
    DriveLayout,
    DeviceNumber,
}

impl fmt::Display for ControlQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Geometry => write!(f, "geometry"),
            Self::DriveLayout => write!(f, "drive layout"),
            Self::DeviceNumber => write!(f, "device number"),
        }
    }
}

/// How a source path is sized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Whole disk, sized from its geometry
    Physical,
    /// Volume on one partition, sized from its partition record
    Logical,
}

/// Outcome of the exploratory read of a source
#[derive(Debug)]
pub enum ReadProbe {
    /// The source returned data (possibly zero bytes)
    Readable(usize),
    /// The platform reported that the volume's content is encryption protected
    Encrypted(io::Error),
    /// Any other read failure
    Failed(io::Error),
}

/// Platform seam for every device interaction the imaging core performs.
///
/// Handles are never held across calls: `control` and `probe_read` open the
/// device, perform exactly one operation and release the handle before
/// returning.
pub trait DeviceAccess {
    /// Decide how `path` is sized
    fn kind(&self, path: &str) -> DeviceKind;

    /// Open `path` for shared read access, issue `query` into `buf` and return
    /// the number of response bytes written
    fn control(&self, path: &str, query: ControlQuery, buf: &mut [u8])
    -> Result<usize, ImagingError>;

    /// Open `path` and attempt a single read into `buf`
    fn probe_read(&self, path: &str, buf: &mut [u8]) -> Result<ReadProbe, ImagingError>;

    /// Open `path` for the streaming copy
    fn open_source(&self, path: &str) -> Result<File, ImagingError>;

    /// Free bytes available to the caller on the volume holding `path`
    fn free_space(&self, path: &Path) -> Result<u64, ImagingError>;

    /// Sector size that read offsets on `path` must be a multiple of, `None`
    /// when the handle accepts any offset
    fn sector_alignment(&self, _path: &str) -> Option<u32> {
        None
    }
}

impl<T: DeviceAccess + ?Sized> DeviceAccess for &T {
    fn kind(&self, path: &str) -> DeviceKind {
        (**self).kind(path)
    }

    fn control(
        &self,
        path: &str,
        query: ControlQuery,
        buf: &mut [u8],
    ) -> Result<usize, ImagingError> {
        (**self).control(path, query, buf)
    }

    fn probe_read(&self, path: &str, buf: &mut [u8]) -> Result<ReadProbe, ImagingError> {
        (**self).probe_read(path, buf)
    }

    fn open_source(&self, path: &str) -> Result<File, ImagingError> {
        (**self).open_source(path)
    }

    fn free_space(&self, path: &Path) -> Result<u64, ImagingError> {
        (**self).free_space(path)
    }

    fn sector_alignment(&self, path: &str) -> Option<u32> {
        (**self).sector_alignment(path)
    }
}

/// Physical drive index named by `path`, accepting `\\.\PhysicalDriveN` or
/// `PhysicalDriveN` in any letter case
pub fn physical_drive_number(path: &str) -> Option<u32> {
    PHYSICAL_DRIVE_RE
        .as_ref()?
        .captures(path.trim())
        .and_then(|caps| caps.get(1))
        .and_then(|num| num.as_str().parse::<u32>().ok())
}

/// Whether `path` names a whole physical disk
pub fn is_physical_drive_path(path: &str) -> bool {
    physical_drive_number(path).is_some()
}

/// Device path of physical drive `number`
pub fn physical_drive_path(number: u32) -> String {
    format!("{}{}", PHYSICAL_DRIVE_PREFIX, number)
}

/// Bring user-supplied device names into the `\\.\` namespace:
/// `D:` and `D:\` become `\\.\D:`, a bare `PhysicalDriveN` gets its prefix.
/// Anything else is returned unchanged.
pub fn normalize_device_path(path: &str) -> String {
    let trimmed = path.trim();
    if let Some(number) = physical_drive_number(trimmed) {
        return physical_drive_path(number);
    }

    let letter_root = trimmed.trim_end_matches('\\');
    let bytes = letter_root.as_bytes();
    if bytes.len() == 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return format!(r"\\.\{}", letter_root.to_ascii_uppercase());
    }

    trimmed.to_string()
}

/// Nearest ancestor of `path` (or `path` itself) that exists, used to query
/// the volume a not yet created destination will land on
pub fn existing_ancestor(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    absolute
        .ancestors()
        .find(|candidate| candidate.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_drive_number_repeated_calls() {
        for n in 0..32u32 {
            assert_eq!(physical_drive_number(&physical_drive_path(n)), Some(n));
        }
        assert_eq!(physical_drive_number(r"\\.\C:"), None);
    }

    #[test]
    fn test_physical_drive_number() {
        assert_eq!(physical_drive_number(r"\\.\PhysicalDrive0"), Some(0));
        assert_eq!(physical_drive_number(r"\\.\PhysicalDrive12"), Some(12));
        assert_eq!(physical_drive_number(r"\\.\PHYSICALDRIVE3"), Some(3));
        assert_eq!(physical_drive_number(r"\\.\physicaldrive4"), Some(4));
        assert_eq!(physical_drive_number("PhysicalDrive5"), Some(5));
        assert_eq!(physical_drive_number("PHYSICALDRIVE7"), Some(7));

        assert_eq!(physical_drive_number(r"\\.\C:"), None);
        assert_eq!(physical_drive_number("PhysicalDriveABC"), None);
        assert_eq!(physical_drive_number("Drive5"), None);
        assert_eq!(physical_drive_number(""), None);
        assert_eq!(physical_drive_number("/dev/sda"), None);
    }

    #[test]
    fn test_normalize_device_path() {
        assert_eq!(normalize_device_path("d:"), r"\\.\D:");
        assert_eq!(normalize_device_path(r"E:\"), r"\\.\E:");
        assert_eq!(normalize_device_path(r"\\.\C:"), r"\\.\C:");
        assert_eq!(normalize_device_path("physicaldrive2"), r"\\.\PhysicalDrive2");
        assert_eq!(normalize_device_path(r"\\.\PHYSICALDRIVE1"), r"\\.\PhysicalDrive1");
        assert_eq!(normalize_device_path(r"D:\images\disk.img"), r"D:\images\disk.img");
        assert_eq!(normalize_device_path("/dev/sdb"), "/dev/sdb");
    }

    #[test]
    fn test_existing_ancestor() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("a").join("b").join("image.bin");
        assert_eq!(existing_ancestor(&missing), dir.path());

        let file = dir.path().join("present.bin");
        std::fs::write(&file, b"x").unwrap();
        assert_eq!(existing_ancestor(&file), file);
    }

    #[test]
    fn test_physical_drive_path() {
        assert_eq!(physical_drive_path(0), r"\\.\PhysicalDrive0");
        assert!(is_physical_drive_path(&physical_drive_path(9)));
    }
}
