// Windows device backend

use crate::disk::probe::disk_geometry;
use crate::disk::{
    ControlQuery, DeviceAccess, DeviceKind, ReadProbe, existing_ancestor, is_physical_drive_path,
};
use crate::error::ImagingError;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::windows::ffi::OsStrExt;
use std::os::windows::fs::OpenOptionsExt;
use std::os::windows::io::AsRawHandle;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use windows_sys::Win32::Foundation::HANDLE;
use windows_sys::Win32::Storage::FileSystem::{
    FILE_SHARE_READ, FILE_SHARE_WRITE, GetDiskFreeSpaceExW,
};
use windows_sys::Win32::System::IO::DeviceIoControl;
use windows_sys::Win32::System::Ioctl::{
    IOCTL_DISK_GET_DRIVE_GEOMETRY, IOCTL_DISK_GET_DRIVE_LAYOUT_EX, IOCTL_STORAGE_GET_DEVICE_NUMBER,
};

// FSCTL_ALLOW_EXTENDED_DASD_IO = 0x00090083
const FSCTL_ALLOW_EXTENDED_DASD_IO: u32 = 0x00090083;

// Used when a raw device does not report its geometry
const DEFAULT_SECTOR_SIZE: u32 = 512;

// Raw device namespace; plain files have no alignment requirement
const DEVICE_NAMESPACE: &str = r"\\.\";

// HRESULT facility of the full volume encryption driver
const FACILITY_FVE: u32 = 0x31;

pub struct WindowsDeviceAccess;

impl WindowsDeviceAccess {
    pub fn new() -> Self {
        Self
    }

    /// Open a device for shared read access without taking exclusive ownership
    fn open_shared(path: &str) -> io::Result<File> {
        OpenOptions::new()
            .read(true)
            .share_mode(FILE_SHARE_READ | FILE_SHARE_WRITE)
            .open(path)
    }

    fn open_device(path: &str) -> Result<File, ImagingError> {
        Self::open_shared(path).map_err(|source| {
            debug!(
                "Failed to open {}: {} ({})",
                path,
                source,
                Self::os_error_message(&source)
            );
            ImagingError::DeviceOpenError {
                path: path.to_string(),
                source,
            }
        })
    }

    fn control_code(query: ControlQuery) -> u32 {
        match query {
            ControlQuery::Geometry => IOCTL_DISK_GET_DRIVE_GEOMETRY,
            ControlQuery::DriveLayout => IOCTL_DISK_GET_DRIVE_LAYOUT_EX,
            ControlQuery::DeviceNumber => IOCTL_STORAGE_GET_DEVICE_NUMBER,
        }
    }

    /// Lift the volume-boundary checks on a handle so reads near the end of a
    /// volume are not rejected by the file system
    fn enable_extended_dasd_io(file: &File) -> bool {
        let handle = file.as_raw_handle() as HANDLE;
        let mut bytes_returned: u32 = 0;

        let result = unsafe {
            DeviceIoControl(
                handle,
                FSCTL_ALLOW_EXTENDED_DASD_IO,
                std::ptr::null(),
                0,
                std::ptr::null_mut(),
                0,
                &mut bytes_returned,
                std::ptr::null_mut(),
            )
        };

        result != 0
    }

    /// Whether a read failure means the volume is encryption protected
    fn is_encryption_error(e: &io::Error) -> bool {
        if let Some(code) = e.raw_os_error() {
            let facility = ((code as u32) >> 16) & 0x1FFF;
            if facility == FACILITY_FVE {
                return true;
            }
        }
        e.to_string().contains("BitLocker")
    }

    fn os_error_message(e: &io::Error) -> &'static str {
        e.raw_os_error()
            .map(|code| windows_error_message(code as u32))
            .unwrap_or("No OS error code")
    }

    fn wide(path: &Path) -> Vec<u16> {
        path.as_os_str()
            .encode_wide()
            .chain(std::iter::once(0))
            .collect()
    }
}

impl Default for WindowsDeviceAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceAccess for WindowsDeviceAccess {
    fn kind(&self, path: &str) -> DeviceKind {
        if is_physical_drive_path(path) {
            DeviceKind::Physical
        } else {
            DeviceKind::Logical
        }
    }

    fn control(
        &self,
        path: &str,
        query: ControlQuery,
        buf: &mut [u8],
    ) -> Result<usize, ImagingError> {
        let file = Self::open_device(path)?;
        let handle = file.as_raw_handle() as HANDLE;
        let mut bytes_returned: u32 = 0;

        debug!("Issuing {} query on {}", query, path);
        let result = unsafe {
            DeviceIoControl(
                handle,
                Self::control_code(query),
                std::ptr::null(),
                0,
                buf.as_mut_ptr() as *mut _,
                buf.len() as u32,
                &mut bytes_returned,
                std::ptr::null_mut(),
            )
        };

        if result == 0 {
            let source = io::Error::last_os_error();
            debug!(
                "{} query on {} failed: {} ({})",
                query,
                path,
                source,
                Self::os_error_message(&source)
            );
            return Err(ImagingError::QueryFailed {
                query,
                path: path.to_string(),
                source,
            });
        }

        Ok(bytes_returned as usize)
    }

    fn probe_read(&self, path: &str, buf: &mut [u8]) -> Result<ReadProbe, ImagingError> {
        let mut file = Self::open_device(path)?;
        match file.read(buf) {
            Ok(n) => Ok(ReadProbe::Readable(n)),
            Err(e) if Self::is_encryption_error(&e) => Ok(ReadProbe::Encrypted(e)),
            Err(e) => {
                debug!(
                    "Probe read of {} failed: {} ({})",
                    path,
                    e,
                    Self::os_error_message(&e)
                );
                Ok(ReadProbe::Failed(e))
            }
        }
    }

    fn open_source(&self, path: &str) -> Result<File, ImagingError> {
        let file = Self::open_device(path)?;
        if !Self::enable_extended_dasd_io(&file) {
            warn!("Extended DASD I/O not available on {}", path);
        }
        Ok(file)
    }

    fn free_space(&self, path: &Path) -> Result<u64, ImagingError> {
        let dir: PathBuf = existing_ancestor(path);
        let wide = Self::wide(&dir);
        let mut available: u64 = 0;

        let result = unsafe {
            GetDiskFreeSpaceExW(
                wide.as_ptr(),
                &mut available,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };

        if result == 0 {
            return Err(ImagingError::FreeSpaceQueryFailed {
                path: dir.display().to_string(),
                source: io::Error::last_os_error(),
            });
        }
        Ok(available)
    }

    fn sector_alignment(&self, path: &str) -> Option<u32> {
        if !path.starts_with(DEVICE_NAMESPACE) {
            return None;
        }
        match disk_geometry(self, path) {
            Ok(geometry) if geometry.bytes_per_sector > 0 => Some(geometry.bytes_per_sector),
            Ok(_) => Some(DEFAULT_SECTOR_SIZE),
            Err(e) => {
                debug!("Sector size of {} unknown ({}), assuming {}", path, e, DEFAULT_SECTOR_SIZE);
                Some(DEFAULT_SECTOR_SIZE)
            }
        }
    }
}

/// Translate Windows error codes to readable messages
pub fn windows_error_message(code: u32) -> &'static str {
    match code {
        0 => "Operation completed successfully",
        1 => "Incorrect function",
        2 => "The system cannot find the file specified",
        3 => "The system cannot find the path specified",
        5 => "Access is denied",
        6 => "The handle is invalid",
        21 => "The device is not ready",
        23 => "Data error (cyclic redundancy check)",
        32 => "The process cannot access the file because it is in use",
        50 => "The request is not supported",
        87 => "The parameter is incorrect",
        112 => "There is not enough space on the disk",
        122 => "The data area passed to a system call is too small",
        123 => "The filename, directory name, or volume label syntax is incorrect",
        1117 => "The request could not be performed because of an I/O device error",
        0x80310000 => "This drive is locked by BitLocker Drive Encryption",
        _ => "Unknown error code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encryption_error_by_facility() {
        let locked = io::Error::from_raw_os_error(0x80310000u32 as i32);
        assert!(WindowsDeviceAccess::is_encryption_error(&locked));

        let denied = io::Error::from_raw_os_error(5);
        assert!(!WindowsDeviceAccess::is_encryption_error(&denied));
    }

    #[test]
    fn test_encryption_error_by_message() {
        let e = io::Error::other("The drive is protected by BitLocker");
        assert!(WindowsDeviceAccess::is_encryption_error(&e));
        assert!(!WindowsDeviceAccess::is_encryption_error(&io::Error::other("sector not found")));
    }

    #[test]
    fn test_kind_from_path() {
        let access = WindowsDeviceAccess::new();
        assert_eq!(access.kind(r"\\.\PhysicalDrive0"), DeviceKind::Physical);
        assert_eq!(access.kind(r"\\.\C:"), DeviceKind::Logical);
    }

    #[test]
    fn test_plain_files_need_no_alignment() {
        let access = WindowsDeviceAccess::new();
        assert_eq!(access.sector_alignment(r"C:\images\disk.img"), None);
    }

    #[test]
    fn test_windows_error_message() {
        assert_eq!(windows_error_message(5), "Access is denied");
        assert_eq!(windows_error_message(99999), "Unknown error code");
    }
}
