// Linux device backend
//
// Block devices and regular files are both accepted as sources. Geometry is
// synthesized from the kernel's size and sector queries; partition layout and
// device-number queries have no equivalent here and report `Unsupported`.

use crate::disk::layout::GEOMETRY_SIZE;
use crate::disk::{
    ControlQuery, DeviceAccess, DeviceKind, DiskGeometry, ReadProbe, existing_ancestor,
};
use crate::error::ImagingError;
use std::ffi::CString;
use std::fs::File;
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use tracing::debug;

// _IOR(0x12, 114, size_t)
const BLKGETSIZE64: libc::c_ulong = 0x80081272;
// _IO(0x12, 104)
const BLKSSZGET: libc::c_ulong = 0x1268;

// DISK_GEOMETRY media type for fixed hard disks
const FIXED_MEDIA: u32 = 12;

pub struct LinuxDeviceAccess;

impl LinuxDeviceAccess {
    pub fn new() -> Self {
        Self
    }

    fn open_device(path: &str) -> Result<File, ImagingError> {
        File::open(path).map_err(|source| {
            debug!("Failed to open {}: {}", path, source);
            ImagingError::DeviceOpenError {
                path: path.to_string(),
                source,
            }
        })
    }

    /// Size and logical sector size of an open block device
    fn block_device_size(file: &File) -> io::Result<(u64, u32)> {
        let fd = file.as_raw_fd();
        let mut size: u64 = 0;
        let mut sector: libc::c_int = 0;

        if unsafe { libc::ioctl(fd, BLKGETSIZE64 as _, &mut size as *mut u64) } < 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::ioctl(fd, BLKSSZGET as _, &mut sector as *mut libc::c_int) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok((size, sector.max(1) as u32))
    }

    /// Geometry whose capacity is exactly `size`: one track of whole sectors
    /// when possible, otherwise one byte per "cylinder"
    fn synthesize_geometry(size: u64, bytes_per_sector: u32) -> Option<DiskGeometry> {
        let sectors = size / bytes_per_sector as u64;
        match u32::try_from(sectors) {
            Ok(sectors_per_track) if sectors * bytes_per_sector as u64 == size => {
                Some(DiskGeometry {
                    cylinders: 1,
                    media_type: FIXED_MEDIA,
                    tracks_per_cylinder: 1,
                    sectors_per_track,
                    bytes_per_sector,
                })
            }
            _ => Some(DiskGeometry {
                cylinders: i64::try_from(size).ok()?,
                media_type: FIXED_MEDIA,
                tracks_per_cylinder: 1,
                sectors_per_track: 1,
                bytes_per_sector: 1,
            }),
        }
    }

    fn geometry(path: &str) -> Result<DiskGeometry, ImagingError> {
        let file = Self::open_device(path)?;
        let query_failed = |source: io::Error| ImagingError::QueryFailed {
            query: ControlQuery::Geometry,
            path: path.to_string(),
            source,
        };

        let metadata = file.metadata().map_err(query_failed)?;
        let (size, bytes_per_sector) = if metadata.file_type().is_block_device() {
            Self::block_device_size(&file).map_err(query_failed)?
        } else {
            (metadata.len(), 1)
        };
        debug!(
            "{} reports {} bytes in {} byte sectors",
            path, size, bytes_per_sector
        );

        Self::synthesize_geometry(size, bytes_per_sector)
            .ok_or_else(|| ImagingError::GeometryOverflow {
                path: path.to_string(),
            })
    }
}

impl Default for LinuxDeviceAccess {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceAccess for LinuxDeviceAccess {
    fn kind(&self, _path: &str) -> DeviceKind {
        DeviceKind::Physical
    }

    fn control(
        &self,
        path: &str,
        query: ControlQuery,
        buf: &mut [u8],
    ) -> Result<usize, ImagingError> {
        match query {
            ControlQuery::Geometry => {
                let bytes = Self::geometry(path)?.to_bytes();
                if buf.len() < GEOMETRY_SIZE {
                    return Err(ImagingError::QueryFailed {
                        query,
                        path: path.to_string(),
                        source: io::Error::other("receive buffer too small"),
                    });
                }
                buf[..GEOMETRY_SIZE].copy_from_slice(&bytes);
                Ok(GEOMETRY_SIZE)
            }
            ControlQuery::DriveLayout | ControlQuery::DeviceNumber => {
                Self::open_device(path)?;
                Err(ImagingError::QueryFailed {
                    query,
                    path: path.to_string(),
                    source: io::Error::from(io::ErrorKind::Unsupported),
                })
            }
        }
    }

    fn probe_read(&self, path: &str, buf: &mut [u8]) -> Result<ReadProbe, ImagingError> {
        let mut file = Self::open_device(path)?;
        match file.read(buf) {
            Ok(n) => Ok(ReadProbe::Readable(n)),
            Err(e) => {
                debug!("Probe read of {} failed: {}", path, e);
                Ok(ReadProbe::Failed(e))
            }
        }
    }

    fn open_source(&self, path: &str) -> Result<File, ImagingError> {
        Self::open_device(path)
    }

    fn free_space(&self, path: &Path) -> Result<u64, ImagingError> {
        let dir = existing_ancestor(path);
        let failed = |source: io::Error| ImagingError::FreeSpaceQueryFailed {
            path: dir.display().to_string(),
            source,
        };

        let c_path = CString::new(dir.as_os_str().as_bytes())
            .map_err(|e| failed(io::Error::new(io::ErrorKind::InvalidInput, e)))?;
        let mut stats: libc::statvfs = unsafe { std::mem::zeroed() };
        if unsafe { libc::statvfs(c_path.as_ptr(), &mut stats) } != 0 {
            return Err(failed(io::Error::last_os_error()));
        }

        Ok(stats.f_bavail as u64 * stats.f_frsize as u64)
    }
}
