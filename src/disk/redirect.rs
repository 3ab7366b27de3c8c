// Redirection of fully encrypted volumes to their physical device
//
// A locked volume refuses plaintext reads, but the disk underneath it can
// still be read raw. The volume's partition index is looked up in the parent
// disk's layout to find where its bytes start.

use crate::disk::probe::{device_number, find_partition, read_drive_layout};
use crate::disk::{DeviceAccess, physical_drive_path};
use crate::error::ImagingError;
use tracing::{info, warn};

/// Physical device and byte offset that stand in for an encrypted volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectedSource {
    pub device_path: String,
    pub starting_offset: u64,
}

pub struct EncryptedVolumeRedirector<'a, D: DeviceAccess> {
    access: &'a D,
}

impl<'a, D: DeviceAccess> EncryptedVolumeRedirector<'a, D> {
    pub fn new(access: &'a D) -> Self {
        Self { access }
    }

    /// Locate the partition backing `volume` on its physical device.
    ///
    /// Fails with `NoMatchingPartition` when the disk's layout has no record
    /// for the volume's partition index, and propagates probe failures.
    pub fn locate(&self, volume: &str) -> Result<RedirectedSource, ImagingError> {
        let number = device_number(self.access, volume)?;
        let device_path = physical_drive_path(number.device_number);
        let layout = read_drive_layout(self.access, &device_path)?;

        let record = find_partition(&layout, number.partition_number).ok_or_else(|| {
            ImagingError::NoMatchingPartition {
                device: device_path.clone(),
                partition_number: number.partition_number,
            }
        })?;

        Ok(RedirectedSource {
            starting_offset: record.starting_offset,
            device_path,
        })
    }

    /// Like [`locate`](Self::locate), but a failed device-number probe or a
    /// missing partition record yields `Ok(None)` so the caller decides
    /// whether running without redirection is acceptable.
    pub fn redirect(&self, volume: &str) -> Result<Option<RedirectedSource>, ImagingError> {
        match self.locate(volume) {
            Ok(source) => {
                info!(
                    "Redirecting {} to {} at offset {}",
                    volume, source.device_path, source.starting_offset
                );
                Ok(Some(source))
            }
            Err(e) if Self::degrades(volume, &e) => {
                warn!("Could not redirect {}: {}", volume, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn degrades(volume: &str, error: &ImagingError) -> bool {
        match error {
            ImagingError::NoMatchingPartition { .. } => true,
            ImagingError::DeviceOpenError { path, .. }
            | ImagingError::QueryFailed { path, .. }
            | ImagingError::MalformedResponse { path, .. } => path == volume,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::testing::{FakeDevices, record};
    use crate::disk::{ControlQuery, PartitionStyle};
    use std::io;

    fn encrypted_d_on_drive_2() -> FakeDevices {
        FakeDevices::new()
            .with_encrypted(r"\\.\D:")
            .with_device_number(r"\\.\D:", 2, 3)
            .with_layout(
                r"\\.\PhysicalDrive2",
                PartitionStyle::Gpt,
                vec![
                    record(1, 17408, 16 << 20),
                    record(2, 16_777_216 + 17408, 100 << 20),
                    record(3, 122_683_392, 20 << 30),
                ],
            )
    }

    #[test]
    fn test_locate_matching_partition() {
        let devices = encrypted_d_on_drive_2();
        let redirector = EncryptedVolumeRedirector::new(&devices);
        let source = redirector.locate(r"\\.\D:").unwrap();
        assert_eq!(
            source,
            RedirectedSource {
                device_path: r"\\.\PhysicalDrive2".to_string(),
                starting_offset: 122_683_392,
            }
        );
    }

    #[test]
    fn test_locate_without_match() {
        let devices = FakeDevices::new()
            .with_device_number(r"\\.\D:", 0, 5)
            .with_layout(
                r"\\.\PhysicalDrive0",
                PartitionStyle::Mbr,
                vec![record(1, 1 << 20, 1 << 30), record(2, 1 << 31, 1 << 30)],
            );
        let err = EncryptedVolumeRedirector::new(&devices)
            .locate(r"\\.\D:")
            .unwrap_err();
        assert!(matches!(
            err,
            ImagingError::NoMatchingPartition {
                partition_number: 5,
                ..
            }
        ));
    }

    #[test]
    fn test_first_match_wins() {
        let devices = FakeDevices::new()
            .with_device_number(r"\\.\E:", 0, 1)
            .with_layout(
                r"\\.\PhysicalDrive0",
                PartitionStyle::Mbr,
                vec![record(1, 4096, 10), record(1, 8192, 10)],
            );
        let source = EncryptedVolumeRedirector::new(&devices)
            .locate(r"\\.\E:")
            .unwrap();
        assert_eq!(source.starting_offset, 4096);
    }

    #[test]
    fn test_redirect_degrades_when_device_number_fails() {
        let devices = FakeDevices::new().with_rejected_query(
            r"\\.\D:",
            ControlQuery::DeviceNumber,
            io::ErrorKind::PermissionDenied,
        );
        let result = EncryptedVolumeRedirector::new(&devices)
            .redirect(r"\\.\D:")
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_redirect_degrades_without_match() {
        let devices = FakeDevices::new()
            .with_device_number(r"\\.\D:", 0, 9)
            .with_layout(r"\\.\PhysicalDrive0", PartitionStyle::Gpt, vec![record(1, 0, 10)]);
        let result = EncryptedVolumeRedirector::new(&devices)
            .redirect(r"\\.\D:")
            .unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn test_redirect_propagates_layout_failure() {
        let devices = FakeDevices::new()
            .with_device_number(r"\\.\D:", 4, 1)
            .with_rejected_query(
                r"\\.\PhysicalDrive4",
                ControlQuery::DriveLayout,
                io::ErrorKind::PermissionDenied,
            );
        let err = EncryptedVolumeRedirector::new(&devices)
            .redirect(r"\\.\D:")
            .unwrap_err();
        assert!(matches!(
            err,
            ImagingError::QueryFailed {
                query: ControlQuery::DriveLayout,
                ..
            }
        ));
    }

    #[test]
    fn test_redirect_propagates_missing_physical_drive() {
        let devices = FakeDevices::new().with_device_number(r"\\.\D:", 7, 1);
        let err = EncryptedVolumeRedirector::new(&devices)
            .redirect(r"\\.\D:")
            .unwrap_err();
        assert!(matches!(
            err,
            ImagingError::DeviceOpenError { ref path, .. } if path == r"\\.\PhysicalDrive7"
        ));
    }
}
