// Single-query device probes
//
// Each probe opens its own handle through `DeviceAccess::control`, issues one
// query and decodes the response. Failures are returned immediately.

use crate::disk::layout::{
    self, DEVICE_NUMBER_SIZE, DiskGeometry, DriveLayout, GEOMETRY_SIZE, PartitionRecord,
    StorageDeviceNumber,
};
use crate::disk::{ControlQuery, DeviceAccess, LAYOUT_BUFFER_SIZE, physical_drive_path};
use crate::error::ImagingError;
use tracing::debug;

/// Read the geometry of `path` and return its capacity in bytes
pub fn disk_capacity<D: DeviceAccess>(access: &D, path: &str) -> Result<u64, ImagingError> {
    let geometry = disk_geometry(access, path)?;
    let capacity = geometry
        .capacity()
        .ok_or_else(|| ImagingError::GeometryOverflow {
            path: path.to_string(),
        })?;

    debug!(
        "Geometry of {}: {} cylinders x {} tracks x {} sectors x {} bytes = {} bytes",
        path,
        geometry.cylinders,
        geometry.tracks_per_cylinder,
        geometry.sectors_per_track,
        geometry.bytes_per_sector,
        capacity
    );
    Ok(capacity)
}

/// Issue the geometry query against `path`
pub fn disk_geometry<D: DeviceAccess>(
    access: &D,
    path: &str,
) -> Result<DiskGeometry, ImagingError> {
    let mut buf = [0u8; GEOMETRY_SIZE];
    let returned = access.control(path, ControlQuery::Geometry, &mut buf)?;
    DiskGeometry::decode(&buf[..returned.min(GEOMETRY_SIZE)]).ok_or_else(|| {
        ImagingError::MalformedResponse {
            query: ControlQuery::Geometry,
            path: path.to_string(),
            expected: GEOMETRY_SIZE,
            actual: returned,
        }
    })
}

/// Issue the drive-layout query against `path` and decode its partition table
pub fn read_drive_layout<D: DeviceAccess>(
    access: &D,
    path: &str,
) -> Result<DriveLayout, ImagingError> {
    let mut buf = vec![0u8; LAYOUT_BUFFER_SIZE];
    let returned = access.control(path, ControlQuery::DriveLayout, &mut buf)?;
    buf.truncate(returned.min(LAYOUT_BUFFER_SIZE));

    let layout = layout::parse_drive_layout(&buf)?;
    debug!(
        "Layout of {}: {} style, {} of {} partitions decoded",
        path,
        layout.header.partition_style,
        layout.partitions.len(),
        layout.header.partition_count
    );
    Ok(layout)
}

/// Physical device index and partition index of the volume at `path`
pub fn device_number<D: DeviceAccess>(
    access: &D,
    path: &str,
) -> Result<StorageDeviceNumber, ImagingError> {
    let mut buf = [0u8; DEVICE_NUMBER_SIZE];
    let returned = access.control(path, ControlQuery::DeviceNumber, &mut buf)?;
    let number = StorageDeviceNumber::decode(&buf[..returned.min(DEVICE_NUMBER_SIZE)])
        .ok_or_else(|| ImagingError::MalformedResponse {
            query: ControlQuery::DeviceNumber,
            path: path.to_string(),
            expected: DEVICE_NUMBER_SIZE,
            actual: returned,
        })?;

    debug!(
        "{} is partition {} on physical drive {}",
        path, number.partition_number, number.device_number
    );
    Ok(number)
}

/// First record in scan order whose partition index equals `partition_number`
pub fn find_partition(layout: &DriveLayout, partition_number: u32) -> Option<&PartitionRecord> {
    layout
        .partitions
        .iter()
        .find(|record| record.partition_number == partition_number)
}

/// Size of the volume at `path`, taken from its record in the parent disk's layout
pub fn volume_capacity<D: DeviceAccess>(access: &D, path: &str) -> Result<u64, ImagingError> {
    let number = device_number(access, path)?;
    let device = physical_drive_path(number.device_number);
    let layout = read_drive_layout(access, &device)?;

    find_partition(&layout, number.partition_number)
        .map(|record| record.length)
        .ok_or(ImagingError::NoMatchingPartition {
            device,
            partition_number: number.partition_number,
        })
}
