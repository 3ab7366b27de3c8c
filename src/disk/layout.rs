// Decoding of device control responses
//
// Geometry, drive-layout and device-number queries answer with fixed-layout
// little-endian structures. Each field is read by offset through a bounds
// checked cursor; nothing here reinterprets the receive buffer in place.

use crate::error::ImagingError;
use std::fmt;

/// DISK_GEOMETRY: i64 cylinders, u32 media type, u32 tracks/cylinder,
/// u32 sectors/track, u32 bytes/sector
pub const GEOMETRY_SIZE: usize = 24;

/// STORAGE_DEVICE_NUMBER: u32 device type, u32 device number, u32 partition number
pub const DEVICE_NUMBER_SIZE: usize = 12;

/// Partition style + partition count at the start of the layout response
pub const LAYOUT_HEADER_SIZE: usize = 8;

/// DRIVE_LAYOUT_INFORMATION_MBR: signature + checksum
pub const MBR_LAYOUT_SIZE: usize = 8;

/// DRIVE_LAYOUT_INFORMATION_GPT: disk GUID, usable offset, usable length,
/// max partition count, padded to 8-byte alignment
pub const GPT_LAYOUT_SIZE: usize = 40;

/// The MBR/GPT union is always padded to its larger member
pub const LAYOUT_UNION_SIZE: usize = if GPT_LAYOUT_SIZE > MBR_LAYOUT_SIZE {
    GPT_LAYOUT_SIZE
} else {
    MBR_LAYOUT_SIZE
};

/// Offset of the first partition record in a layout response
pub const PARTITION_ENTRIES_OFFSET: usize = LAYOUT_HEADER_SIZE + LAYOUT_UNION_SIZE;

/// Style-specific tail of a partition record (MBR or GPT info, padded)
pub const PARTITION_PAYLOAD_SIZE: usize = 112;

/// PARTITION_INFORMATION_EX
pub const PARTITION_RECORD_SIZE: usize = 32 + PARTITION_PAYLOAD_SIZE;

// Field offsets inside one partition record
const RECORD_STYLE: usize = 0;
const RECORD_STARTING_OFFSET: usize = 8;
const RECORD_LENGTH: usize = 16;
const RECORD_NUMBER: usize = 24;
const RECORD_REWRITE: usize = 28;
const RECORD_SERVICE: usize = 29;
const RECORD_PAYLOAD: usize = 32;

/// Partitioning scheme reported by the layout query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStyle {
    Mbr,
    Gpt,
    Raw,
    Unknown(u32),
}

impl From<u32> for PartitionStyle {
    fn from(value: u32) -> Self {
        match value {
            0 => Self::Mbr,
            1 => Self::Gpt,
            2 => Self::Raw,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for PartitionStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mbr => write!(f, "MBR"),
            Self::Gpt => write!(f, "GPT"),
            Self::Raw => write!(f, "RAW"),
            Self::Unknown(value) => write!(f, "unknown ({})", value),
        }
    }
}

/// Little-endian reader over a response buffer that never indexes past its end
struct ResponseReader<'a> {
    data: &'a [u8],
}

impl<'a> ResponseReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn bytes<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let end = offset.checked_add(N)?;
        let slice = self.data.get(offset..end)?;
        slice.try_into().ok()
    }

    fn u8(&self, offset: usize) -> Option<u8> {
        self.data.get(offset).copied()
    }

    fn u32(&self, offset: usize) -> Option<u32> {
        self.bytes::<4>(offset).map(u32::from_le_bytes)
    }

    fn i64(&self, offset: usize) -> Option<i64> {
        self.bytes::<8>(offset).map(i64::from_le_bytes)
    }
}

/// Physical geometry of a disk as reported by the geometry query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskGeometry {
    pub cylinders: i64,
    pub media_type: u32,
    pub tracks_per_cylinder: u32,
    pub sectors_per_track: u32,
    pub bytes_per_sector: u32,
}

impl DiskGeometry {
    /// Decode a geometry response; `None` when the buffer is shorter than the structure
    pub fn decode(data: &[u8]) -> Option<Self> {
        let reader = ResponseReader::new(data);
        Some(Self {
            cylinders: reader.i64(0)?,
            media_type: reader.u32(8)?,
            tracks_per_cylinder: reader.u32(12)?,
            sectors_per_track: reader.u32(16)?,
            bytes_per_sector: reader.u32(20)?,
        })
    }

    /// Encode in the wire layout the geometry query uses
    pub fn to_bytes(&self) -> [u8; GEOMETRY_SIZE] {
        let mut out = [0u8; GEOMETRY_SIZE];
        out[0..8].copy_from_slice(&self.cylinders.to_le_bytes());
        out[8..12].copy_from_slice(&self.media_type.to_le_bytes());
        out[12..16].copy_from_slice(&self.tracks_per_cylinder.to_le_bytes());
        out[16..20].copy_from_slice(&self.sectors_per_track.to_le_bytes());
        out[20..24].copy_from_slice(&self.bytes_per_sector.to_le_bytes());
        out
    }

    /// Capacity in bytes, `None` if the cylinder count is negative or the
    /// product does not fit in a u64
    pub fn capacity(&self) -> Option<u64> {
        let factors = [
            u64::try_from(self.cylinders).ok()?,
            u64::from(self.tracks_per_cylinder),
            u64::from(self.sectors_per_track),
            u64::from(self.bytes_per_sector),
        ];
        // With no zero factor every partial product is bounded by the result
        if factors.contains(&0) {
            return Some(0);
        }
        factors
            .iter()
            .try_fold(1u64, |acc, &factor| acc.checked_mul(factor))
    }
}

/// Physical device index and partition index of a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageDeviceNumber {
    pub device_type: u32,
    pub device_number: u32,
    pub partition_number: u32,
}

impl StorageDeviceNumber {
    pub fn decode(data: &[u8]) -> Option<Self> {
        let reader = ResponseReader::new(data);
        Some(Self {
            device_type: reader.u32(0)?,
            device_number: reader.u32(4)?,
            partition_number: reader.u32(8)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; DEVICE_NUMBER_SIZE] {
        let mut out = [0u8; DEVICE_NUMBER_SIZE];
        out[0..4].copy_from_slice(&self.device_type.to_le_bytes());
        out[4..8].copy_from_slice(&self.device_number.to_le_bytes());
        out[8..12].copy_from_slice(&self.partition_number.to_le_bytes());
        out
    }
}

/// Leading header of a drive-layout response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveLayoutHeader {
    pub partition_style: PartitionStyle,
    pub partition_count: u32,
}

impl DriveLayoutHeader {
    pub fn decode(data: &[u8]) -> Result<Self, ImagingError> {
        let reader = ResponseReader::new(data);
        match (reader.u32(0), reader.u32(4)) {
            (Some(style), Some(count)) => Ok(Self {
                partition_style: PartitionStyle::from(style),
                partition_count: count,
            }),
            _ => Err(ImagingError::MalformedLayout {
                reason: format!(
                    "header needs {} bytes, response has {}",
                    LAYOUT_HEADER_SIZE,
                    data.len()
                ),
            }),
        }
    }
}

/// One entry of the partition table returned by the layout query
#[derive(Clone, PartialEq, Eq)]
pub struct PartitionRecord {
    pub partition_style: PartitionStyle,
    pub starting_offset: u64,
    pub length: u64,
    /// Partition index within the owning disk. Volumes report the same index
    /// through the device-number query, which is what redirection matches on.
    pub partition_number: u32,
    pub rewrite_partition: bool,
    pub is_service_partition: bool,
    pub payload: [u8; PARTITION_PAYLOAD_SIZE],
}

impl fmt::Debug for PartitionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PartitionRecord")
            .field("partition_style", &self.partition_style)
            .field("starting_offset", &self.starting_offset)
            .field("length", &self.length)
            .field("partition_number", &self.partition_number)
            .finish_non_exhaustive()
    }
}

impl PartitionRecord {
    /// Decode one record; `Ok(None)` when fewer than a record's worth of bytes remain
    fn decode(data: &[u8], index: usize) -> Result<Option<Self>, ImagingError> {
        if data.len() < PARTITION_RECORD_SIZE {
            return Ok(None);
        }
        let reader = ResponseReader::new(&data[..PARTITION_RECORD_SIZE]);
        let truncated = || ImagingError::MalformedLayout {
            reason: format!("partition record {} is truncated", index),
        };

        let starting_offset = reader.i64(RECORD_STARTING_OFFSET).ok_or_else(truncated)?;
        let length = reader.i64(RECORD_LENGTH).ok_or_else(truncated)?;
        let starting_offset =
            u64::try_from(starting_offset).map_err(|_| ImagingError::MalformedLayout {
                reason: format!(
                    "partition record {} has negative starting offset {}",
                    index, starting_offset
                ),
            })?;
        let length = u64::try_from(length).map_err(|_| ImagingError::MalformedLayout {
            reason: format!("partition record {} has negative length {}", index, length),
        })?;

        Ok(Some(Self {
            partition_style: PartitionStyle::from(
                reader.u32(RECORD_STYLE).ok_or_else(truncated)?,
            ),
            starting_offset,
            length,
            partition_number: reader.u32(RECORD_NUMBER).ok_or_else(truncated)?,
            rewrite_partition: reader.u8(RECORD_REWRITE).ok_or_else(truncated)? != 0,
            is_service_partition: reader.u8(RECORD_SERVICE).ok_or_else(truncated)? != 0,
            payload: reader
                .bytes::<PARTITION_PAYLOAD_SIZE>(RECORD_PAYLOAD)
                .ok_or_else(truncated)?,
        }))
    }

    /// Encode in the wire layout of the drive-layout response
    pub fn to_bytes(&self) -> [u8; PARTITION_RECORD_SIZE] {
        let style = match self.partition_style {
            PartitionStyle::Mbr => 0,
            PartitionStyle::Gpt => 1,
            PartitionStyle::Raw => 2,
            PartitionStyle::Unknown(value) => value,
        };
        let mut out = [0u8; PARTITION_RECORD_SIZE];
        out[RECORD_STYLE..RECORD_STYLE + 4].copy_from_slice(&style.to_le_bytes());
        out[RECORD_STARTING_OFFSET..RECORD_STARTING_OFFSET + 8]
            .copy_from_slice(&(self.starting_offset as i64).to_le_bytes());
        out[RECORD_LENGTH..RECORD_LENGTH + 8]
            .copy_from_slice(&(self.length as i64).to_le_bytes());
        out[RECORD_NUMBER..RECORD_NUMBER + 4].copy_from_slice(&self.partition_number.to_le_bytes());
        out[RECORD_REWRITE] = self.rewrite_partition as u8;
        out[RECORD_SERVICE] = self.is_service_partition as u8;
        out[RECORD_PAYLOAD..].copy_from_slice(&self.payload);
        out
    }
}

/// Decoded drive-layout response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveLayout {
    pub header: DriveLayoutHeader,
    pub partitions: Vec<PartitionRecord>,
}

/// Decode a drive-layout response.
///
/// Records start after the header and the padded MBR/GPT union. At most
/// `partition_count` records are read; decoding stops quietly when the
/// buffer runs out before that.
pub fn parse_drive_layout(data: &[u8]) -> Result<DriveLayout, ImagingError> {
    let header = DriveLayoutHeader::decode(data)?;
    let mut entries = data.get(PARTITION_ENTRIES_OFFSET..).unwrap_or(&[]);

    let mut partitions = Vec::new();
    for index in 0..header.partition_count as usize {
        match PartitionRecord::decode(entries, index)? {
            Some(record) => partitions.push(record),
            None => {
                tracing::debug!(
                    "Layout claims {} partitions but only {} fit in the response",
                    header.partition_count,
                    index
                );
                break;
            }
        }
        entries = &entries[PARTITION_RECORD_SIZE..];
    }

    Ok(DriveLayout { header, partitions })
}
