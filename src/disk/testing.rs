// In-memory device backend for unit tests

use crate::disk::layout::{PARTITION_ENTRIES_OFFSET, PARTITION_PAYLOAD_SIZE};
use crate::disk::{
    ControlQuery, DeviceAccess, DeviceKind, DiskGeometry, PartitionRecord, PartitionStyle,
    ReadProbe, StorageDeviceNumber, is_physical_drive_path,
};
use crate::error::ImagingError;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

/// Partition record with the given index, offset and length
pub fn record(partition_number: u32, starting_offset: u64, length: u64) -> PartitionRecord {
    PartitionRecord {
        partition_style: PartitionStyle::Gpt,
        starting_offset,
        length,
        partition_number,
        rewrite_partition: false,
        is_service_partition: false,
        payload: [0u8; PARTITION_PAYLOAD_SIZE],
    }
}

/// Build a drive-layout response claiming `partition_count` entries and
/// holding `records`, zero padded up to `min_len` bytes
pub fn layout_buffer(
    style: PartitionStyle,
    partition_count: u32,
    records: &[PartitionRecord],
    min_len: usize,
) -> Vec<u8> {
    let style = match style {
        PartitionStyle::Mbr => 0u32,
        PartitionStyle::Gpt => 1,
        PartitionStyle::Raw => 2,
        PartitionStyle::Unknown(value) => value,
    };
    let mut buf = vec![0u8; PARTITION_ENTRIES_OFFSET];
    buf[0..4].copy_from_slice(&style.to_le_bytes());
    buf[4..8].copy_from_slice(&partition_count.to_le_bytes());
    for record in records {
        buf.extend_from_slice(&record.to_bytes());
    }
    if buf.len() < min_len {
        buf.resize(min_len, 0);
    }
    buf
}

enum Response {
    Data(Vec<u8>),
    Rejected(io::ErrorKind),
}

enum Probe {
    Data(Vec<u8>),
    Encrypted,
    Failed(io::ErrorKind),
}

/// Device table keyed by path, answering control queries from canned responses
#[derive(Default)]
pub struct FakeDevices {
    responses: HashMap<(String, ControlQuery), Response>,
    probes: HashMap<String, Probe>,
    sources: HashMap<String, PathBuf>,
    free_space: Option<u64>,
    alignments: HashMap<String, u32>,
    calls: RefCell<Vec<(String, ControlQuery)>>,
}

impl FakeDevices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_geometry(mut self, path: &str, geometry: DiskGeometry) -> Self {
        self.responses.insert(
            (path.to_string(), ControlQuery::Geometry),
            Response::Data(geometry.to_bytes().to_vec()),
        );
        self
    }

    pub fn with_layout(
        mut self,
        path: &str,
        style: PartitionStyle,
        records: Vec<PartitionRecord>,
    ) -> Self {
        let buf = layout_buffer(style, records.len() as u32, &records, 0);
        self.responses.insert(
            (path.to_string(), ControlQuery::DriveLayout),
            Response::Data(buf),
        );
        self
    }

    pub fn with_device_number(mut self, path: &str, device: u32, partition: u32) -> Self {
        let number = StorageDeviceNumber {
            device_type: 7,
            device_number: device,
            partition_number: partition,
        };
        self.responses.insert(
            (path.to_string(), ControlQuery::DeviceNumber),
            Response::Data(number.to_bytes().to_vec()),
        );
        self
    }

    pub fn with_raw_response(mut self, path: &str, query: ControlQuery, data: Vec<u8>) -> Self {
        self.responses
            .insert((path.to_string(), query), Response::Data(data));
        self
    }

    pub fn with_rejected_query(
        mut self,
        path: &str,
        query: ControlQuery,
        kind: io::ErrorKind,
    ) -> Self {
        self.responses
            .insert((path.to_string(), query), Response::Rejected(kind));
        self
    }

    pub fn with_readable(mut self, path: &str, data: Vec<u8>) -> Self {
        self.probes.insert(path.to_string(), Probe::Data(data));
        self
    }

    pub fn with_encrypted(mut self, path: &str) -> Self {
        self.probes.insert(path.to_string(), Probe::Encrypted);
        self
    }

    pub fn with_unreadable(mut self, path: &str, kind: io::ErrorKind) -> Self {
        self.probes.insert(path.to_string(), Probe::Failed(kind));
        self
    }

    pub fn with_source_file(mut self, path: &str, file: &Path) -> Self {
        self.sources.insert(path.to_string(), file.to_path_buf());
        self
    }

    pub fn with_sector_alignment(mut self, path: &str, sector_size: u32) -> Self {
        self.alignments.insert(path.to_string(), sector_size);
        self
    }

    pub fn with_free_space(mut self, bytes: u64) -> Self {
        self.free_space = Some(bytes);
        self
    }

    /// Control queries issued so far, in order
    pub fn calls(&self) -> Vec<(String, ControlQuery)> {
        self.calls.borrow().clone()
    }

    fn knows(&self, path: &str) -> bool {
        self.probes.contains_key(path)
            || self.sources.contains_key(path)
            || self.responses.keys().any(|(known, _)| known == path)
    }

    fn not_found(path: &str) -> ImagingError {
        ImagingError::DeviceOpenError {
            path: path.to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "no such device"),
        }
    }
}

impl DeviceAccess for FakeDevices {
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
        self.calls.borrow_mut().push((path.to_string(), query));
        if !self.knows(path) {
            return Err(Self::not_found(path));
        }

        match self.responses.get(&(path.to_string(), query)) {
            Some(Response::Data(data)) => {
                if data.len() > buf.len() {
                    return Err(ImagingError::QueryFailed {
                        query,
                        path: path.to_string(),
                        source: io::Error::other("receive buffer too small"),
                    });
                }
                buf[..data.len()].copy_from_slice(data);
                Ok(data.len())
            }
            Some(Response::Rejected(kind)) => Err(ImagingError::QueryFailed {
                query,
                path: path.to_string(),
                source: io::Error::from(*kind),
            }),
            None => Err(ImagingError::QueryFailed {
                query,
                path: path.to_string(),
                source: io::Error::from(io::ErrorKind::Unsupported),
            }),
        }
    }

    fn probe_read(&self, path: &str, buf: &mut [u8]) -> Result<ReadProbe, ImagingError> {
        match self.probes.get(path) {
            Some(Probe::Data(data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(ReadProbe::Readable(n))
            }
            Some(Probe::Encrypted) => Ok(ReadProbe::Encrypted(io::Error::other(
                "This drive is locked by BitLocker Drive Encryption",
            ))),
            Some(Probe::Failed(kind)) => Ok(ReadProbe::Failed(io::Error::from(*kind))),
            None => Err(Self::not_found(path)),
        }
    }

    fn open_source(&self, path: &str) -> Result<File, ImagingError> {
        let file = self.sources.get(path).ok_or_else(|| Self::not_found(path))?;
        File::open(file).map_err(|source| ImagingError::DeviceOpenError {
            path: path.to_string(),
            source,
        })
    }

    fn free_space(&self, path: &Path) -> Result<u64, ImagingError> {
        self.free_space
            .ok_or_else(|| ImagingError::FreeSpaceQueryFailed {
                path: path.display().to_string(),
                source: io::Error::from(io::ErrorKind::Unsupported),
            })
    }

    fn sector_alignment(&self, path: &str) -> Option<u32> {
        self.alignments.get(path).copied()
    }
}
