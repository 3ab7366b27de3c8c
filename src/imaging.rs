// Bounded block copy from a resolved source into the destination file
//
// The engine is a plain read/write loop on the calling thread: one chunk is
// read, written, and reported before the next read is issued.

use crate::config::ImagingConfig;
use crate::disk::resolver::{SourceResolver, source_capacity};
use crate::disk::DeviceAccess;
use crate::error::ImagingError;
use crate::models::{CopyProgress, CopyRange, ImagingState};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, error, info};

/// Receives the running total after every chunk
pub trait ProgressSink {
    fn update(&mut self, progress: CopyProgress, total: u64);

    /// Called once after the destination has been flushed
    fn finish(&mut self, _progress: CopyProgress, _total: u64) {}
}

/// Discards progress updates
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&mut self, _progress: CopyProgress, _total: u64) {}
}

impl<F: FnMut(u64, u64)> ProgressSink for F {
    fn update(&mut self, progress: CopyProgress, total: u64) {
        self(progress.bytes_copied, total)
    }
}

pub struct ImagingEngine<'a, P: ProgressSink> {
    range: &'a CopyRange,
    chunk_size: usize,
    progress: P,
    state: ImagingState,
    copied: CopyProgress,
}

impl<'a, P: ProgressSink> ImagingEngine<'a, P> {
    pub fn new(range: &'a CopyRange, chunk_size: usize, progress: P) -> Self {
        Self {
            range,
            chunk_size: chunk_size.max(1),
            progress,
            state: ImagingState::Idle,
            copied: CopyProgress::default(),
        }
    }

    pub fn state(&self) -> ImagingState {
        self.state
    }

    pub fn progress(&self) -> CopyProgress {
        self.copied
    }

    /// Copy the range from `source` into `dest`.
    ///
    /// Ends in `Completed` at end of source, or once `total_capacity` bytes
    /// have been written when the range is bounded. Any I/O failure ends in
    /// `Failed`; only signal-interrupted reads are reissued.
    pub fn run<R, W>(
        &mut self,
        source: &mut R,
        dest: &mut W,
    ) -> Result<CopyProgress, ImagingError>
    where
        R: Read + Seek,
        W: Write + Seek,
    {
        self.copied = CopyProgress::default();
        let result = self
            .position(source, dest)
            .and_then(|()| self.copy(source, dest));

        match &result {
            Ok(progress) => {
                self.state = ImagingState::Completed;
                self.progress.finish(*progress, self.range.total_capacity);
                info!("Imaging completed, {} bytes copied", progress.bytes_copied);
            }
            Err(e) => {
                self.state = ImagingState::Failed;
                error!("Imaging failed: {}", e);
            }
        }
        result
    }

    fn position<R: Seek, W: Seek>(
        &mut self,
        source: &mut R,
        dest: &mut W,
    ) -> Result<(), ImagingError> {
        let start = self
            .range
            .source_start()
            .ok_or_else(|| ImagingError::SourceSeekError {
                offset: self.range.source_base_offset,
                source: io::Error::new(io::ErrorKind::InvalidInput, "source offset overflows"),
            })?;

        source
            .seek(SeekFrom::Start(start))
            .map_err(|source| ImagingError::SourceSeekError {
                offset: start,
                source,
            })?;
        dest.seek(SeekFrom::Start(self.range.skip))
            .map_err(|source| ImagingError::DestinationSeekError {
                offset: self.range.skip,
                source,
            })?;

        self.state = ImagingState::Copying;
        debug!(
            "Copying from {} at {} into destination at {}",
            self.range.source_path, start, self.range.skip
        );
        Ok(())
    }

    fn copy<R: Read, W: Write>(
        &mut self,
        source: &mut R,
        dest: &mut W,
    ) -> Result<CopyProgress, ImagingError> {
        let total = self.range.total_capacity;
        let bounded = self.range.is_bounded();
        let mut buffer = vec![0u8; self.chunk_size];

        loop {
            let bytes_read = match source.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                // EINTR is a signal interruption, not a failed read
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(ImagingError::SourceReadError {
                        bytes_copied: self.copied.bytes_copied,
                        source: e,
                    });
                }
            };

            let copied = self.copied.bytes_copied;
            if bounded && copied + bytes_read as u64 >= total {
                let remaining = total.saturating_sub(copied) as usize;
                self.write_chunk(dest, &buffer[..remaining])?;
                self.copied.bytes_copied = total;
                self.progress.update(self.copied, total);
                debug!("Reached the end of the redirected range at {} bytes", total);
                break;
            }

            self.write_chunk(dest, &buffer[..bytes_read])?;
            self.copied.bytes_copied += bytes_read as u64;
            self.progress.update(self.copied, total);
        }

        dest.flush()
            .map_err(|source| ImagingError::DestinationWriteError {
                bytes_copied: self.copied.bytes_copied,
                source,
            })?;
        Ok(self.copied)
    }

    fn write_chunk<W: Write>(&self, dest: &mut W, chunk: &[u8]) -> Result<(), ImagingError> {
        dest.write_all(chunk)
            .map_err(|source| ImagingError::DestinationWriteError {
                bytes_copied: self.copied.bytes_copied,
                source,
            })
    }
}

/// Checked and resolved imaging run, ready to execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagingPlan {
    pub range: CopyRange,
    /// Free bytes on the destination volume when the plan was made
    pub available: u64,
}

/// Size the source, check the destination has room, and resolve the device to read
pub fn plan_imaging<D: DeviceAccess>(
    config: &ImagingConfig,
    access: &D,
) -> Result<ImagingPlan, ImagingError> {
    let capacity = source_capacity(access, &config.source)?;
    info!("Source {} holds {} bytes", config.source, capacity);

    let available = access.free_space(&config.destination)?;
    info!(
        "Destination volume of {} has {} bytes free",
        config.destination.display(),
        available
    );
    if available <= capacity {
        return Err(ImagingError::InsufficientCapacity {
            available,
            required: capacity,
        });
    }

    let resolved = SourceResolver::new(access).resolve(&config.source)?;
    let range = CopyRange::new(&resolved, config.seek, config.skip, capacity);
    check_alignment(access, &range)?;
    Ok(ImagingPlan { range, available })
}

/// Raw device handles only accept reads at sector boundaries
fn check_alignment<D: DeviceAccess>(access: &D, range: &CopyRange) -> Result<(), ImagingError> {
    let Some(sector_size) = access.sector_alignment(&range.source_path) else {
        return Ok(());
    };
    let offset = range.source_start().unwrap_or(u64::MAX);
    if sector_size > 1 && offset % u64::from(sector_size) != 0 {
        return Err(ImagingError::UnalignedSourceOffset {
            path: range.source_path.clone(),
            offset,
            sector_size,
        });
    }
    Ok(())
}

/// Open both ends of `plan` and stream the range, syncing the destination at the end
pub fn execute_plan<D: DeviceAccess, P: ProgressSink>(
    config: &ImagingConfig,
    access: &D,
    plan: &ImagingPlan,
    progress: P,
) -> Result<CopyProgress, ImagingError> {
    let mut source = access.open_source(&plan.range.source_path)?;
    let mut dest = open_destination(&config.destination)?;

    let mut engine = ImagingEngine::new(&plan.range, config.chunk_size(), progress);
    let copied = engine.run(&mut source, &mut dest)?;

    dest.sync_all()
        .map_err(|source| ImagingError::DestinationWriteError {
            bytes_copied: copied.bytes_copied,
            source,
        })?;
    Ok(copied)
}

/// Plan and execute in one call
pub fn run_imaging<D: DeviceAccess, P: ProgressSink>(
    config: &ImagingConfig,
    access: &D,
    progress: P,
) -> Result<CopyProgress, ImagingError> {
    let plan = plan_imaging(config, access)?;
    execute_plan(config, access, &plan, progress)
}

/// Open the destination for read and write, creating it when absent and
/// keeping any existing content
fn open_destination(path: &Path) -> Result<File, ImagingError> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .map_err(|source| ImagingError::DestinationOpenError {
            path: path.display().to_string(),
            source,
        })
}
