// Resolution of a user-named source to the device that is actually read

use crate::disk::probe::{disk_capacity, volume_capacity};
use crate::disk::redirect::EncryptedVolumeRedirector;
use crate::disk::{DeviceAccess, DeviceKind, PROBE_READ_SIZE, ReadProbe};
use crate::error::ImagingError;
use crate::models::ResolvedSource;
use tracing::{debug, error, info};

pub struct SourceResolver<'a, D: DeviceAccess> {
    access: &'a D,
}

impl<'a, D: DeviceAccess> SourceResolver<'a, D> {
    pub fn new(access: &'a D) -> Self {
        Self { access }
    }

    /// Decide which device to stream from and where its bytes begin.
    ///
    /// A directly readable source is used as is. Only the encrypted-volume
    /// signal triggers redirection; every other read failure is fatal.
    pub fn resolve(&self, path: &str) -> Result<ResolvedSource, ImagingError> {
        let mut buf = [0u8; PROBE_READ_SIZE];
        match self.access.probe_read(path, &mut buf)? {
            ReadProbe::Readable(n) => {
                debug!("Probe read of {} returned {} bytes", path, n);
                Ok(ResolvedSource::direct(path))
            }
            ReadProbe::Encrypted(e) => {
                info!(
                    "{} is an encrypted volume ({}), switching to raw imaging of its disk",
                    path, e
                );
                match EncryptedVolumeRedirector::new(self.access).redirect(path)? {
                    Some(redirected) => Ok(ResolvedSource::redirected(redirected)),
                    None => Err(ImagingError::RedirectionFailed {
                        path: path.to_string(),
                    }),
                }
            }
            ReadProbe::Failed(e) => {
                error!("Failed to read source {}: {}", path, e);
                Err(ImagingError::SourceUnreadable {
                    path: path.to_string(),
                    source: e,
                })
            }
        }
    }
}

/// Size of the source in bytes: whole disks from their geometry, volumes from
/// their partition record
pub fn source_capacity<D: DeviceAccess>(access: &D, path: &str) -> Result<u64, ImagingError> {
    let capacity = match access.kind(path) {
        DeviceKind::Physical => disk_capacity(access, path)?,
        DeviceKind::Logical => volume_capacity(access, path)?,
    };
    if capacity == 0 {
        return Err(ImagingError::UnknownCapacity {
            path: path.to_string(),
        });
    }
    Ok(capacity)
}
