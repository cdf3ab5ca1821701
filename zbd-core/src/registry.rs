//! Sharing Registry: one `DeviceDescriptor` per underlying device path,
//! shared by every worker operating on that device (§4.6). Workers attach
//! during `init` and detach during `free`; the descriptor, and the zone
//! locks it owns, are torn down only once the last worker has detached.

use std::{collections::HashMap, path::Path, path::PathBuf, sync::Arc};

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::debug;

use crate::{device::DeviceDescriptor, discovery, error::ZbdError};

static REGISTRY: Lazy<Mutex<HashMap<PathBuf, Arc<DeviceDescriptor>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Returns the shared descriptor for `path`, running discovery only if no
/// worker currently has it open. Subsequent callers for the same path get
/// the same `Arc` and bump its refcount.
pub fn attach(
    path: &Path,
    configured_zone_size: Option<u64>,
) -> Result<Arc<DeviceDescriptor>, ZbdError> {
    let mut registry = REGISTRY.lock();

    if let Some(existing) = registry.get(path) {
        existing.incref();
        debug!(path = %path.display(), "reusing shared zone model");
        return Ok(existing.clone());
    }

    let descriptor = Arc::new(discovery::discover(path, configured_zone_size)?);
    debug!(
        path = %path.display(),
        nr_zones = descriptor.nr_zones,
        "discovered zone model",
    );
    registry.insert(path.to_path_buf(), descriptor.clone());
    Ok(descriptor)
}

/// Releases one worker's reference to `path`'s descriptor, dropping it from
/// the registry once no worker references it.
pub fn detach(path: &Path) {
    let mut registry = REGISTRY.lock();
    let Some(descriptor) = registry.get(path) else {
        return;
    };
    if descriptor.decref() {
        debug!(path = %path.display(), "last worker detached, dropping zone model");
        registry.remove(path);
    }
}

/// Number of distinct devices currently tracked. Exposed for tests and for
/// diagnostics; not part of the engine-facing contract.
#[cfg(test)]
pub(crate) fn tracked_paths() -> usize {
    REGISTRY.lock().len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn make_plain_file(size: u64) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.as_file_mut().set_len(size).unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn repeated_attach_shares_one_descriptor_and_refcounts() {
        let file = make_plain_file(4 * 1024 * 1024);
        let path = file.path();
        let zone_size = Some(2048u64); // 1 MiB zones, in sectors

        let a = attach(path, zone_size).unwrap();
        let b = attach(path, zone_size).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.refcount(), 2);

        detach(path);
        assert_eq!(a.refcount(), 1);
        detach(path);
        assert_eq!(tracked_paths(), 0);
    }
}
