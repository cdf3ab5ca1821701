//! Zoned block device adaptation layer.
//!
//! This crate sits between a storage benchmarking engine's I/O submission
//! path and zoned block devices (`/sys/class/block/*/queue/zoned`): it
//! discovers a device's zone model, validates a worker's configured range
//! and block sizes against it, decides where each read or write actually
//! lands, resets zones as their write pointers fill, and tracks per-zone
//! state behind ordinary in-process locks shared by every worker that opens
//! the same device.
//!
//! The workhorse I/O submission and completion pipeline, workload
//! generation, and reporting are the engine's responsibility and are not
//! part of this crate; see `crate::adjust` and `crate::post_submit` for the
//! two points where the engine hands control to, and takes it back from,
//! this layer.
//!
//! Call sequence for one worker, start to finish:
//! 1. [`init`] — attach to (or discover) the device's zone model, validate
//!    the worker's range and configuration.
//! 2. [`file_reset`] — reset the worker's range before the job starts
//!    issuing I/O.
//! 3. [`adjust`] once per operation, [`post_submit`] once the submission
//!    completes.
//! 4. [`free`] — release the worker's reference to the device.

pub mod adjust;
mod discovery;
mod kernel;
pub mod device;
pub mod error;
pub mod post_submit;
pub mod registry;
pub mod reset;
pub mod validator;
pub mod worker;
pub mod zone;

use std::{os::unix::io::RawFd, path::Path};

pub use adjust::{adjust, Decision, Io};
pub use error::{unaligned_write, Result, ZbdError};
pub use post_submit::post_submit;
pub use validator::WorkerRange;
pub use worker::{BlockSizeRange, IoDirection, RunState, VerifyMode, WorkerConfig, ZbdFile};

/// Attaches `path` to the sharing registry, validates the worker's
/// direct-I/O setting and block sizes against the device's zone model, and
/// rounds `range` to zone boundaries if needed (§4.1, §4.2). Call once per
/// worker file before issuing any I/O.
pub fn init(
    path: &Path,
    configured_zone_size: Option<u64>,
    range: WorkerRange,
    config: WorkerConfig,
) -> Result<ZbdFile> {
    let device = registry::attach(path, configured_zone_size)?;

    validator::check_direct_io(&device, config.writes, config.direct_io)?;

    if config.verify == VerifyMode::Enabled {
        let block_sizes = [config.read_bs.min, config.write_bs.min];
        validator::check_block_size_divisibility(&device, &block_sizes)?;
    }

    let range = validator::align_range(&device, range)?;

    Ok(ZbdFile::new(device, range, config))
}

/// Releases `file`'s reference to its device (§4.6). The registry drops the
/// underlying zone model once the last worker has detached.
pub fn free(file: &ZbdFile) {
    registry::detach(&file.device.path);
}

/// Resets `file`'s configured range of zones before its job starts issuing
/// I/O (§4.3). `all` should be true when verification is enabled, the
/// worker writes, and the engine is not currently replaying for
/// verification; false otherwise. The engine supplies `fd`, its own open
/// descriptor on the device.
pub fn file_reset(file: &ZbdFile, fd: RawFd, all: bool) -> Result<()> {
    let (zf, zl) = file.zone_range();
    let min_bs_sectors = reset::sectors_from_bytes(file.config.write_bs.min);
    reset::file_reset(&file.device, fd, zf, zl, all, min_bs_sectors)
}
