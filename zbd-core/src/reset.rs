//! Reset Engine: resets ranges of zones via the kernel zone-reset ioctl and
//! synchronizes the in-memory write pointers (§4.3).

use std::os::unix::io::RawFd;

use tracing::debug;

use crate::{
    device::{DeviceDescriptor, ZonedModel},
    error::ZbdError,
    kernel,
    zone::{ZoneCondition, ZoneType, SECTOR_SIZE},
};

/// Resets `[first_sector, first_sector + n_sectors)` on the device (a
/// no-op for non-ZBD devices, since there is no kernel zone-reset ioctl to
/// back it), then snaps the in-memory write pointer of every zone fully
/// covered by the range back to `start`.
pub fn reset_range(
    device: &DeviceDescriptor,
    fd: RawFd,
    first_sector: u64,
    n_sectors: u64,
) -> Result<(), ZbdError> {
    if device.model != ZonedModel::None {
        kernel::reset_zone(fd, first_sector, n_sectors).map_err(|source| {
            ZbdError::ResetFailed {
                path: device.path.clone(),
                source,
            }
        })?;
    }

    let end_sector = first_sector + n_sectors;
    for i in 0 .. device.nr_zones as usize {
        let z = device.zone(i);
        if z.zone_type != ZoneType::SeqwriteRequired {
            continue;
        }
        let zone_end = z.start + device.zone_size;
        if z.start >= first_sector && zone_end <= end_sector {
            let mut guard = z.lock_arc();
            guard.wp = z.start;
            guard.verify_block = 0;
            if guard.cond != ZoneCondition::Offline && guard.cond != ZoneCondition::Readonly {
                guard.cond = ZoneCondition::Empty;
            }
        }
    }

    Ok(())
}

/// Sweeps `[begin, end)` of the device's zones, resetting either every
/// dirty sequential zone (`all == true`) or only those sequential zones
/// whose write pointer is not a multiple of `min_bs` (`all == false`,
/// §4.3). Consecutive to-be-reset zones are coalesced into a single kernel
/// call; conventional and non-contiguous ranges break the run.
pub fn reset_zones(
    device: &DeviceDescriptor,
    fd: RawFd,
    begin: usize,
    end: usize,
    all: bool,
    min_bs_sectors: u64,
) -> Result<(), ZbdError> {
    let end = end.min(device.nr_zones as usize);
    let mut i = begin;

    while i < end {
        let z = device.zone(i);
        if z.zone_type != ZoneType::SeqwriteRequired {
            i += 1;
            continue;
        }

        let guard = z.lock_arc();
        let needs_reset = if all {
            guard.wp != z.start
        } else {
            min_bs_sectors != 0 && (guard.wp - z.start) % min_bs_sectors != 0
        };
        drop(guard);

        if !needs_reset {
            i += 1;
            continue;
        }

        // Coalesce the contiguous run of to-be-reset sequential zones
        // starting at `i` into a single kernel call.
        let run_start = i;
        let mut run_end = i + 1;
        while run_end < end {
            let z2 = device.zone(run_end);
            if z2.zone_type != ZoneType::SeqwriteRequired {
                break;
            }
            let guard2 = z2.lock_arc();
            let needs2 = if all {
                guard2.wp != z2.start
            } else {
                min_bs_sectors != 0 && (guard2.wp - z2.start) % min_bs_sectors != 0
            };
            drop(guard2);
            if !needs2 {
                break;
            }
            run_end += 1;
        }

        let first = device.zone(run_start).start;
        let last_zone = device.zone(run_end - 1);
        let n_sectors = (last_zone.start + device.zone_size) - first;

        debug!(
            path = %device.path.display(),
            first_zone = run_start,
            last_zone = run_end - 1,
            "coalesced zone reset sweep",
        );

        reset_range(device, fd, first, n_sectors)?;

        i = run_end;
    }

    Ok(())
}

/// Pre-job reset: resets the worker's configured range of zones before the
/// job begins issuing I/O (§4.3). `all` should be set to true when
/// verification is enabled and the worker will write, and the engine is not
/// currently replaying for verification; otherwise false.
pub fn file_reset(
    device: &DeviceDescriptor,
    fd: RawFd,
    range_begin: usize,
    range_end: usize,
    all: bool,
    min_bs_sectors: u64,
) -> Result<(), ZbdError> {
    reset_zones(device, fd, range_begin, range_end, all, min_bs_sectors)
}

/// Convenience for sizing a reset from byte offsets rather than zone
/// indices.
pub fn sectors_from_bytes(bytes: u64) -> u64 {
    bytes / SECTOR_SIZE
}
