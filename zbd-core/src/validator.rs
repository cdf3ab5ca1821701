//! Range alignment, block-size divisibility, and direct-I/O checks run once
//! per worker after discovery (§4.2).

use tracing::warn;

use crate::{device::DeviceDescriptor, error::ZbdError, zone::ZoneType};

/// A worker's configured range, in bytes, possibly rounded by
/// `align_range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerRange {
    pub file_offset: u64,
    pub io_size: u64,
}

impl WorkerRange {
    pub fn end(&self) -> u64 {
        self.file_offset + self.io_size
    }
}

fn overlaps_sequential_zone(device: &DeviceDescriptor, range: WorkerRange) -> bool {
    let first = device.zone_index(range.file_offset);
    let last = device.zone_index(range.end().saturating_sub(1));
    (first ..= last).any(|i| device.zone(i).zone_type == ZoneType::SeqwriteRequired)
}

/// Rounds `range` to zone boundaries if it is not already aligned and it
/// overlaps a sequential zone. Returns an error if the rounded range would
/// be shorter than one zone.
pub fn align_range(
    device: &DeviceDescriptor,
    range: WorkerRange,
) -> Result<WorkerRange, ZbdError> {
    let zone_size_bytes = device.zone_size_bytes();
    let start_aligned = range.file_offset % zone_size_bytes == 0;
    let end_aligned = range.end() % zone_size_bytes == 0;

    if (start_aligned && end_aligned) || !overlaps_sequential_zone(device, range) {
        return Ok(range);
    }

    let new_start = if start_aligned {
        range.file_offset
    } else {
        (range.file_offset / zone_size_bytes + 1) * zone_size_bytes
    };
    let new_end = if end_aligned {
        range.end()
    } else {
        (range.end() / zone_size_bytes) * zone_size_bytes
    };

    if new_end <= new_start {
        return Err(ZbdError::RangeTooShort {
            path: device.path.clone(),
            file_offset: range.file_offset,
            io_size: range.io_size,
            zone_size: device.zone_size,
        });
    }

    let new_io_size = new_end - new_start;
    if new_io_size < zone_size_bytes {
        return Err(ZbdError::RangeTooShort {
            path: device.path.clone(),
            file_offset: range.file_offset,
            io_size: range.io_size,
            zone_size: device.zone_size,
        });
    }

    warn!(
        path = %device.path.display(),
        old_offset = range.file_offset,
        old_size = range.io_size,
        new_offset = new_start,
        new_size = new_io_size,
        "rounded worker range to zone boundaries",
    );

    Ok(WorkerRange {
        file_offset: new_start,
        io_size: new_io_size,
    })
}

/// Verification replays writes at the minimum block size and must never
/// straddle a zone, so every configured block size must divide the zone
/// size evenly when verification is enabled.
pub fn check_block_size_divisibility(
    device: &DeviceDescriptor,
    block_sizes: &[u64],
) -> Result<(), ZbdError> {
    let zone_size_bytes = device.zone_size_bytes();
    for &bs in block_sizes {
        if zone_size_bytes % bs != 0 {
            return Err(ZbdError::BlockSizeNotAligned {
                path: device.path.clone(),
                bs,
                zone_size: zone_size_bytes,
            });
        }
    }
    Ok(())
}

/// Host-managed devices may not be written through the page cache: buffered
/// writes can silently reorder with respect to the write pointer and break
/// the sequential-write-required contract.
pub fn check_direct_io(
    device: &DeviceDescriptor,
    writes: bool,
    direct_io: bool,
) -> Result<(), ZbdError> {
    use crate::device::ZonedModel;

    if device.model == ZonedModel::HostManaged && writes && !direct_io {
        return Err(ZbdError::BufferedWriteToHostManaged {
            path: device.path.clone(),
        });
    }
    Ok(())
}
