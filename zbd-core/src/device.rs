//! Device-level descriptor: the zone table shared by every worker that has
//! opened the same underlying path.

use std::{path::PathBuf, sync::Arc};

use parking_lot::Mutex;

use crate::zone::{ZoneDescriptor, SECTOR_SHIFT, SECTOR_SIZE};

/// Zoned model of a device, as reported by its `queue/zoned` sysfs
/// attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZonedModel {
    /// Not a zoned block device; the crate synthesizes a uniform zone
    /// layout so the workload can still exercise sequential-write rules.
    None,
    HostAware,
    HostManaged,
}

impl ZonedModel {
    pub fn is_real_zbd(self) -> bool {
        matches!(self, ZonedModel::HostAware | ZonedModel::HostManaged)
    }
}

/// Sentinel value of `zone_size_log2` meaning "zone_size is not a power of
/// two; use the slow-path divide".
pub const ZONE_SIZE_LOG2_UNKNOWN: u32 = u32::MAX;

/// One entry in the sharing registry: the zone model and geometry of a
/// single device path, plus the number of workers currently referencing it.
pub struct DeviceDescriptor {
    pub path: PathBuf,
    pub model: ZonedModel,
    /// Uniform zone length, in sectors.
    pub zone_size: u64,
    /// log2(zone_size in bytes), or `ZONE_SIZE_LOG2_UNKNOWN`.
    pub zone_size_log2: u32,
    pub nr_zones: u64,
    /// `nr_zones + 1` entries; the last is the sentinel (§3).
    pub zones: Vec<ZoneDescriptor>,
    refcount: Mutex<usize>,
}

impl DeviceDescriptor {
    pub fn new(
        path: PathBuf,
        model: ZonedModel,
        zone_size: u64,
        zones: Vec<ZoneDescriptor>,
    ) -> Self {
        let nr_zones = zones.len() as u64 - 1;
        let zone_size_bytes = zone_size * SECTOR_SIZE;
        let zone_size_log2 = if zone_size_bytes.is_power_of_two() {
            zone_size_bytes.trailing_zeros()
        } else {
            ZONE_SIZE_LOG2_UNKNOWN
        };

        Self {
            path,
            model,
            zone_size,
            zone_size_log2,
            nr_zones,
            zones,
            refcount: Mutex::new(1),
        }
    }

    /// Maps a byte offset to a zone index, clamped to `nr_zones` (the
    /// sentinel) for any out-of-range offset. Uses the shifted fast path
    /// when `zone_size` is a power-of-two number of bytes.
    pub fn zone_index(&self, offset_bytes: u64) -> usize {
        let idx = if self.zone_size_log2 != ZONE_SIZE_LOG2_UNKNOWN {
            offset_bytes >> self.zone_size_log2
        } else {
            (offset_bytes >> SECTOR_SHIFT) / self.zone_size
        };
        idx.min(self.nr_zones) as usize
    }

    pub fn zone(&self, index: usize) -> &ZoneDescriptor {
        &self.zones[index]
    }

    pub fn zone_of(&self, offset_bytes: u64) -> &ZoneDescriptor {
        self.zone(self.zone_index(offset_bytes))
    }

    pub fn zone_size_bytes(&self) -> u64 {
        self.zone_size * SECTOR_SIZE
    }

    /// Byte offset of the end of the device (the sentinel's `start`).
    pub fn end_bytes(&self) -> u64 {
        self.zones[self.nr_zones as usize].start * SECTOR_SIZE
    }

    pub(crate) fn incref(&self) {
        *self.refcount.lock() += 1;
    }

    /// Decrement the refcount, returning true if this was the last
    /// reference (the caller should then drop the descriptor from the
    /// registry).
    pub(crate) fn decref(&self) -> bool {
        let mut rc = self.refcount.lock();
        *rc -= 1;
        *rc == 0
    }

    #[cfg(test)]
    pub(crate) fn refcount(&self) -> usize {
        *self.refcount.lock()
    }
}

/// Convenience handle returned to workers: a reference-counted pointer to
/// the shared device descriptor.
pub type SharedDevice = Arc<DeviceDescriptor>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::{ZoneCondition, ZoneState, ZoneType};

    fn zones(nr: u64, zone_size: u64) -> Vec<ZoneDescriptor> {
        let mut v = Vec::new();
        for i in 0 .. nr {
            v.push(ZoneDescriptor::new(
                i * zone_size,
                ZoneType::SeqwriteRequired,
                ZoneState {
                    wp: i * zone_size,
                    cond: ZoneCondition::Empty,
                    verify_block: 0,
                    reset_zone: false,
                },
            ));
        }
        v.push(ZoneDescriptor::sentinel(nr * zone_size));
        v
    }

    #[test]
    fn zone_index_power_of_two() {
        // 256 MiB zones -> 512 Ki sectors, a power of two in bytes.
        let zone_size = 256 * 1024 * 1024 / 512;
        let dev =
            DeviceDescriptor::new("/dev/x".into(), ZonedModel::HostManaged, zone_size, zones(4, zone_size));
        assert_ne!(dev.zone_size_log2, ZONE_SIZE_LOG2_UNKNOWN);
        assert_eq!(dev.zone_index(0), 0);
        assert_eq!(dev.zone_index(256 * 1024 * 1024), 1);
        assert_eq!(dev.zone_index(4 * 256 * 1024 * 1024), 4); // sentinel
        assert_eq!(dev.zone_index(100 * 256 * 1024 * 1024), 4); // clamped
    }

    #[test]
    fn zone_index_non_power_of_two() {
        let zone_size = 100 * 1024 * 1024 / 512; // 100 MiB, not a power of two
        let dev =
            DeviceDescriptor::new("/dev/x".into(), ZonedModel::HostManaged, zone_size, zones(3, zone_size));
        assert_eq!(dev.zone_size_log2, ZONE_SIZE_LOG2_UNKNOWN);
        assert_eq!(dev.zone_index(0), 0);
        assert_eq!(dev.zone_index(100 * 1024 * 1024 + 1), 1);
        assert_eq!(dev.zone_index(300 * 1024 * 1024), 3);
    }

    #[test]
    fn refcount_tracks_attach_detach() {
        let dev = DeviceDescriptor::new(
            "/dev/x".into(),
            ZonedModel::HostManaged,
            1024,
            zones(2, 1024),
        );
        assert_eq!(dev.refcount(), 1);
        dev.incref();
        assert_eq!(dev.refcount(), 2);
        assert!(!dev.decref());
        assert_eq!(dev.refcount(), 1);
        assert!(dev.decref());
    }
}
