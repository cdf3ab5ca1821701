//! Post-Submit Hook: advances the write pointer of a completed write and
//! releases whatever zone lock the adjuster attached to the operation
//! (§4.5).

use tracing::trace;

use crate::{
    adjust::Io,
    worker::IoDirection,
    zone::{ZoneCondition, ZoneType},
};

/// Consumes `io`, applying the effect of a completed submission on the
/// zone's write pointer and releasing its lock. Must be called exactly once
/// per `Io` that `adjust` returned `Decision::Accept` for, regardless of
/// whether the underlying submission succeeded.
pub fn post_submit(io: Io, success: bool) {
    let Io {
        file,
        direction,
        offset,
        length,
        lock,
    } = io;

    let Some(mut guard) = lock else {
        return;
    };

    let device = &file.device;
    let zone_idx = device.zone_index(offset);
    let zone = device.zone(zone_idx);

    if success && zone.zone_type == ZoneType::SeqwriteRequired {
        match direction {
            IoDirection::Write => {
                let next_start = device.zone(zone_idx + 1).start;
                let new_wp = ((offset + length) / crate::zone::SECTOR_SIZE).min(next_start);
                if new_wp == next_start {
                    guard.cond = ZoneCondition::Full;
                } else if guard.cond == ZoneCondition::Empty {
                    guard.cond = ZoneCondition::ImplicitOpen;
                }
                guard.wp = new_wp;
                trace!(zone = zone_idx, wp = guard.wp, "write pointer advanced");
            }
            IoDirection::Trim => {
                debug_assert_eq!(
                    guard.wp, zone.start,
                    "a trim is only issued against an already-empty zone"
                );
            }
            IoDirection::Read | IoDirection::Sync => {}
        }
    }

    // `guard` is dropped here, releasing the zone's mutex.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        adjust::{adjust, Decision},
        device::{DeviceDescriptor, ZonedModel},
        validator::WorkerRange,
        worker::{BlockSizeRange, VerifyMode, WorkerConfig, ZbdFile},
        zone::{ZoneDescriptor, ZoneState},
    };
    use std::{os::unix::io::AsRawFd, sync::Arc};

    fn test_device() -> Arc<DeviceDescriptor> {
        let zone_size = 2048u64; // 1 MiB
        let mut zones = vec![ZoneDescriptor::new(
            0,
            ZoneType::SeqwriteRequired,
            ZoneState {
                wp: 0,
                cond: ZoneCondition::Empty,
                verify_block: 0,
                reset_zone: false,
            },
        )];
        zones.push(ZoneDescriptor::sentinel(zone_size));
        Arc::new(DeviceDescriptor::new(
            "/dev/test".into(),
            ZonedModel::HostManaged,
            zone_size,
            zones,
        ))
    }

    fn test_file(device: Arc<DeviceDescriptor>) -> ZbdFile {
        let end = device.end_bytes();
        ZbdFile::new(
            device,
            WorkerRange {
                file_offset: 0,
                io_size: end,
            },
            WorkerConfig {
                read_bs: BlockSizeRange { min: 4096, max: 4096 },
                write_bs: BlockSizeRange { min: 4096, max: 4096 },
                verify: VerifyMode::Disabled,
                randomize: false,
                read_beyond_wp: false,
                direct_io: true,
                writes: true,
            },
        )
    }

    #[test]
    fn successful_write_advances_wp_and_releases_lock() {
        let device = test_device();
        let file = test_file(device.clone());
        let fd = std::fs::File::open("/dev/null").unwrap();
        let mut noop = || {};

        let mut io = Io::new(&file, IoDirection::Write, 0, 4096);
        assert_eq!(adjust(&mut io, fd.as_raw_fd(), &mut noop), Decision::Accept);
        post_submit(io, true);

        let z = device.zone(0);
        assert_eq!(z.lock_arc().wp, 8); // 4096 bytes == 8 sectors
        assert!(z.state.try_lock().is_some(), "lock must be released");
    }

    #[test]
    fn failed_write_does_not_advance_wp() {
        let device = test_device();
        let file = test_file(device.clone());
        let fd = std::fs::File::open("/dev/null").unwrap();
        let mut noop = || {};

        let mut io = Io::new(&file, IoDirection::Write, 0, 4096);
        assert_eq!(adjust(&mut io, fd.as_raw_fd(), &mut noop), Decision::Accept);
        post_submit(io, false);

        assert_eq!(device.zone(0).lock_arc().wp, 0);
    }

    #[test]
    fn write_reaching_zone_end_marks_it_full() {
        let device = test_device();
        let file = test_file(device.clone());
        {
            let z = device.zone(0);
            let mut g = z.lock_arc();
            g.wp = z.start + 2048 - 8; // one write short of the end
        }
        let fd = std::fs::File::open("/dev/null").unwrap();
        let mut noop = || {};

        let mut io = Io::new(&file, IoDirection::Write, 2040 * 512, 4096);
        assert_eq!(adjust(&mut io, fd.as_raw_fd(), &mut noop), Decision::Accept);
        post_submit(io, true);

        assert_eq!(device.zone(0).lock_arc().cond, ZoneCondition::Full);
    }

    #[test]
    fn conventional_write_is_a_no_op_for_post_submit() {
        let zone_size = 2048u64;
        let mut zones = vec![ZoneDescriptor::new(
            0,
            ZoneType::Conventional,
            ZoneState {
                wp: 0,
                cond: ZoneCondition::NotWp,
                verify_block: 0,
                reset_zone: false,
            },
        )];
        zones.push(ZoneDescriptor::sentinel(zone_size));
        let device = Arc::new(DeviceDescriptor::new(
            "/dev/test".into(),
            ZonedModel::HostAware,
            zone_size,
            zones,
        ));
        let file = test_file(device);
        let fd = std::fs::File::open("/dev/null").unwrap();
        let mut noop = || {};

        let mut io = Io::new(&file, IoDirection::Write, 0, 4096);
        assert_eq!(adjust(&mut io, fd.as_raw_fd(), &mut noop), Decision::Accept);
        assert!(io.lock.is_none());
        post_submit(io, true); // must not panic despite no lock held
    }
}
