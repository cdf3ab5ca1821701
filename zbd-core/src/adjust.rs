//! The I/O Adjuster: the central per-operation function that inspects the
//! target zone, possibly relocates the operation, possibly shrinks it,
//! possibly triggers a reset, and returns a decision to the caller (§4.4).

use std::os::unix::io::RawFd;

use tracing::{debug, trace};

use crate::{
    device::DeviceDescriptor,
    reset,
    worker::{IoDirection, RunState, ZbdFile},
    zone::{ZoneCondition, ZoneGuard, ZoneType, SECTOR_SIZE},
};

/// Outcome of `adjust`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// `io` (possibly modified) may be submitted as-is.
    Accept,
    /// `io` cannot be satisfied in any zone reachable from its original
    /// target; the engine should treat this as end-of-file for the
    /// operation and is free to retry with a new offset.
    Eof,
}

/// A single operation as it flows through the adjuster. Offsets and
/// lengths are in bytes. On `Decision::Accept` for a sequential zone, `lock`
/// holds the zone's lock guard, handed off to `crate::post_submit::post_submit`
/// once the underlying submission finishes.
pub struct Io<'f> {
    pub file: &'f ZbdFile,
    pub direction: IoDirection,
    pub offset: u64,
    pub length: u64,
    pub(crate) lock: Option<ZoneGuard>,
}

impl<'f> Io<'f> {
    pub fn new(
        file: &'f ZbdFile,
        direction: IoDirection,
        offset: u64,
        length: u64,
    ) -> Self {
        Self {
            file,
            direction,
            offset,
            length,
            lock: None,
        }
    }
}

/// Runs `io` through the adjuster. `fd` is the worker's open file
/// descriptor, needed only if a reset is triggered. `quiesce` drains any
/// previously issued asynchronous writes before a synchronous reset is
/// issued; the engine's submission pipeline supplies it (it is out of
/// scope for this crate, see §1).
pub fn adjust(io: &mut Io, fd: RawFd, quiesce: &mut dyn FnMut()) -> Decision {
    let device = &io.file.device;
    let zone_idx = device.zone_index(io.offset);
    let zone = device.zone(zone_idx);

    // Conventional zones, and zones that merely prefer (without requiring)
    // sequential writes, are unrestricted: no pointer discipline to
    // enforce, so no lock is ever taken on their behalf.
    if zone.zone_type != ZoneType::SeqwriteRequired {
        return Decision::Accept;
    }

    if io.direction == IoDirection::Read && io.file.config.read_beyond_wp {
        let cond = zone.lock_arc().cond;
        if cond != ZoneCondition::Offline {
            return Decision::Accept;
        }
    }

    let mut guard = zone.lock_arc();

    match io.direction {
        IoDirection::Read => adjust_read(io, device, zone_idx, guard),
        IoDirection::Write => adjust_write(io, device, zone_idx, guard, fd, quiesce),
        IoDirection::Trim | IoDirection::Sync => {
            io.lock = Some(guard);
            Decision::Accept
        }
    }
}

fn adjust_read(
    io: &mut Io,
    device: &DeviceDescriptor,
    zone_idx: usize,
    mut guard: ZoneGuard,
) -> Decision {
    let zone = device.zone(zone_idx);

    if io.file.runstate() == RunState::Verifying {
        let min_write_bs = io.file.config.write_bs.min.max(1);
        io.offset = zone.start * SECTOR_SIZE + guard.verify_block * min_write_bs;
        guard.verify_block += 1;
        io.lock = Some(guard);
        return Decision::Accept;
    }

    let written_bytes = (guard.wp - zone.start) * SECTOR_SIZE;
    if io.file.config.randomize && written_bytes >= io.length {
        let range = written_bytes - io.length;
        let min_bs = io.file.min_bs(IoDirection::Read).max(1);
        let rel = io.offset - zone.start * SECTOR_SIZE;
        let remapped = (rel % (range + 1)) / min_bs * min_bs;
        io.offset = zone.start * SECTOR_SIZE + remapped;
        io.lock = Some(guard);
        return Decision::Accept;
    }

    let past_wp = io.offset + io.length > guard.wp * SECTOR_SIZE;
    if guard.cond == ZoneCondition::Offline || past_wp {
        drop(guard);
        let (zf, zl) = io.file.zone_range();
        let min_bs = io.file.min_bs(IoDirection::Read).max(1);
        match find_zone(device, zone_idx, zf, zl, min_bs, io.file.config.randomize) {
            Some((idx, g)) => {
                io.offset = device.zone(idx).start * SECTOR_SIZE;
                if io.offset + io.length > g.wp * SECTOR_SIZE {
                    trace!(zone = idx, "relocated read still overruns zone, EOF");
                    return Decision::Eof;
                }
                io.lock = Some(g);
                return Decision::Accept;
            }
            None => return Decision::Eof,
        }
    }

    io.lock = Some(guard);
    Decision::Accept
}

fn adjust_write(
    io: &mut Io,
    device: &DeviceDescriptor,
    zone_idx: usize,
    mut guard: ZoneGuard,
    fd: RawFd,
    quiesce: &mut dyn FnMut(),
) -> Decision {
    let zone = device.zone(zone_idx);
    let zone_size_bytes = device.zone_size_bytes();

    if io.length > zone_size_bytes {
        return Decision::Eof;
    }

    let min_bs = io.file.min_bs(IoDirection::Write).max(1);
    let remaining_sectors = zone.start + device.zone_size - guard.wp;
    if guard.reset_zone || remaining_sectors * SECTOR_SIZE < min_bs {
        quiesce();
        guard.reset_zone = false;
        drop(guard);
        debug!(zone = zone_idx, "zone full or reset pending, resetting before write");
        if reset::reset_range(device, fd, zone.start, device.zone_size).is_err() {
            return Decision::Eof;
        }
        guard = zone.lock_arc();
    }

    io.offset = guard.wp * SECTOR_SIZE;
    if io.offset < io.file.range.file_offset || io.offset >= io.file.range.end() {
        return Decision::Eof;
    }

    let next_start = device.zone(zone_idx + 1).start * SECTOR_SIZE;
    let room = next_start - io.offset;
    if room < min_bs {
        return Decision::Eof;
    }
    if room < io.length {
        io.length = room / min_bs * min_bs;
    }

    io.lock = Some(guard);
    Decision::Accept
}

/// Locates a sequential zone other than `from` whose written region holds
/// at least `required_bytes`, searching forward within `[zf, zl)` first and,
/// for random workloads, backward as well. Returns the zone index and its
/// held lock, or `None` if no candidate is found.
fn find_zone(
    device: &DeviceDescriptor,
    from: usize,
    zf: usize,
    zl: usize,
    required_bytes: u64,
    randomize: bool,
) -> Option<(usize, ZoneGuard)> {
    for idx in from + 1 .. zl {
        if let Some(g) = try_zone(device, idx, required_bytes) {
            return Some((idx, g));
        }
    }
    if randomize {
        for idx in (zf .. from).rev() {
            if let Some(g) = try_zone(device, idx, required_bytes) {
                return Some((idx, g));
            }
        }
    }
    None
}

fn try_zone(
    device: &DeviceDescriptor,
    idx: usize,
    required_bytes: u64,
) -> Option<ZoneGuard> {
    let z = device.zone(idx);
    if z.zone_type != ZoneType::SeqwriteRequired {
        return None;
    }
    let g = z.lock_arc();
    if g.cond == ZoneCondition::Offline {
        return None;
    }
    if (g.wp - z.start) * SECTOR_SIZE >= required_bytes {
        Some(g)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::ZonedModel,
        validator::WorkerRange,
        worker::{BlockSizeRange, VerifyMode, WorkerConfig},
        zone::{ZoneDescriptor, ZoneState},
    };
    use std::{os::unix::io::AsRawFd, sync::Arc};

    fn test_device(zone_size: u64, nr_zones: u64) -> Arc<DeviceDescriptor> {
        let mut zones = Vec::new();
        for i in 0 .. nr_zones {
            zones.push(ZoneDescriptor::new(
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
        zones.push(ZoneDescriptor::sentinel(nr_zones * zone_size));
        Arc::new(DeviceDescriptor::new(
            "/dev/test".into(),
            ZonedModel::HostManaged,
            zone_size,
            zones,
        ))
    }

    fn test_file(device: Arc<DeviceDescriptor>, min_bs: u64) -> ZbdFile {
        let end = device.end_bytes();
        ZbdFile::new(
            device,
            WorkerRange {
                file_offset: 0,
                io_size: end,
            },
            WorkerConfig {
                read_bs: BlockSizeRange {
                    min: min_bs,
                    max: min_bs,
                },
                write_bs: BlockSizeRange {
                    min: min_bs,
                    max: min_bs,
                },
                verify: VerifyMode::Disabled,
                randomize: false,
                read_beyond_wp: false,
                direct_io: true,
                writes: true,
            },
        )
    }

    fn null_fd() -> std::fs::File {
        std::fs::File::open("/dev/null").unwrap()
    }

    #[test]
    fn sequential_writes_fill_zone_then_reset_on_overflow() {
        let zone_size_sectors = 1024 * 1024 / 512; // 1 MiB zone
        let bs = 4096u64;
        let device = test_device(zone_size_sectors, 2);
        let file = test_file(device.clone(), bs);
        let fd = null_fd();

        let writes_per_zone = (zone_size_sectors * 512) / bs;
        let mut noop = || {};
        for i in 0 .. writes_per_zone {
            let mut io = Io::new(&file, IoDirection::Write, i * bs, bs);
            let decision = adjust(&mut io, fd.as_raw_fd(), &mut noop);
            assert_eq!(decision, Decision::Accept);
            assert_eq!(io.offset, i * bs);
            crate::post_submit::post_submit(io, true);
        }

        assert_eq!(device.zone(0).lock_arc().wp, zone_size_sectors);

        // The zone is now full: the next write must trigger a reset and
        // land back at the start of the zone.
        let mut io = Io::new(&file, IoDirection::Write, 0, bs);
        let decision = adjust(&mut io, fd.as_raw_fd(), &mut noop);
        assert_eq!(decision, Decision::Accept);
        assert_eq!(io.offset, 0);
    }

    #[test]
    fn oversized_write_is_eof() {
        let zone_size_sectors = 1024;
        let device = test_device(zone_size_sectors, 2);
        let file = test_file(device, 512);
        let fd = null_fd();
        let mut noop = || {};

        let mut io = Io::new(&file, IoDirection::Write, 0, 2 * zone_size_sectors * 512);
        assert_eq!(adjust(&mut io, fd.as_raw_fd(), &mut noop), Decision::Eof);
    }

    #[test]
    fn conventional_zone_is_never_locked() {
        let zone_size_sectors = 1024;
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
        zones.push(ZoneDescriptor::sentinel(zone_size_sectors));
        let device = Arc::new(DeviceDescriptor::new(
            "/dev/test".into(),
            ZonedModel::HostAware,
            zone_size_sectors,
            zones,
        ));
        let file = test_file(device, 512);
        let fd = null_fd();
        let mut noop = || {};

        let mut io = Io::new(&file, IoDirection::Write, 0, 4096);
        assert_eq!(adjust(&mut io, fd.as_raw_fd(), &mut noop), Decision::Accept);
        assert!(io.lock.is_none());
    }

    #[test]
    fn read_past_wp_falls_over_to_next_zone() {
        let zone_size_sectors = 1024;
        let device = test_device(zone_size_sectors, 2);
        // Zone 0 is empty (wp == start); zone 1 has 4 KiB written.
        {
            let z1 = device.zone(1);
            let mut g = z1.lock_arc();
            g.wp = z1.start + 8; // 8 sectors == 4 KiB
        }
        let file = test_file(device.clone(), 4096);
        let fd = null_fd();
        let mut noop = || {};

        let mut io = Io::new(&file, IoDirection::Read, 0, 4096);
        let decision = adjust(&mut io, fd.as_raw_fd(), &mut noop);
        assert_eq!(decision, Decision::Accept);
        assert_eq!(io.offset, device.zone(1).start * 512);
    }

    #[test]
    fn verifying_replay_is_deterministic() {
        let zone_size_sectors = 1024;
        let device = test_device(zone_size_sectors, 1);
        {
            let z0 = device.zone(0);
            let mut g = z0.lock_arc();
            g.wp = z0.start + 200 * 8; // 100 writes of 4 KiB already applied
        }
        let file = test_file(device, 4096);
        file.set_runstate(RunState::Verifying);
        let fd = null_fd();
        let mut noop = || {};

        for i in 0 .. 100u64 {
            let mut io = Io::new(&file, IoDirection::Read, 0, 4096);
            let decision = adjust(&mut io, fd.as_raw_fd(), &mut noop);
            assert_eq!(decision, Decision::Accept);
            assert_eq!(io.offset, i * 4096);
            crate::post_submit::post_submit(io, true);
        }
    }

    #[test]
    fn random_read_stays_within_written_region() {
        let zone_size_sectors = 256 * 1024 * 1024 / 512;
        let device = test_device(zone_size_sectors, 1);
        {
            let z0 = device.zone(0);
            let mut g = z0.lock_arc();
            g.wp = z0.start + (1024 * 1024 / 512); // 1 MiB written
        }
        let mut file = test_file(device.clone(), 4096);
        file.config.randomize = true;
        let fd = null_fd();
        let mut noop = || {};

        let mut io = Io::new(&file, IoDirection::Read, 200 * 1024 * 1024, 4096);
        let decision = adjust(&mut io, fd.as_raw_fd(), &mut noop);
        assert_eq!(decision, Decision::Accept);
        assert!(io.offset <= 1024 * 1024 - 4096);
        assert_eq!(io.offset % 4096, 0);
    }
}
