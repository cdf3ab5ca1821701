//! In-memory zone descriptor and the small enums the kernel zone-report
//! ioctl reports back to us.

use std::convert::TryFrom;

use snafu::Snafu;

/// Sector size assumed throughout this crate, per the ZBD convention.
pub const SECTOR_SHIFT: u32 = 9;
pub const SECTOR_SIZE: u64 = 1 << SECTOR_SHIFT;

/// Zone access type, as reported by `BLKREPORTZONE` or synthesized for a
/// non-ZBD device running a ZBD workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneType {
    /// Behaves like an ordinary block range; no write-pointer discipline.
    Conventional,
    /// May only be written at the write pointer; must be reset before being
    /// rewritten.
    SeqwriteRequired,
    /// Prefers sequential writes but does not strictly require them.
    SeqwritePreferred,
}

impl ZoneType {
    pub fn is_sequential(self) -> bool {
        matches!(self, ZoneType::SeqwriteRequired)
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("unknown zone type {:#x} reported by device", raw))]
pub struct UnknownZoneType {
    raw: u8,
}

impl TryFrom<u8> for ZoneType {
    type Error = UnknownZoneType;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            1 => Ok(ZoneType::Conventional),
            2 => Ok(ZoneType::SeqwriteRequired),
            3 => Ok(ZoneType::SeqwritePreferred),
            _ => Err(UnknownZoneType {
                raw,
            }),
        }
    }
}

/// Coarse-grained zone condition, as reported by `BLKREPORTZONE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneCondition {
    /// Zone has no concept of a write pointer (conventional zones).
    NotWp,
    Empty,
    ImplicitOpen,
    ExplicitOpen,
    Closed,
    Full,
    Readonly,
    Offline,
}

#[derive(Debug, Snafu)]
#[snafu(display("unknown zone condition {:#x} reported by device", raw))]
pub struct UnknownZoneCondition {
    raw: u8,
}

impl TryFrom<u8> for ZoneCondition {
    type Error = UnknownZoneCondition;

    fn try_from(raw: u8) -> Result<Self, Self::Error> {
        match raw {
            0x0 => Ok(ZoneCondition::NotWp),
            0x1 => Ok(ZoneCondition::Empty),
            0x2 => Ok(ZoneCondition::ImplicitOpen),
            0x3 => Ok(ZoneCondition::ExplicitOpen),
            0x4 => Ok(ZoneCondition::Closed),
            0xd => Ok(ZoneCondition::Readonly),
            0xe => Ok(ZoneCondition::Full),
            0xf => Ok(ZoneCondition::Offline),
            _ => Err(UnknownZoneCondition {
                raw,
            }),
        }
    }
}

/// Mutable, lock-protected portion of a zone descriptor. Everything in here
/// is only ever touched while the zone's lock is held.
#[derive(Debug, Clone, Copy)]
pub struct ZoneState {
    /// Current write pointer, in sectors, absolute (not zone-relative).
    pub wp: u64,
    pub cond: ZoneCondition,
    /// Next block index to serve during a VERIFYING replay.
    pub verify_block: u64,
    /// Lazy reset requested, to be performed on the next write attempt.
    pub reset_zone: bool,
}

/// One zone (or the trailing sentinel) of a device's zone model.
///
/// The mutable fields live behind an `Arc`-aware `parking_lot` mutex so that
/// a locked zone's guard can be handed off from the adjuster to the
/// post-submit hook across an arbitrary number of intervening calls (see
/// `crate::adjust` and `crate::post_submit`), without the self-referential
/// lifetime that a borrowed `MutexGuard` would require.
pub struct ZoneDescriptor {
    /// First sector of the zone. For the sentinel, the end of the device.
    pub start: u64,
    pub zone_type: ZoneType,
    pub state: std::sync::Arc<parking_lot::Mutex<ZoneState>>,
}

pub type ZoneGuard = parking_lot::lock_api::ArcMutexGuard<
    parking_lot::RawMutex,
    ZoneState,
>;

impl ZoneDescriptor {
    pub fn new(start: u64, zone_type: ZoneType, initial: ZoneState) -> Self {
        Self {
            start,
            zone_type,
            state: std::sync::Arc::new(parking_lot::Mutex::new(initial)),
        }
    }

    /// Sentinel zone: marks the end of the device. Never locked in the
    /// adjuster's normal path; `zone_type` is conventional so that any
    /// accidental lookup that reaches it takes the unrestricted fast path
    /// rather than blocking.
    pub fn sentinel(end: u64) -> Self {
        Self::new(
            end,
            ZoneType::Conventional,
            ZoneState {
                wp: end,
                cond: ZoneCondition::NotWp,
                verify_block: 0,
                reset_zone: false,
            },
        )
    }

    /// Acquire the zone's lock, consuming a clone of the reference-counted
    /// mutex so the resulting guard can outlive this call.
    pub fn lock_arc(&self) -> ZoneGuard {
        parking_lot::lock_api::Mutex::lock_arc(&self.state)
    }
}
