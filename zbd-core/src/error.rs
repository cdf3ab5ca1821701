//! Typed error hierarchy for the zoned block device core.
//!
//! Discovery and configuration errors abort job initialization; runtime
//! adjustment errors are represented separately as `Decision::Eof` (see
//! `crate::adjust`) since the engine treats them as recoverable end-of-file
//! conditions rather than hard failures.

use std::path::PathBuf;

use nix::errno::Errno;
use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ZbdError {
    #[snafu(display("failed to read zoned model of {}: {}", path.display(), source))]
    ReadZonedModel {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("{} reports an unrecognized zoned model {:?}", path.display(), value))]
    UnknownZonedModel {
        path: PathBuf,
        value: String,
    },

    #[snafu(display("zone report ioctl failed for {}: {}", path.display(), source))]
    ZoneReport {
        path: PathBuf,
        source: Errno,
    },

    #[snafu(display(
        "{} reports non-uniform zone sizes ({} then {}); only uniform zone \
         layouts are supported",
        path.display(),
        expected,
        got
    ))]
    NonuniformZoneSize {
        path: PathBuf,
        expected: u64,
        got: u64,
    },

    #[snafu(display(
        "{} reports zone geometry inconsistent with its reported zone count: \
         zone starting at sector {} does not follow the uniform layout",
        path.display(),
        start
    ))]
    GeometryMismatch {
        path: PathBuf,
        start: u64,
    },

    #[snafu(display(
        "configured zone size ({} sectors) does not match {}'s reported \
         zone size ({} sectors)",
        configured,
        path.display(),
        actual
    ))]
    ZoneSizeMismatch {
        path: PathBuf,
        configured: u64,
        actual: u64,
    },

    #[snafu(display("zone size is required for non-ZBD device {}", path.display()))]
    ZoneSizeRequired {
        path: PathBuf,
    },

    #[snafu(display(
        "range [{file_offset}, {}) for {} is shorter than one zone ({zone_size} \
         sectors) after rounding to zone boundaries",
        file_offset + io_size,
        path.display()
    ))]
    RangeTooShort {
        path: PathBuf,
        file_offset: u64,
        io_size: u64,
        zone_size: u64,
    },

    #[snafu(display(
        "block size {bs} does not divide zone size {zone_size} bytes for {}; \
         verification would straddle a zone boundary",
        path.display()
    ))]
    BlockSizeNotAligned {
        path: PathBuf,
        bs: u64,
        zone_size: u64,
    },

    #[snafu(display(
        "{} is host-managed and requires direct I/O for writers, but buffered \
         I/O is configured",
        path.display()
    ))]
    BufferedWriteToHostManaged {
        path: PathBuf,
    },

    #[snafu(display("reset ioctl failed for {}: {}", path.display(), source))]
    ResetFailed {
        path: PathBuf,
        source: Errno,
    },
}

pub type Result<T, E = ZbdError> = std::result::Result<T, E>;

/// Errors plausibly caused by a sequential-write violation rather than a
/// genuine device fault. Used by the engine's error classifier to decide
/// whether a failed I/O should be retried against a freshly reset zone.
pub fn unaligned_write(errno: Errno) -> bool {
    matches!(errno, Errno::EIO | Errno::EREMOTEIO)
}
