//! Raw bindings for the two kernel zoned-block-device ioctls this crate
//! needs (`BLKREPORTZONE`, `BLKRESETZONE`) and the `queue/zoned` sysfs
//! attribute, mirroring `<linux/blkzoned.h>`.
//!
//! Deliberately narrow: this is not a general zoned-storage binding crate,
//! just the two ioctls and the one attribute the adjustment layer needs.

use std::{fs, os::unix::io::RawFd, path::Path};

use nix::{errno::Errno, sys::stat::fstat};

use crate::{device::ZonedModel, error::ZbdError};

/// Maximum number of zone records fetched per `BLKREPORTZONE` call.
pub const ZONE_REPORT_BATCH: u32 = 8192;

pub const BLK_ZONE_TYPE_CONVENTIONAL: u8 = 1;
pub const BLK_ZONE_TYPE_SEQWRITE_REQUIRED: u8 = 2;
pub const BLK_ZONE_TYPE_SEQWRITE_PREFERRED: u8 = 3;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct BlkZone {
    pub start: u64,
    pub len: u64,
    pub wp: u64,
    pub zone_type: u8,
    pub cond: u8,
    pub non_seq: u8,
    pub reset: u8,
    pub resv: [u8; 4],
    pub capacity: u64,
    pub reserved: [u8; 24],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BlkZoneReportHdr {
    pub sector: u64,
    pub nr_zones: u32,
    pub flags: u8,
    pub reserved: [u8; 7],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BlkZoneRange {
    pub sector: u64,
    pub nr_sectors: u64,
}

const BLKZONED_IOCTL_TYPE: u8 = 0x12;
const BLKREPORTZONE_NR: u8 = 130;
const BLKRESETZONE_NR: u8 = 131;

// `BLKREPORTZONE` takes a variable-length buffer (header + N zone records)
// and is both written (the requested sector/count) and read (the returned
// records) in place, which is exactly `_IOWR`.
nix::ioctl_readwrite_bad!(
    blkreportzone_raw,
    nix::request_code_readwrite!(
        BLKZONED_IOCTL_TYPE,
        BLKREPORTZONE_NR,
        std::mem::size_of::<BlkZoneReportHdr>()
    ),
    BlkZoneReportHdr
);

nix::ioctl_write_ptr_bad!(
    blkresetzone_raw,
    nix::request_code_write!(
        BLKZONED_IOCTL_TYPE,
        BLKRESETZONE_NR,
        std::mem::size_of::<BlkZoneRange>()
    ),
    BlkZoneRange
);

const BLKGETSIZE64_NR: u8 = 114;

nix::ioctl_read_bad!(
    blkgetsize64_raw,
    nix::request_code_read!(
        BLKZONED_IOCTL_TYPE,
        BLKGETSIZE64_NR,
        std::mem::size_of::<u64>()
    ),
    u64
);

/// Issues one `BLKREPORTZONE` call starting at `start_sector`, requesting up
/// to `ZONE_REPORT_BATCH` zones. Returns the raw zone records in the
/// response.
pub fn report_zones(
    fd: RawFd,
    start_sector: u64,
) -> Result<Vec<BlkZone>, Errno> {
    let mut buf = vec![
        0u8;
        std::mem::size_of::<BlkZoneReportHdr>()
            + ZONE_REPORT_BATCH as usize * std::mem::size_of::<BlkZone>()
    ];

    {
        let hdr = buf.as_mut_ptr() as *mut BlkZoneReportHdr;
        unsafe {
            (*hdr).sector = start_sector;
            (*hdr).nr_zones = ZONE_REPORT_BATCH;
        }
    }

    unsafe {
        blkreportzone_raw(fd, buf.as_mut_ptr() as *mut BlkZoneReportHdr)?;
    }

    let hdr = unsafe { &*(buf.as_ptr() as *const BlkZoneReportHdr) };
    let nr = hdr.nr_zones as usize;
    let mut zones = Vec::with_capacity(nr);
    let zones_ptr = unsafe {
        buf.as_ptr().add(std::mem::size_of::<BlkZoneReportHdr>())
            as *const BlkZone
    };
    for i in 0 .. nr {
        zones.push(unsafe { *zones_ptr.add(i) });
    }
    Ok(zones)
}

/// Issues `BLKRESETZONE` over `[start_sector, start_sector + nr_sectors)`.
pub fn reset_zone(
    fd: RawFd,
    start_sector: u64,
    nr_sectors: u64,
) -> Result<(), Errno> {
    let range = BlkZoneRange {
        sector: start_sector,
        nr_sectors,
    };
    unsafe {
        blkresetzone_raw(fd, &range)?;
    }
    Ok(())
}

/// Reads `/sys/dev/block/<major>:<minor>/queue/zoned` for the device behind
/// `fd` and maps it to a `ZonedModel`. A device without a zoned queue
/// attribute at all (ordinary, non-ZBD-capable block devices and regular
/// files) is treated as `ZonedModel::None`.
fn queue_dir(path: &Path, fd: RawFd) -> Result<std::path::PathBuf, ZbdError> {
    let st = fstat(fd).map_err(|e| ZbdError::ReadZonedModel {
        path: path.to_path_buf(),
        source: std::io::Error::from_raw_os_error(e as i32),
    })?;

    let major = unsafe { libc::major(st.st_rdev) };
    let minor = unsafe { libc::minor(st.st_rdev) };
    Ok(Path::new("/sys/dev/block")
        .join(format!("{}:{}", major, minor))
        .join("queue"))
}

pub fn read_zoned_model(
    path: &Path,
    fd: RawFd,
) -> Result<ZonedModel, ZbdError> {
    let queue_dir = queue_dir(path, fd)?;

    let raw: Result<String, std::io::Error> =
        sysfs::parse_value(&queue_dir, "zoned");

    let value = match raw {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(ZonedModel::None)
        }
        Err(source) => {
            return Err(ZbdError::ReadZonedModel {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    match value.as_str() {
        "none" => Ok(ZonedModel::None),
        "host-aware" => Ok(ZonedModel::HostAware),
        "host-managed" => Ok(ZonedModel::HostManaged),
        other => Err(ZbdError::UnknownZonedModel {
            path: path.to_path_buf(),
            value: other.to_string(),
        }),
    }
}

/// Number of zones the device reports via `queue/nr_zones`. Used to know
/// when the `BLKREPORTZONE` batch loop has ingested the whole device
/// without having to probe for a short final batch.
pub fn read_nr_zones(path: &Path, fd: RawFd) -> Result<u64, ZbdError> {
    let queue_dir = queue_dir(path, fd)?;
    sysfs::parse_value(&queue_dir, "nr_zones").map_err(|source| {
        ZbdError::ReadZonedModel {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Byte size of the device or regular file behind `fd`. Regular files
/// report their length directly; block devices report zero through
/// `stat(2)` and require the `BLKGETSIZE64` ioctl instead.
pub fn device_size_bytes(path: &Path, fd: RawFd) -> Result<u64, ZbdError> {
    let meta = fs::metadata(path).map_err(|source| ZbdError::ReadZonedModel {
        path: path.to_path_buf(),
        source,
    })?;
    if meta.len() > 0 {
        return Ok(meta.len());
    }

    let mut size: u64 = 0;
    unsafe { blkgetsize64_raw(fd, &mut size) }.map_err(|e| {
        ZbdError::ReadZonedModel {
            path: path.to_path_buf(),
            source: std::io::Error::from_raw_os_error(e as i32),
        }
    })?;
    Ok(size)
}
