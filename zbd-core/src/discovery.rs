//! Zone discovery: queries the kernel zone-report ioctl for real ZBD
//! devices, or synthesizes a uniform zone layout for a non-ZBD device that a
//! workload has asked to run in zoned mode (§4.1).

use std::{
    fs::File,
    os::unix::io::AsRawFd,
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{
    device::{DeviceDescriptor, ZonedModel},
    error::ZbdError,
    kernel,
    zone::{ZoneCondition, ZoneDescriptor, ZoneState, ZoneType, SECTOR_SIZE},
};

fn div_ceil(a: u64, b: u64) -> u64 {
    (a + b - 1) / b
}

/// Discovers (or synthesizes) the zone model for `path`.
///
/// `configured_zone_size` is the worker's requested zone size in sectors: it
/// is mandatory for non-ZBD devices (there is nothing else to derive it
/// from) and, when present for a real ZBD device, must agree with the
/// device's reported zone size.
pub fn discover(
    path: &Path,
    configured_zone_size: Option<u64>,
) -> Result<DeviceDescriptor, ZbdError> {
    let file = File::open(path).map_err(|source| ZbdError::ReadZonedModel {
        path: path.to_path_buf(),
        source,
    })?;
    let fd = file.as_raw_fd();

    let model = kernel::read_zoned_model(path, fd)?;
    info!(path = %path.display(), ?model, "discovered zoned model");

    if model.is_real_zbd() {
        discover_real(path, fd, model, configured_zone_size)
    } else {
        let zone_size = configured_zone_size.ok_or_else(|| {
            ZbdError::ZoneSizeRequired {
                path: path.to_path_buf(),
            }
        })?;
        synthesize(path, fd, zone_size)
    }
}

fn discover_real(
    path: &Path,
    fd: i32,
    model: ZonedModel,
    configured_zone_size: Option<u64>,
) -> Result<DeviceDescriptor, ZbdError> {
    let nr_zones_total = kernel::read_nr_zones(path, fd)?;

    let mut zones = Vec::new();
    let mut next_sector = 0u64;
    let mut zone_size: Option<u64> = None;

    while (zones.len() as u64) < nr_zones_total {
        let batch = kernel::report_zones(fd, next_sector).map_err(|source| {
            ZbdError::ZoneReport {
                path: path.to_path_buf(),
                source,
            }
        })?;
        if batch.is_empty() {
            break;
        }

        for raw in &batch {
            let size = match zone_size {
                None => {
                    zone_size = Some(raw.len);
                    raw.len
                }
                Some(sz) => sz,
            };
            if raw.len != size {
                return Err(ZbdError::NonuniformZoneSize {
                    path: path.to_path_buf(),
                    expected: size,
                    got: raw.len,
                });
            }
            if raw.start != next_sector {
                return Err(ZbdError::GeometryMismatch {
                    path: path.to_path_buf(),
                    start: raw.start,
                });
            }

            let zone_type = ZoneType::try_from(raw.zone_type).map_err(|_| {
                ZbdError::GeometryMismatch {
                    path: path.to_path_buf(),
                    start: raw.start,
                }
            })?;
            let cond = ZoneCondition::try_from(raw.cond).map_err(|_| {
                ZbdError::GeometryMismatch {
                    path: path.to_path_buf(),
                    start: raw.start,
                }
            })?;

            let wp = match cond {
                ZoneCondition::NotWp => raw.start,
                ZoneCondition::Full => raw.start + size,
                _ => raw.wp,
            };

            zones.push(ZoneDescriptor::new(
                raw.start,
                zone_type,
                ZoneState {
                    wp,
                    cond,
                    verify_block: 0,
                    reset_zone: false,
                },
            ));

            next_sector = raw.start + raw.len;

            if zones.len() as u64 >= nr_zones_total {
                break;
            }
        }
    }

    let zone_size = zone_size.unwrap_or(0);
    if let Some(configured) = configured_zone_size {
        if configured != zone_size {
            return Err(ZbdError::ZoneSizeMismatch {
                path: path.to_path_buf(),
                configured,
                actual: zone_size,
            });
        }
    }

    zones.push(ZoneDescriptor::sentinel(next_sector));
    debug!(path = %path.display(), nr_zones = zones.len() - 1, zone_size, "zone report complete");

    Ok(DeviceDescriptor::new(
        path.to_path_buf(),
        model,
        zone_size,
        zones,
    ))
}

fn synthesize(
    path: &Path,
    fd: i32,
    zone_size: u64,
) -> Result<DeviceDescriptor, ZbdError> {
    let size_bytes = kernel::device_size_bytes(path, fd)?;
    let nr_zones = div_ceil(size_bytes, zone_size * SECTOR_SIZE);

    let mut zones = Vec::with_capacity(nr_zones as usize + 1);
    for i in 0 .. nr_zones {
        let start = i * zone_size;
        zones.push(ZoneDescriptor::new(
            start,
            ZoneType::SeqwriteRequired,
            ZoneState {
                // Treated as entirely written so the first action is an
                // explicit reset.
                wp: start + zone_size,
                cond: ZoneCondition::Empty,
                verify_block: 0,
                reset_zone: false,
            },
        ));
    }
    zones.push(ZoneDescriptor::sentinel(nr_zones * zone_size));

    debug!(path = %path.display(), nr_zones, zone_size, "synthesized zone layout for non-ZBD device");

    Ok(DeviceDescriptor::new(
        path.to_path_buf(),
        ZonedModel::None,
        zone_size,
        zones,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn div_ceil_rounds_up() {
        assert_eq!(div_ceil(10, 3), 4);
        assert_eq!(div_ceil(9, 3), 3);
        assert_eq!(div_ceil(0, 3), 0);
    }

    // Synthesis and real discovery both require a backing fd; the
    // `kernel`-facing slow paths are covered indirectly through
    // `device::tests` and `adjust::tests`, which construct
    // `DeviceDescriptor`s directly without going through this module's I/O.
    #[test]
    fn path_is_threaded_into_errors() {
        let err = ZbdError::ZoneSizeRequired {
            path: PathBuf::from("/dev/nope"),
        };
        assert!(format!("{}", err).contains("/dev/nope"));
    }
}
