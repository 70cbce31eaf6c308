//! Leaving the boot services.

use uefi::Status;

use crate::error::BootError;
use crate::firmware::Firmware;
use crate::memory_map::MemoryMap;

/// Proof that the boot services are gone. Only [`exit_boot_services`]
/// makes one, and the firmware handle is consumed doing so.
#[derive(Debug)]
pub struct BootServicesExited {
    _private: (),
}

/// Exits the boot services with the key of `map`.
///
/// The firmware rejects a stale key with `INVALID_PARAMETER`. In that case
/// the map is captured again into the same buffer and the exit is retried
/// exactly once. Nothing that may allocate runs between the refresh and
/// the retry, logging included.
pub fn exit_boot_services<F: Firmware>(
    mut firmware: F,
    map: &mut MemoryMap<'_>,
) -> Result<BootServicesExited, BootError> {
    match unsafe { firmware.exit_boot_services(map.key()) } {
        Ok(()) => return Ok(BootServicesExited { _private: () }),
        Err(Status::INVALID_PARAMETER) => {}
        Err(status) => return Err(BootError::ExitBootServices(status)),
    }

    map.refresh(&mut firmware)?;
    unsafe { firmware.exit_boot_services(map.key()) }.map_err(BootError::ExitBootServices)?;

    Ok(BootServicesExited { _private: () })
}
