#![no_std]
#![no_main]
#![deny(unsafe_op_in_unsafe_fn)]

mod firmware;

use boot_handoff::sequence;
use boot_handoff::sequence::BootOptions;
use boot_handoff::sequence::EntryArgs;
use boot_handoff::MapBuffer;
use boot_logger::BootLoaderConfig;
use uefi::boot;
use uefi::proto::media::file::File;
use uefi::proto::media::file::FileAttribute;
use uefi::proto::media::file::FileMode;
use uefi::system;
use uefi::CStr16;
use uefi::Status;

use crate::firmware::UefiFirmware;

/// The name of the configuration file in the ESP partition alongside the loader.
const KUMQUAT_INI: &CStr16 = uefi::cstr16!("kumquat-boot.ini");

/// Upon panic, b"KUMQBARF" is loaded into R8. R9 contains the address of the file name,
/// R10 contains the line number in the least significant 32 bits, and the column number
/// in the most significant 32 bits.
/// The interrupts are disabled and the processor is halted.
#[cfg(target_os = "uefi")]
const KUMQUAT_BARF: u64 = u64::from_le_bytes(*b"KUMQBARF");

/// Room for the memory map, on the loader stack.
const MEMORY_MAP_BUFFER_SIZE: usize = 4096 * 4;

fn get_config() -> BootLoaderConfig {
    let Ok(mut fs) = boot::get_image_file_system(boot::image_handle()) else {
        return BootLoaderConfig::default();
    };
    let Ok(mut root_directory) = fs.open_volume() else {
        return BootLoaderConfig::default();
    };
    let Ok(file) = root_directory.open(KUMQUAT_INI, FileMode::Read, FileAttribute::empty()) else {
        return BootLoaderConfig::default();
    };
    let Some(mut file) = file.into_regular_file() else {
        return BootLoaderConfig::default();
    };

    let mut buf = [0_u8; 4096];
    let bytes_read: usize = file.read(&mut buf).unwrap_or_default();
    file.close();

    BootLoaderConfig::parse(&buf[..bytes_read])
}

fn report_uefi_info() {
    let fw_revision = system::firmware_revision();
    let uefi_revision = system::uefi_revision();
    log::info!(
        "Firmware revision {:x}.{:x}, UEFI revision {uefi_revision}",
        fw_revision >> 16,
        fw_revision as u16
    );
}

#[cfg(target_os = "uefi")]
#[panic_handler]
fn panic(panic: &core::panic::PanicInfo<'_>) -> ! {
    log::error!("{panic}");

    let (file_name_addr, line_col) = if let Some(location) = panic.location() {
        (
            location.file().as_ptr() as u64,
            (location.line() as u64) | (location.column() as u64) << 32_u64,
        )
    } else {
        (0, 0)
    };

    loop {
        unsafe {
            core::arch::asm!("cli", options(nomem, nostack));
            core::arch::asm!(
                "hlt",
                in("r8") KUMQUAT_BARF,
                in("r9") file_name_addr,
                in("r10") line_col,
                options(att_syntax, nomem, nostack),
            );
        }
    }
}

#[cfg(target_arch = "x86_64")]
#[no_mangle]
extern "efiapi" fn __chkstk() {}

#[uefi::entry]
fn main() -> Status {
    let config = get_config();
    boot_logger::setup_logger(&config).ok();

    log::info!("Loading **Kumquat**");
    report_uefi_info();

    let options = BootOptions {
        save_memory_map: config.save_memory_map,
        paint_screen: config.paint_screen,
        entry_args: if config.bare_entry {
            EntryArgs::None
        } else {
            EntryArgs::FrameBuffer
        },
    };

    let mut buffer = MapBuffer::<MEMORY_MAP_BUFFER_SIZE>::new();
    match sequence::run(
        UefiFirmware::new(boot::image_handle()),
        buffer.as_mut_slice(),
        &options,
    ) {
        Ok(handoff) => unsafe { handoff.enter() },
        Err(failure) => {
            log::error!("{failure}");
            boot_handoff::halt()
        }
    }
}
