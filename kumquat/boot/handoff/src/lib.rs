//! Everything the loader does between the firmware entry point and the
//! jump into the kernel, written against the [`Firmware`] capability
//! surface so it can run against a fake on the host.
//!
//! The order of operations lives in [`sequence::run`]:
//!
//! 1. capture the memory map into a caller-owned buffer,
//! 2. optionally record it to `\memmap`,
//! 3. find the graphics device and describe its frame buffer,
//! 4. load `\kernel.elf` at its link-time physical addresses,
//! 5. exit the boot services (the firmware handle is consumed here),
//! 6. call the kernel entry point with the frame buffer description.

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod entry;
pub mod error;
pub mod firmware;
pub mod frame_buffer;
pub mod graphics;
pub mod image;
pub mod memory_map;
pub mod sequence;
pub mod transition;

#[cfg(test)]
mod fake;

pub use entry::EntryPoint;
pub use error::BootError;
pub use error::ImageError;
pub use firmware::FileIo;
pub use firmware::Firmware;
pub use frame_buffer::FrameBufferConfig;
pub use frame_buffer::PixelFormat;
pub use memory_map::MapBuffer;
pub use memory_map::MemoryMap;
pub use transition::BootServicesExited;

pub const PAGE_SIZE: usize = 4096;

/// Parks the processor for good.
pub fn halt() -> ! {
    loop {
        #[cfg(target_arch = "x86_64")]
        unsafe {
            core::arch::asm!("cli", "hlt", options(nomem, nostack));
        }
        #[cfg(not(target_arch = "x86_64"))]
        core::hint::spin_loop();
    }
}
