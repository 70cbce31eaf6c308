//! The jump into the kernel.

use crate::frame_buffer::FrameBufferConfig;
use crate::transition::BootServicesExited;

/// Kernel entry signature: System V calling convention, one pointer
/// argument in `rdi`.
#[cfg(target_arch = "x86_64")]
type KernelMain = extern "sysv64" fn(*const FrameBufferConfig);

#[cfg(target_arch = "x86_64")]
type KernelMainBare = extern "sysv64" fn();

/// Physical address of the first kernel instruction, `e_entry` of the image.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EntryPoint(u64);

impl EntryPoint {
    pub const fn new(address: u64) -> Self {
        Self(address)
    }

    pub const fn address(&self) -> u64 {
        self.0
    }

    /// Calls the kernel with a pointer to `config`. If the kernel ever
    /// returns, the processor is halted.
    ///
    /// # Safety
    ///
    /// The kernel image must be loaded, and the address must point at code
    /// with the [`KernelMain`] signature. `config` has to stay where it is
    /// for as long as the kernel reads it.
    pub unsafe fn dispatch(self, _exited: BootServicesExited, config: &FrameBufferConfig) -> ! {
        #[cfg(target_arch = "x86_64")]
        {
            let kernel_main: KernelMain = unsafe { core::mem::transmute(self.0 as usize) };
            kernel_main(config as *const FrameBufferConfig);
        }
        #[cfg(not(target_arch = "x86_64"))]
        let _ = config;

        crate::halt()
    }

    /// Calls the kernel without arguments.
    ///
    /// # Safety
    ///
    /// As for [`EntryPoint::dispatch`].
    pub unsafe fn dispatch_bare(self, _exited: BootServicesExited) -> ! {
        #[cfg(target_arch = "x86_64")]
        {
            let kernel_main: KernelMainBare = unsafe { core::mem::transmute(self.0 as usize) };
            kernel_main();
        }

        crate::halt()
    }
}
