//! The boot sequence, from the first memory map to the hand-off.

use core::fmt;

use uefi::cstr16;
use uefi::CStr16;

use crate::entry::EntryPoint;
use crate::error::BootError;
use crate::firmware::Firmware;
use crate::frame_buffer::FrameBufferConfig;
use crate::graphics;
use crate::image;
use crate::memory_map;
use crate::memory_map::MemoryMap;
use crate::transition;
use crate::transition::BootServicesExited;

pub const KERNEL_PATH: &CStr16 = cstr16!("\\kernel.elf");
pub const MEMORY_MAP_PATH: &CStr16 = cstr16!("\\memmap");

/// Value every frame buffer byte is set to before the kernel runs.
pub const PAINT_VALUE: u8 = 0xff;

/// How the kernel entry point is called.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum EntryArgs {
    /// With a pointer to the [`FrameBufferConfig`].
    #[default]
    FrameBuffer,
    /// Without arguments.
    None,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BootOptions {
    pub save_memory_map: bool,
    pub paint_screen: bool,
    pub entry_args: EntryArgs,
}

impl Default for BootOptions {
    fn default() -> Self {
        Self {
            save_memory_map: true,
            paint_screen: true,
            entry_args: EntryArgs::FrameBuffer,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BootStep {
    GetMemoryMap,
    SaveMemoryMap,
    OpenGraphicsOutput,
    DescribeFrameBuffer,
    LoadKernel,
    ExitBootServices,
}

impl fmt::Display for BootStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BootStep::GetMemoryMap => "get memory map",
            BootStep::SaveMemoryMap => "save memory map",
            BootStep::OpenGraphicsOutput => "open graphics output",
            BootStep::DescribeFrameBuffer => "describe frame buffer",
            BootStep::LoadKernel => "load kernel",
            BootStep::ExitBootServices => "exit boot services",
        })
    }
}

/// The step that failed and why.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BootFailure {
    pub step: BootStep,
    pub error: BootError,
}

impl fmt::Display for BootFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.error)
    }
}

trait AtStep<T> {
    fn at(self, step: BootStep) -> Result<T, BootFailure>;
}

impl<T> AtStep<T> for Result<T, BootError> {
    fn at(self, step: BootStep) -> Result<T, BootFailure> {
        self.map_err(|error| BootFailure { step, error })
    }
}

/// Everything needed to start the kernel once the firmware is gone.
#[derive(Debug)]
pub struct Handoff {
    pub entry: EntryPoint,
    pub frame_buffer: FrameBufferConfig,
    pub entry_args: EntryArgs,
    exited: BootServicesExited,
}

impl Handoff {
    /// Transfers control to the kernel.
    ///
    /// # Safety
    ///
    /// `entry` has to be the entry point of the kernel loaded by [`run`].
    pub unsafe fn enter(self) -> ! {
        let Handoff {
            entry,
            frame_buffer,
            entry_args,
            exited,
        } = self;

        match entry_args {
            EntryArgs::FrameBuffer => unsafe { entry.dispatch(exited, &frame_buffer) },
            EntryArgs::None => unsafe { entry.dispatch_bare(exited) },
        }
    }
}

/// Runs every step up to and including the exit from the boot services.
/// The firmware handle is consumed; on success nothing but the kernel is
/// left to call.
pub fn run<F: Firmware>(
    mut firmware: F,
    buffer: &mut [u8],
    options: &BootOptions,
) -> Result<Handoff, BootFailure> {
    let mut map = MemoryMap::capture(&mut firmware, buffer).at(BootStep::GetMemoryMap)?;
    log::info!(
        "Memory map: {} descriptors of {} bytes, version {}",
        map.len(),
        map.descriptor_size(),
        map.descriptor_version()
    );

    if options.save_memory_map {
        memory_map::record_memory_map(&mut firmware, &map, MEMORY_MAP_PATH)
            .at(BootStep::SaveMemoryMap)?;
        log::info!("Memory map saved to {MEMORY_MAP_PATH}");
    }

    let mode = graphics::discover(&mut firmware).at(BootStep::OpenGraphicsOutput)?;
    let frame_buffer =
        graphics::build_frame_buffer_config(&mode).at(BootStep::DescribeFrameBuffer)?;
    if options.paint_screen {
        unsafe { graphics::paint(&mode, PAINT_VALUE) };
    }

    let kernel = image::load_kernel(&mut firmware, KERNEL_PATH).at(BootStep::LoadKernel)?;
    log::info!("Kernel entry point: {:#x}", kernel.entry.address());

    log::info!("Exiting boot services");
    let exited =
        transition::exit_boot_services(firmware, &mut map).at(BootStep::ExitBootServices)?;

    Ok(Handoff {
        entry: kernel.entry,
        frame_buffer,
        entry_args: options.entry_args,
        exited,
    })
}
