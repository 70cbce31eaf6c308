use core::fmt;

use uefi::Status;

use crate::graphics::FirmwarePixelFormat;

/// Why the kernel image was rejected before anything was copied.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ImageError {
    /// Not an ELF file, or the header/program header table is out of bounds.
    Malformed,
    NotElf64,
    NotX86_64,
    /// Only statically linked executables can be placed at their link addresses.
    NotExecutable,
    NoProgramHeaders,
    /// A loadable segment claims more file bytes than it has memory bytes.
    FileSizeExceedsMemorySize { vaddr: u64 },
    /// A loadable segment points past the end of the file.
    SegmentOutsideFile { vaddr: u64 },
    /// `p_vaddr + p_memsz` does not fit in 64 bits.
    SegmentWrapsAround { vaddr: u64 },
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::Malformed => write!(f, "malformed ELF image"),
            ImageError::NotElf64 => write!(f, "not a 64-bit ELF image"),
            ImageError::NotX86_64 => write!(f, "not an x86_64 ELF image"),
            ImageError::NotExecutable => write!(f, "not a statically linked executable"),
            ImageError::NoProgramHeaders => write!(f, "no program headers"),
            ImageError::FileSizeExceedsMemorySize { vaddr } => {
                write!(f, "segment at {vaddr:#x} has p_filesz > p_memsz")
            }
            ImageError::SegmentOutsideFile { vaddr } => {
                write!(f, "segment at {vaddr:#x} lies outside the file")
            }
            ImageError::SegmentWrapsAround { vaddr } => {
                write!(f, "segment at {vaddr:#x} wraps around the address space")
            }
        }
    }
}

/// Every way booting can fail. All of them are fatal to the boot attempt.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BootError {
    FileNotFound(Status),
    Io(Status),
    OutOfMemory(Status),
    AddressRangeUnavailable(Status),
    /// The memory map buffer has no room at all, or less than the firmware needs.
    BufferTooSmall,
    MemoryMap(Status),
    InvalidImage(ImageError),
    NoLoadSegments,
    /// No device, or the lookup itself failed with the given status.
    GraphicsNotFound(Option<Status>),
    UnsupportedPixelFormat(FirmwarePixelFormat),
    ExitBootServices(Status),
}

impl From<ImageError> for BootError {
    fn from(err: ImageError) -> Self {
        BootError::InvalidImage(err)
    }
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootError::FileNotFound(status) => write!(f, "file not found: {status:?}"),
            BootError::Io(status) => write!(f, "I/O error: {status:?}"),
            BootError::OutOfMemory(status) => write!(f, "out of memory: {status:?}"),
            BootError::AddressRangeUnavailable(status) => {
                write!(f, "address range unavailable: {status:?}")
            }
            BootError::BufferTooSmall => write!(f, "memory map buffer too small"),
            BootError::MemoryMap(status) => write!(f, "can't get memory map: {status:?}"),
            BootError::InvalidImage(err) => write!(f, "invalid kernel image: {err}"),
            BootError::NoLoadSegments => write!(f, "kernel image has no PT_LOAD segments"),
            BootError::GraphicsNotFound(None) => write!(f, "no graphics output device"),
            BootError::GraphicsNotFound(Some(status)) => {
                write!(f, "no graphics output device: {status:?}")
            }
            BootError::UnsupportedPixelFormat(format) => {
                write!(f, "unimplemented pixel format: {format:?}")
            }
            BootError::ExitBootServices(status) => {
                write!(f, "could not exit boot services: {status:?}")
            }
        }
    }
}
