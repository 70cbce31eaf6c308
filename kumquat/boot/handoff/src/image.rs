//! Loading the kernel image.
//!
//! The kernel is a statically linked ELF64 executable. Its PT_LOAD
//! segments are placed at their link-time addresses, which are used as
//! physical addresses as is: the firmware runs with an identity map and
//! nothing is relocated.

use core::ptr::NonNull;

use elf::abi::EM_X86_64;
use elf::abi::ET_EXEC;
use elf::abi::PT_LOAD;
use elf::endian::LittleEndian;
use elf::file::Class;
use elf::segment::ProgramHeader;
use elf::ElfBytes;
use uefi::CStr16;
use uefi::Status;

use crate::entry::EntryPoint;
use crate::error::BootError;
use crate::error::ImageError;
use crate::firmware::FileIo;
use crate::firmware::Firmware;
use crate::PAGE_SIZE;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LoadSegment {
    pub file_offset: u64,
    pub virtual_address: u64,
    pub file_size: u64,
    pub memory_size: u64,
}

impl From<ProgramHeader> for LoadSegment {
    fn from(phdr: ProgramHeader) -> Self {
        Self {
            file_offset: phdr.p_offset,
            virtual_address: phdr.p_vaddr,
            file_size: phdr.p_filesz,
            memory_size: phdr.p_memsz,
        }
    }
}

impl LoadSegment {
    fn validate(&self, file_len: usize) -> Result<(), ImageError> {
        let vaddr = self.virtual_address;
        if self.file_size > self.memory_size {
            return Err(ImageError::FileSizeExceedsMemorySize { vaddr });
        }
        if vaddr.checked_add(self.memory_size).is_none() {
            return Err(ImageError::SegmentWrapsAround { vaddr });
        }
        match self.file_offset.checked_add(self.file_size) {
            Some(end) if end <= file_len as u64 => Ok(()),
            _ => Err(ImageError::SegmentOutsideFile { vaddr }),
        }
    }
}

/// The smallest span of addresses covering every loadable segment,
/// `[first, last)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LoadRange {
    pub first: u64,
    pub last: u64,
}

impl LoadRange {
    /// Page the allocation starts at.
    pub fn base(&self) -> u64 {
        self.first & !(PAGE_SIZE as u64 - 1)
    }

    pub fn pages(&self) -> usize {
        (self.last - self.base()).div_ceil(PAGE_SIZE as u64) as usize
    }
}

/// `first` is the lowest `p_vaddr`, `last` the highest `p_vaddr + p_memsz`.
/// `None` if there is nothing to load.
pub fn compute_load_range(segments: impl Iterator<Item = LoadSegment>) -> Option<LoadRange> {
    segments.fold(None, |range, segment| {
        let first = segment.virtual_address;
        let last = segment.virtual_address + segment.memory_size;
        Some(match range {
            None => LoadRange { first, last },
            Some(LoadRange { first: f, last: l }) => LoadRange {
                first: f.min(first),
                last: l.max(last),
            },
        })
    })
}

/// A validated kernel image, borrowing the file contents.
pub struct KernelImage<'data> {
    elf: ElfBytes<'data, LittleEndian>,
    bytes: &'data [u8],
}

impl<'data> KernelImage<'data> {
    pub fn parse(bytes: &'data [u8]) -> Result<Self, ImageError> {
        let elf =
            ElfBytes::<LittleEndian>::minimal_parse(bytes).map_err(|_| ImageError::Malformed)?;

        if elf.ehdr.class != Class::ELF64 {
            return Err(ImageError::NotElf64);
        }
        if elf.ehdr.e_machine != EM_X86_64 {
            return Err(ImageError::NotX86_64);
        }
        if elf.ehdr.e_type != ET_EXEC {
            return Err(ImageError::NotExecutable);
        }
        // `e_phnum == 0` with a nonzero `e_phoff` parses as an empty table.
        match elf.segments() {
            Some(table) if !table.is_empty() => {}
            _ => return Err(ImageError::NoProgramHeaders),
        }

        let image = Self { elf, bytes };
        for segment in image.load_segments() {
            segment.validate(bytes.len())?;
        }

        Ok(image)
    }

    pub fn entry(&self) -> EntryPoint {
        EntryPoint::new(self.elf.ehdr.e_entry)
    }

    /// PT_LOAD entries in program header table order.
    pub fn load_segments(&self) -> impl Iterator<Item = LoadSegment> + 'data {
        self.elf
            .segments()
            .into_iter()
            .flatten()
            .filter(|phdr| phdr.p_type == PT_LOAD)
            .map(LoadSegment::from)
    }

    pub fn load_range(&self) -> Result<LoadRange, BootError> {
        compute_load_range(self.load_segments()).ok_or(BootError::NoLoadSegments)
    }

    /// Copies every loadable segment into `destination`, which stands for
    /// the memory starting at `range.base()`, and zeroes the part of each
    /// segment that has no file bytes. Bytes between segments are left
    /// alone.
    pub fn copy_segments(&self, range: LoadRange, destination: &mut [u8]) {
        for segment in self.load_segments() {
            let src_start = segment.file_offset as usize;
            let src = &self.bytes[src_start..src_start + segment.file_size as usize];

            let dst_start = (segment.virtual_address - range.base()) as usize;
            let dst_end = dst_start + segment.memory_size as usize;
            let (loaded, zeroed) =
                destination[dst_start..dst_end].split_at_mut(segment.file_size as usize);

            loaded.copy_from_slice(src);
            zeroed.fill(0);
        }
    }
}

/// Where the kernel ended up.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LoadedKernel {
    pub entry: EntryPoint,
    pub range: LoadRange,
}

/// A pool allocation holding the whole kernel file.
struct StagingBuffer {
    ptr: NonNull<u8>,
    len: usize,
}

impl StagingBuffer {
    fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }

    fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

fn read_file<F: Firmware>(firmware: &mut F, file: &mut F::File) -> Result<StagingBuffer, BootError> {
    let size = file.size().map_err(BootError::Io)?;
    let len = usize::try_from(size).map_err(|_| BootError::OutOfMemory(Status::BAD_BUFFER_SIZE))?;

    let ptr = firmware.allocate_pool(len).map_err(|status| {
        log::error!("Memory pool allocation failed: {status:?}");
        BootError::OutOfMemory(status)
    })?;
    let mut staging = StagingBuffer { ptr, len };

    match file.read(staging.as_mut_slice()) {
        Ok(read) if read == len => Ok(staging),
        result => {
            let status = result.err().unwrap_or(Status::END_OF_FILE);
            log::error!(
                "Failed to load kernel file to temporary memory: buffer = {:#010x}, size = {}: {:?}",
                ptr.as_ptr() as usize,
                len,
                status
            );
            unsafe { firmware.free_pool(ptr) }.ok();
            Err(BootError::Io(status))
        }
    }
}

fn place_image<F: Firmware>(firmware: &mut F, bytes: &[u8]) -> Result<LoadedKernel, BootError> {
    let image = KernelImage::parse(bytes)?;
    let range = image.load_range()?;
    let pages = range.pages();

    let destination = firmware
        .allocate_pages_at(range.base(), pages)
        .map_err(|status| {
            log::error!(
                "Memory allocation failed for {pages} pages at {:#x}: {status:?}",
                range.base()
            );
            BootError::AddressRangeUnavailable(status)
        })?;
    let destination =
        unsafe { core::slice::from_raw_parts_mut(destination.as_ptr(), pages * PAGE_SIZE) };

    image.copy_segments(range, destination);
    log::info!("Kernel: {:#x} - {:#x}", range.first, range.last);

    Ok(LoadedKernel {
        entry: image.entry(),
        range,
    })
}

/// Reads the kernel file into a temporary buffer, places its segments,
/// and releases the buffer.
pub fn load_kernel<F: Firmware>(firmware: &mut F, path: &CStr16) -> Result<LoadedKernel, BootError> {
    let mut file = firmware.open_file(path).map_err(|status| {
        log::error!("Failed to open file {path}: {status:?}");
        match status {
            Status::NOT_FOUND => BootError::FileNotFound(status),
            status => BootError::Io(status),
        }
    })?;
    let staging = read_file(firmware, &mut file);
    file.close();
    let staging = staging?;

    // The file is fully read before the destination is claimed, so the
    // two never overlap.
    let loaded = place_image(firmware, staging.as_slice());
    let freed = unsafe { firmware.free_pool(staging.ptr) };
    let loaded = loaded?;
    freed.map_err(|status| {
        log::error!("Failed to free pool: {status:?}");
        BootError::Io(status)
    })?;

    Ok(loaded)
}
