//! Memory map snapshots and their text dump.

use core::fmt;
use core::fmt::Write;

use uefi::mem::memory_map::MemoryDescriptor;
use uefi::mem::memory_map::MemoryMap as _;
use uefi::mem::memory_map::MemoryMapKey;
use uefi::mem::memory_map::MemoryMapMeta;
use uefi::mem::memory_map::MemoryMapRef;
use uefi::mem::memory_map::MemoryType;
use uefi::CStr16;
use uefi::Status;

use crate::error::BootError;
use crate::firmware::FileIo;
use crate::firmware::Firmware;
use crate::firmware::MapKey;

/// Size of the firmware descriptor: u32 type, 4 bytes of padding,
/// physical start, virtual start, page count, attributes. Newer firmware
/// may report a larger stride.
pub const MEMORY_DESCRIPTOR_SIZE: usize = core::mem::size_of::<MemoryDescriptor>();

/// The recorder keeps only the low 20 attribute bits: caching, protection
/// and the runtime-irrelevant ones.
pub const ATTRIBUTE_DUMP_MASK: u64 = 0xfffff;

pub const MEMORY_MAP_HEADER: &str =
    "Index, Type, Type(name), PhysicalStart, NumberOfPages, Attribute\n";

/// Storage for a memory map, aligned the way the firmware wants it.
#[repr(C, align(8))]
pub struct MapBuffer<const N: usize>([u8; N]);

impl<const N: usize> MapBuffer<N> {
    pub const fn new() -> Self {
        Self([0; N])
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

impl<const N: usize> Default for MapBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Firmware name of a memory type.
pub fn memory_type_name(memory_type: MemoryType) -> &'static str {
    match memory_type {
        MemoryType::RESERVED => "EfiReservedMemoryType",
        MemoryType::LOADER_CODE => "EfiLoaderCode",
        MemoryType::LOADER_DATA => "EfiLoaderData",
        MemoryType::BOOT_SERVICES_CODE => "EfiBootServicesCode",
        MemoryType::BOOT_SERVICES_DATA => "EfiBootServicesData",
        MemoryType::RUNTIME_SERVICES_CODE => "EfiRuntimeServicesCode",
        MemoryType::RUNTIME_SERVICES_DATA => "EfiRuntimeServicesData",
        MemoryType::CONVENTIONAL => "EfiConventionalMemory",
        MemoryType::UNUSABLE => "EfiUnusableMemory",
        MemoryType::ACPI_RECLAIM => "EfiACPIReclaimMemory",
        MemoryType::ACPI_NON_VOLATILE => "EfiACPIMemoryNVS",
        MemoryType::MMIO => "EfiMemoryMappedIO",
        MemoryType::MMIO_PORT_SPACE => "EfiMemoryMappedIOPortSpace",
        MemoryType::PAL_CODE => "EfiPalCode",
        MemoryType::PERSISTENT_MEMORY => "EfiPersistentMemory",
        MAX_MEMORY_TYPE => "EfiMaxMemoryType",
        _ => "InvalidMemoryType",
    }
}

/// First code past the types defined by the firmware specification.
const MAX_MEMORY_TYPE: MemoryType = MemoryType(15);

/// A point-in-time memory map held in a caller-owned buffer.
#[derive(Debug)]
pub struct MemoryMap<'buf> {
    buffer: &'buf mut [u8],
    map_size: usize,
    map_key: MapKey,
    descriptor_size: usize,
    descriptor_version: u32,
}

impl<'buf> MemoryMap<'buf> {
    /// Takes a snapshot into `buffer`. Doesn't allocate, so the key stays
    /// valid until the caller allocates or frees something.
    pub fn capture<F: Firmware>(
        firmware: &mut F,
        buffer: &'buf mut [u8],
    ) -> Result<Self, BootError> {
        let mut map = Self {
            buffer,
            map_size: 0,
            map_key: MapKey(0),
            descriptor_size: MEMORY_DESCRIPTOR_SIZE,
            descriptor_version: 0,
        };
        map.refresh(firmware)?;
        Ok(map)
    }

    /// Takes a fresh snapshot into the same buffer.
    pub fn refresh<F: Firmware>(&mut self, firmware: &mut F) -> Result<(), BootError> {
        if self.buffer.is_empty() {
            return Err(BootError::BufferTooSmall);
        }

        let info = firmware
            .get_memory_map(self.buffer)
            .map_err(|status| match status {
                Status::BUFFER_TOO_SMALL => BootError::BufferTooSmall,
                status => BootError::MemoryMap(status),
            })?;

        let meta = MemoryMapMeta {
            map_size: info.map_size,
            desc_size: info.descriptor_size,
            map_key: MemoryMapKey::default(),
            desc_version: info.descriptor_version,
        };
        if info.descriptor_size < MEMORY_DESCRIPTOR_SIZE
            || MemoryMapRef::new(&*self.buffer, meta).is_err()
        {
            return Err(BootError::MemoryMap(Status::INVALID_PARAMETER));
        }

        self.map_size = info.map_size;
        self.map_key = info.map_key;
        self.descriptor_size = info.descriptor_size;
        self.descriptor_version = info.descriptor_version;

        Ok(())
    }

    pub fn key(&self) -> MapKey {
        self.map_key
    }

    pub fn map_size(&self) -> usize {
        self.map_size
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer.len()
    }

    pub fn descriptor_size(&self) -> usize {
        self.descriptor_size
    }

    pub fn descriptor_version(&self) -> u32 {
        self.descriptor_version
    }

    pub fn len(&self) -> usize {
        self.map_size / self.descriptor_size
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Typed view over the descriptors, walked by the firmware stride in
    /// enumeration order. Can be taken any number of times.
    pub fn view(&self) -> Result<MemoryMapRef<'_>, BootError> {
        let meta = MemoryMapMeta {
            map_size: self.map_size,
            desc_size: self.descriptor_size,
            map_key: MemoryMapKey::default(),
            desc_version: self.descriptor_version,
        };
        MemoryMapRef::new(&*self.buffer, meta)
            .map_err(|_| BootError::MemoryMap(Status::INVALID_PARAMETER))
    }
}

/// Formats one line without an allocator.
struct LineBuffer {
    bytes: [u8; 256],
    len: usize,
}

impl LineBuffer {
    fn new() -> Self {
        Self {
            bytes: [0; 256],
            len: 0,
        }
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }
}

impl fmt::Write for LineBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let end = self.len + s.len();
        if end > self.bytes.len() {
            return Err(fmt::Error);
        }
        self.bytes[self.len..end].copy_from_slice(s.as_bytes());
        self.len = end;
        Ok(())
    }
}

/// Writes the map as comma separated text: the header line, then one
/// line per descriptor. Stops at the first failed write; whatever was
/// written stays written.
pub fn save_memory_map<S: FileIo>(map: &MemoryMap<'_>, sink: &mut S) -> Result<(), BootError> {
    sink.write(MEMORY_MAP_HEADER.as_bytes())
        .map_err(BootError::Io)?;

    log::debug!(
        "map->buffer = {:#010x}, map->map_size = {:#010x}",
        map.buffer.as_ptr() as usize,
        map.map_size
    );

    let view = map.view()?;
    for (index, desc) in view.entries().enumerate() {
        let mut line = LineBuffer::new();
        // 256 bytes fit the longest possible record
        writeln!(
            line,
            "{}, {:x}, {}, {:08x}, {:x}, {:x}",
            index,
            desc.ty.0,
            memory_type_name(desc.ty),
            desc.phys_start,
            desc.page_count,
            desc.att.bits() & ATTRIBUTE_DUMP_MASK
        )
        .map_err(|_| BootError::Io(Status::BUFFER_TOO_SMALL))?;

        sink.write(line.as_bytes()).map_err(BootError::Io)?;
    }

    Ok(())
}

/// Replaces the file at `path` with the text dump of `map`.
pub fn record_memory_map<F: Firmware>(
    firmware: &mut F,
    map: &MemoryMap<'_>,
    path: &CStr16,
) -> Result<(), BootError> {
    let mut file = firmware.create_file(path).map_err(BootError::Io)?;
    let saved = save_memory_map(map, &mut file);
    file.close();
    saved
}
