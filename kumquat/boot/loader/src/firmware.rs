//! [`Firmware`] on top of the UEFI boot services.

use core::ptr::NonNull;

use boot_handoff::firmware::MapKey;
use boot_handoff::firmware::MemoryMapInfo;
use boot_handoff::graphics::FirmwarePixelFormat;
use boot_handoff::graphics::GraphicsMode;
use boot_handoff::FileIo;
use boot_handoff::Firmware;
use uefi::boot;
use uefi::boot::AllocateType;
use uefi::boot::MemoryType;
use uefi::boot::OpenProtocolAttributes;
use uefi::boot::OpenProtocolParams;
use uefi::boot::SearchType;
use uefi::proto::console::gop::GraphicsOutput;
use uefi::proto::console::gop::PixelFormat;
use uefi::proto::media::file::Directory;
use uefi::proto::media::file::File;
use uefi::proto::media::file::FileAttribute;
use uefi::proto::media::file::FileMode;
use uefi::proto::media::file::RegularFile;
use uefi::table;
use uefi::CStr16;
use uefi::Handle;
use uefi::Status;

pub struct UefiFirmware {
    image: Handle,
}

impl UefiFirmware {
    pub fn new(image: Handle) -> Self {
        Self { image }
    }

    /// Root of the volume the loader was started from.
    fn root_directory(&self) -> Result<Directory, Status> {
        let mut fs = boot::get_image_file_system(self.image).map_err(|e| e.status())?;
        fs.open_volume().map_err(|e| e.status())
    }

    fn open(&self, path: &CStr16, mode: FileMode) -> Result<RegularFile, Status> {
        self.root_directory()?
            .open(path, mode, FileAttribute::empty())
            .map_err(|e| e.status())?
            .into_regular_file()
            .ok_or(Status::INVALID_PARAMETER)
    }

    fn boot_services(&self) -> Result<NonNull<uefi_raw::table::boot::BootServices>, Status> {
        let st = table::system_table_raw().ok_or(Status::UNSUPPORTED)?;
        NonNull::new(unsafe { st.as_ref() }.boot_services).ok_or(Status::UNSUPPORTED)
    }
}

pub struct UefiFile(RegularFile);

impl FileIo for UefiFile {
    fn size(&mut self) -> Result<u64, Status> {
        self.0
            .set_position(RegularFile::END_OF_FILE)
            .map_err(|e| e.status())?;
        let size = self.0.get_position().map_err(|e| e.status())?;
        self.0.set_position(0).map_err(|e| e.status())?;
        Ok(size)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Status> {
        self.0.read(buffer).map_err(|e| e.status())
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Status> {
        self.0.write(data).map_err(|e| e.status())
    }

    fn close(self) {
        self.0.close();
    }
}

unsafe impl Firmware for UefiFirmware {
    type File = UefiFile;

    fn get_memory_map(&mut self, buffer: &mut [u8]) -> Result<MemoryMapInfo, Status> {
        // The map key is needed as is for the exit, so the raw call is used
        // rather than the allocating wrapper.
        let bs = self.boot_services()?;
        let mut map_size = buffer.len();
        let mut map_key = 0;
        let mut descriptor_size = 0;
        let mut descriptor_version = 0;

        let status = unsafe {
            (bs.as_ref().get_memory_map)(
                &mut map_size,
                buffer.as_mut_ptr().cast(),
                &mut map_key,
                &mut descriptor_size,
                &mut descriptor_version,
            )
        };
        if status.is_error() {
            return Err(status);
        }

        Ok(MemoryMapInfo {
            map_size,
            map_key: MapKey(map_key),
            descriptor_size,
            descriptor_version,
        })
    }

    fn open_file(&mut self, path: &CStr16) -> Result<UefiFile, Status> {
        self.open(path, FileMode::Read).map(UefiFile)
    }

    fn create_file(&mut self, path: &CStr16) -> Result<UefiFile, Status> {
        // Opening for write keeps the old contents past what gets written.
        if let Ok(old) = self.open(path, FileMode::ReadWrite) {
            old.delete().map_err(|e| e.status())?;
        }
        self.open(path, FileMode::CreateReadWrite).map(UefiFile)
    }

    fn allocate_pool(&mut self, size: usize) -> Result<NonNull<u8>, Status> {
        boot::allocate_pool(MemoryType::LOADER_DATA, size).map_err(|e| e.status())
    }

    unsafe fn free_pool(&mut self, buffer: NonNull<u8>) -> Result<(), Status> {
        unsafe { boot::free_pool(buffer) }.map_err(|e| e.status())
    }

    fn allocate_pages_at(&mut self, address: u64, pages: usize) -> Result<NonNull<u8>, Status> {
        boot::allocate_pages(
            AllocateType::Address(address),
            MemoryType::LOADER_DATA,
            pages,
        )
        .map_err(|e| e.status())
    }

    fn first_graphics_device(&mut self) -> Result<Option<GraphicsMode>, Status> {
        let handles = match boot::locate_handle_buffer(SearchType::from_proto::<GraphicsOutput>()) {
            Ok(handles) => handles,
            Err(e) if e.status() == Status::NOT_FOUND => return Ok(None),
            Err(e) => return Err(e.status()),
        };
        let Some(&handle) = handles.first() else {
            return Ok(None);
        };

        let mut gop = unsafe {
            boot::open_protocol::<GraphicsOutput>(
                OpenProtocolParams {
                    handle,
                    agent: self.image,
                    controller: None,
                },
                OpenProtocolAttributes::GetProtocol,
            )
        }
        .map_err(|e| e.status())?;

        let info = gop.current_mode_info();
        let (horizontal_resolution, vertical_resolution) = info.resolution();
        let pixel_format = match info.pixel_format() {
            PixelFormat::Rgb => FirmwarePixelFormat::Rgb,
            PixelFormat::Bgr => FirmwarePixelFormat::Bgr,
            PixelFormat::Bitmask => FirmwarePixelFormat::Bitmask,
            PixelFormat::BltOnly => FirmwarePixelFormat::BltOnly,
        };
        let stride = info.stride();
        let mut frame_buffer = gop.frame_buffer();

        Ok(Some(GraphicsMode {
            frame_buffer_base: frame_buffer.as_mut_ptr() as u64,
            frame_buffer_size: frame_buffer.size(),
            horizontal_resolution: horizontal_resolution as u32,
            vertical_resolution: vertical_resolution as u32,
            pixels_per_scan_line: stride as u32,
            pixel_format,
        }))
    }

    unsafe fn exit_boot_services(&mut self, map_key: MapKey) -> Result<(), Status> {
        let bs = self.boot_services()?;
        let status = unsafe { (bs.as_ref().exit_boot_services)(self.image.as_ptr(), map_key.0) };
        if status.is_error() {
            return Err(status);
        }

        // The boot services table is gone; make the `uefi` crate (and the
        // console logger with it) stop using it.
        unsafe { table::set_system_table(core::ptr::null()) };
        Ok(())
    }
}
