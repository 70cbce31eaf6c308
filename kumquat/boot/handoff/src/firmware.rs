//! The capability surface the loader consumes.
//!
//! The loader never reaches for the firmware tables directly. Every call
//! goes through a [`Firmware`] value that is passed down explicitly and is
//! moved into [`crate::transition::exit_boot_services`], after which there
//! is nothing left to call.

use core::ptr::NonNull;

use uefi::CStr16;
use uefi::Status;

use crate::graphics::GraphicsMode;

/// Proves a memory map snapshot is current. Any allocation or free
/// performed after the snapshot makes the key stale.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MapKey(pub usize);

/// What `GetMemoryMap` reports besides the descriptors themselves.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryMapInfo {
    /// Bytes of the buffer filled with descriptors.
    pub map_size: usize,
    pub map_key: MapKey,
    /// Stride of the descriptor array, may exceed the descriptor structure.
    pub descriptor_size: usize,
    pub descriptor_version: u32,
}

/// An open file on the boot volume.
pub trait FileIo {
    fn size(&mut self) -> Result<u64, Status>;

    /// Reads from the current position, returns the number of bytes read.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Status>;

    fn write(&mut self, data: &[u8]) -> Result<(), Status>;

    fn close(self)
    where
        Self: Sized;
}

/// Boot-time firmware services.
///
/// # Safety
///
/// Pointers handed out by [`Firmware::allocate_pool`] and
/// [`Firmware::allocate_pages_at`] must be valid for reads and writes of the
/// requested size, and not aliased by anything else, until they are freed or
/// ownership passes to the kernel.
pub unsafe trait Firmware {
    type File: FileIo;

    /// Fills `buffer` with the current memory map.
    fn get_memory_map(&mut self, buffer: &mut [u8]) -> Result<MemoryMapInfo, Status>;

    /// Opens an existing file for reading.
    fn open_file(&mut self, path: &CStr16) -> Result<Self::File, Status>;

    /// Creates a file for writing, dropping any previous contents.
    fn create_file(&mut self, path: &CStr16) -> Result<Self::File, Status>;

    fn allocate_pool(&mut self, size: usize) -> Result<NonNull<u8>, Status>;

    /// # Safety
    ///
    /// `buffer` must come from [`Firmware::allocate_pool`] and must not be
    /// used afterwards.
    unsafe fn free_pool(&mut self, buffer: NonNull<u8>) -> Result<(), Status>;

    /// Reserves `pages` pages starting exactly at the physical `address`.
    fn allocate_pages_at(&mut self, address: u64, pages: usize) -> Result<NonNull<u8>, Status>;

    /// Describes the current mode of the first enumerated graphics device,
    /// `None` if there is no such device.
    fn first_graphics_device(&mut self) -> Result<Option<GraphicsMode>, Status>;

    /// Terminates the boot services.
    ///
    /// # Safety
    ///
    /// On success, no other method may be called on this value, and
    /// nothing else may rely on the boot services.
    unsafe fn exit_boot_services(&mut self, map_key: MapKey) -> Result<(), Status>;
}
