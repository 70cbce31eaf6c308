//! In-memory stand-in for the firmware, for host tests.
//!
//! Clones share state, so a test can keep a handle for inspection after
//! the loader has consumed its own copy. Anything the real firmware would
//! allocate for (opening files, locating handles, pool and page
//! allocations) changes the map key.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::rc::Rc;

use uefi::CStr16;
use uefi::Status;

use crate::firmware::FileIo;
use crate::firmware::Firmware;
use crate::firmware::MapKey;
use crate::firmware::MemoryMapInfo;
use crate::graphics::GraphicsMode;
use crate::memory_map::MEMORY_DESCRIPTOR_SIZE;
use crate::PAGE_SIZE;

#[derive(Debug, Copy, Clone)]
pub struct FakeRegion {
    pub memory_type: u32,
    pub physical_start: u64,
    pub pages: u64,
    pub attribute: u64,
}

impl FakeRegion {
    pub fn new(memory_type: u32, physical_start: u64, pages: u64, attribute: u64) -> Self {
        Self {
            memory_type,
            physical_start,
            pages,
            attribute,
        }
    }
}

struct FakeState {
    regions: Vec<FakeRegion>,
    descriptor_size: usize,
    map_key: usize,
    memory_map_calls: usize,
    memory_map_failure: Option<Status>,

    files: BTreeMap<String, Vec<u8>>,
    read_limit: Option<usize>,
    writes_before_failure: Option<(usize, Status)>,

    pool: Vec<(NonNull<u8>, usize)>,
    pool_failure: Option<Status>,

    physical_base: u64,
    physical: Box<[u8]>,
    reserved: Vec<(u64, u64)>,
    page_requests: Vec<(u64, usize)>,

    graphics: Option<GraphicsMode>,
    graphics_failure: Option<Status>,

    exit_failures: VecDeque<Status>,
    exit_attempts: Vec<MapKey>,
    exited: bool,
}

impl FakeState {
    fn touch(&mut self) {
        assert!(
            !self.exited,
            "firmware called after the boot services were terminated"
        );
    }

    fn allocation(&mut self) {
        self.touch();
        self.map_key += 1;
    }
}

impl Drop for FakeState {
    fn drop(&mut self) {
        for (ptr, len) in self.pool.drain(..) {
            drop(unsafe {
                Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr.as_ptr(), len))
            });
        }
    }
}

#[derive(Clone)]
pub struct FakeFirmware {
    state: Rc<RefCell<FakeState>>,
}

pub const FAKE_PHYSICAL_BASE: u64 = 0x100000;
pub const FAKE_PHYSICAL_SIZE: usize = 0x20000;

impl FakeFirmware {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(FakeState {
                regions: Vec::new(),
                descriptor_size: MEMORY_DESCRIPTOR_SIZE,
                map_key: 0x1000,
                memory_map_calls: 0,
                memory_map_failure: None,
                files: BTreeMap::new(),
                read_limit: None,
                writes_before_failure: None,
                pool: Vec::new(),
                pool_failure: None,
                physical_base: FAKE_PHYSICAL_BASE,
                // Garbage, so that missing zero fills show up.
                physical: vec![0xcc; FAKE_PHYSICAL_SIZE].into_boxed_slice(),
                reserved: Vec::new(),
                page_requests: Vec::new(),
                graphics: None,
                graphics_failure: None,
                exit_failures: VecDeque::new(),
                exit_attempts: Vec::new(),
                exited: false,
            })),
        }
    }

    pub fn with_regions(self, regions: Vec<FakeRegion>) -> Self {
        self.state.borrow_mut().regions = regions;
        self
    }

    pub fn with_graphics(self, mode: GraphicsMode) -> Self {
        self.state.borrow_mut().graphics = Some(mode);
        self
    }

    pub fn set_descriptor_size(&self, size: usize) {
        self.state.borrow_mut().descriptor_size = size;
    }

    pub fn fail_graphics(&self, status: Status) {
        self.state.borrow_mut().graphics_failure = Some(status);
    }

    pub fn fail_memory_map(&self, status: Status) {
        self.state.borrow_mut().memory_map_failure = Some(status);
    }

    pub fn fail_pool(&self, status: Status) {
        self.state.borrow_mut().pool_failure = Some(status);
    }

    /// Lets `count` more writes through, fails the ones after.
    pub fn fail_writes_after(&self, count: usize, status: Status) {
        self.state.borrow_mut().writes_before_failure = Some((count, status));
    }

    /// Caps the number of bytes a single read returns.
    pub fn limit_reads(&self, limit: usize) {
        self.state.borrow_mut().read_limit = Some(limit);
    }

    /// The next exit attempts fail with these, regardless of the key.
    pub fn fail_exits(&self, statuses: &[Status]) {
        self.state.borrow_mut().exit_failures.extend(statuses);
    }

    /// Marks the range as taken by someone else.
    pub fn reserve(&self, start: u64, end: u64) {
        self.state.borrow_mut().reserved.push((start, end));
    }

    pub fn add_file(&self, path: &CStr16, contents: Vec<u8>) {
        self.state
            .borrow_mut()
            .files
            .insert(path.to_string(), contents);
    }

    pub fn file(&self, path: &CStr16) -> Option<Vec<u8>> {
        self.state.borrow().files.get(&path.to_string()).cloned()
    }

    pub fn memory_map_calls(&self) -> usize {
        self.state.borrow().memory_map_calls
    }

    pub fn current_key(&self) -> MapKey {
        MapKey(self.state.borrow().map_key)
    }

    pub fn live_pool_allocations(&self) -> usize {
        self.state.borrow().pool.len()
    }

    pub fn page_requests(&self) -> Vec<(u64, usize)> {
        self.state.borrow().page_requests.clone()
    }

    pub fn exit_attempts(&self) -> Vec<MapKey> {
        self.state.borrow().exit_attempts.clone()
    }

    pub fn exited(&self) -> bool {
        self.state.borrow().exited
    }

    /// Copy of the fake physical memory at `[address, address + len)`.
    pub fn physical(&self, address: u64, len: usize) -> Vec<u8> {
        let state = self.state.borrow();
        let offset = (address - state.physical_base) as usize;
        state.physical[offset..offset + len].to_vec()
    }
}

pub struct FakeFile {
    state: Rc<RefCell<FakeState>>,
    path: String,
    position: usize,
}

impl FileIo for FakeFile {
    fn size(&mut self) -> Result<u64, Status> {
        let state = self.state.borrow();
        Ok(state.files[&self.path].len() as u64)
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, Status> {
        let state = self.state.borrow();
        let contents = &state.files[&self.path];
        let available = contents.len().saturating_sub(self.position);
        let count = buffer
            .len()
            .min(available)
            .min(state.read_limit.unwrap_or(usize::MAX));
        buffer[..count].copy_from_slice(&contents[self.position..self.position + count]);
        self.position += count;
        Ok(count)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        if let Some((left, status)) = state.writes_before_failure.as_mut() {
            if *left == 0 {
                return Err(*status);
            }
            *left -= 1;
        }
        let position = self.position;
        let contents = state.files.get_mut(&self.path).ok_or(Status::NOT_FOUND)?;
        contents.truncate(position);
        contents.extend_from_slice(data);
        self.position += data.len();
        Ok(())
    }

    fn close(self) {}
}

unsafe impl Firmware for FakeFirmware {
    type File = FakeFile;

    fn get_memory_map(&mut self, buffer: &mut [u8]) -> Result<MemoryMapInfo, Status> {
        let mut state = self.state.borrow_mut();
        state.touch();
        state.memory_map_calls += 1;
        if let Some(status) = state.memory_map_failure {
            return Err(status);
        }

        let stride = state.descriptor_size;
        let map_size = stride * state.regions.len();
        if buffer.len() < map_size {
            return Err(Status::BUFFER_TOO_SMALL);
        }

        for (region, record) in state.regions.iter().zip(buffer.chunks_mut(stride)) {
            record[0..4].copy_from_slice(&region.memory_type.to_le_bytes());
            record[4..8].fill(0);
            record[8..16].copy_from_slice(&region.physical_start.to_le_bytes());
            record[16..24].fill(0);
            record[24..32].copy_from_slice(&region.pages.to_le_bytes());
            record[32..40].copy_from_slice(&region.attribute.to_le_bytes());
        }

        Ok(MemoryMapInfo {
            map_size,
            map_key: MapKey(state.map_key),
            descriptor_size: stride,
            descriptor_version: 1,
        })
    }

    fn open_file(&mut self, path: &CStr16) -> Result<FakeFile, Status> {
        let mut state = self.state.borrow_mut();
        state.allocation();
        let path = path.to_string();
        if !state.files.contains_key(&path) {
            return Err(Status::NOT_FOUND);
        }
        Ok(FakeFile {
            state: self.state.clone(),
            path,
            position: 0,
        })
    }

    fn create_file(&mut self, path: &CStr16) -> Result<FakeFile, Status> {
        let mut state = self.state.borrow_mut();
        state.allocation();
        let path = path.to_string();
        state.files.insert(path.clone(), Vec::new());
        Ok(FakeFile {
            state: self.state.clone(),
            path,
            position: 0,
        })
    }

    fn allocate_pool(&mut self, size: usize) -> Result<NonNull<u8>, Status> {
        let mut state = self.state.borrow_mut();
        state.allocation();
        if let Some(status) = state.pool_failure {
            return Err(status);
        }
        let block = Box::into_raw(vec![0xdd_u8; size].into_boxed_slice());
        let ptr = NonNull::new(block as *mut u8).ok_or(Status::OUT_OF_RESOURCES)?;
        state.pool.push((ptr, size));
        Ok(ptr)
    }

    unsafe fn free_pool(&mut self, buffer: NonNull<u8>) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.allocation();
        let index = state
            .pool
            .iter()
            .position(|&(ptr, _)| ptr == buffer)
            .ok_or(Status::INVALID_PARAMETER)?;
        let (ptr, len) = state.pool.swap_remove(index);
        drop(unsafe { Box::from_raw(std::ptr::slice_from_raw_parts_mut(ptr.as_ptr(), len)) });
        Ok(())
    }

    fn allocate_pages_at(&mut self, address: u64, pages: usize) -> Result<NonNull<u8>, Status> {
        let mut state = self.state.borrow_mut();
        state.allocation();
        state.page_requests.push((address, pages));

        let end = address + (pages * PAGE_SIZE) as u64;
        let window_end = state.physical_base + state.physical.len() as u64;
        if address % PAGE_SIZE as u64 != 0 || address < state.physical_base || end > window_end
        {
            return Err(Status::NOT_FOUND);
        }
        if state
            .reserved
            .iter()
            .any(|&(start, stop)| address < stop && start < end)
        {
            return Err(Status::NOT_FOUND);
        }
        state.reserved.push((address, end));

        let offset = (address - state.physical_base) as usize;
        NonNull::new(state.physical[offset..].as_mut_ptr()).ok_or(Status::NOT_FOUND)
    }

    fn first_graphics_device(&mut self) -> Result<Option<GraphicsMode>, Status> {
        let mut state = self.state.borrow_mut();
        state.allocation();
        match state.graphics_failure {
            Some(status) => Err(status),
            None => Ok(state.graphics),
        }
    }

    unsafe fn exit_boot_services(&mut self, map_key: MapKey) -> Result<(), Status> {
        let mut state = self.state.borrow_mut();
        state.touch();
        state.exit_attempts.push(map_key);
        if let Some(status) = state.exit_failures.pop_front() {
            return Err(status);
        }
        if map_key != MapKey(state.map_key) {
            return Err(Status::INVALID_PARAMETER);
        }
        state.exited = true;
        Ok(())
    }
}
