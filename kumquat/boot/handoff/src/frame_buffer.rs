//! The structure handed to the kernel entry point. The kernel declares
//! the very same layout, keep the two in sync.

#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PixelFormat {
    RgbResv8BitPerColor = 0,
    BgrResv8BitPerColor = 1,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FrameBufferConfig {
    pub frame_buffer: *mut u8,
    pub pixels_per_scan_line: u32,
    pub horizontal_resolution: u32,
    pub vertical_resolution: u32,
    pub pixel_format: PixelFormat,
}

const _: () = {
    use core::mem::offset_of;
    use core::mem::size_of;

    assert!(size_of::<PixelFormat>() == 4);
    assert!(offset_of!(FrameBufferConfig, frame_buffer) == 0);
    assert!(offset_of!(FrameBufferConfig, pixels_per_scan_line) == 8);
    assert!(offset_of!(FrameBufferConfig, horizontal_resolution) == 12);
    assert!(offset_of!(FrameBufferConfig, vertical_resolution) == 16);
    assert!(offset_of!(FrameBufferConfig, pixel_format) == 20);
    assert!(size_of::<FrameBufferConfig>() == 24);
};
