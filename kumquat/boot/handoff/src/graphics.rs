//! Finding the graphics device and describing its frame buffer.

use crate::error::BootError;
use crate::firmware::Firmware;
use crate::frame_buffer::FrameBufferConfig;
use crate::frame_buffer::PixelFormat;

/// Pixel layouts a graphics device may report.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FirmwarePixelFormat {
    /// Red, green, blue, reserved; 8 bits each.
    Rgb,
    /// Blue, green, red, reserved; 8 bits each.
    Bgr,
    /// Described by per-channel masks.
    Bitmask,
    /// No linear frame buffer, block transfers only.
    BltOnly,
}

/// Current mode of a graphics device, as reported by the firmware.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GraphicsMode {
    pub frame_buffer_base: u64,
    pub frame_buffer_size: usize,
    pub horizontal_resolution: u32,
    pub vertical_resolution: u32,
    pub pixels_per_scan_line: u32,
    pub pixel_format: FirmwarePixelFormat,
}

/// Takes the first graphics device the firmware enumerates.
pub fn discover<F: Firmware>(firmware: &mut F) -> Result<GraphicsMode, BootError> {
    let mode = firmware
        .first_graphics_device()
        .map_err(|status| {
            log::error!("Failed to open graphics output protocol: {status:?}");
            BootError::GraphicsNotFound(Some(status))
        })?
        .ok_or(BootError::GraphicsNotFound(None))?;

    log::info!(
        "Resolution: {}x{}, Pixel Format: {:?}, {} pixels/line",
        mode.horizontal_resolution,
        mode.vertical_resolution,
        mode.pixel_format,
        mode.pixels_per_scan_line
    );
    log::info!(
        "Frame Buffer: {:#x} - {:#x}, Size: {} bytes",
        mode.frame_buffer_base,
        mode.frame_buffer_base
            .saturating_add(mode.frame_buffer_size as u64),
        mode.frame_buffer_size
    );

    Ok(mode)
}

pub fn build_frame_buffer_config(mode: &GraphicsMode) -> Result<FrameBufferConfig, BootError> {
    let pixel_format = match mode.pixel_format {
        FirmwarePixelFormat::Rgb => PixelFormat::RgbResv8BitPerColor,
        FirmwarePixelFormat::Bgr => PixelFormat::BgrResv8BitPerColor,
        format @ (FirmwarePixelFormat::Bitmask | FirmwarePixelFormat::BltOnly) => {
            return Err(BootError::UnsupportedPixelFormat(format));
        }
    };

    Ok(FrameBufferConfig {
        frame_buffer: mode.frame_buffer_base as *mut u8,
        pixels_per_scan_line: mode.pixels_per_scan_line,
        horizontal_resolution: mode.horizontal_resolution,
        vertical_resolution: mode.vertical_resolution,
        pixel_format,
    })
}

/// Sets every byte of the frame buffer to `value`.
///
/// # Safety
///
/// The frame buffer of `mode` must be mapped and writable.
pub unsafe fn paint(mode: &GraphicsMode, value: u8) {
    let base = mode.frame_buffer_base as *mut u8;
    for i in 0..mode.frame_buffer_size {
        // Device memory, every store has to land.
        unsafe { base.add(i).write_volatile(value) };
    }
}

#[cfg(test)]
mod tests {
    use uefi::Status;

    use super::*;
    use crate::fake::FakeFirmware;

    fn mode(pixel_format: FirmwarePixelFormat) -> GraphicsMode {
        GraphicsMode {
            frame_buffer_base: 0x8000_0000,
            frame_buffer_size: 800 * 4 * 600,
            horizontal_resolution: 800,
            vertical_resolution: 600,
            pixels_per_scan_line: 832,
            pixel_format,
        }
    }

    #[test]
    fn builds_config_for_rgb_and_bgr() {
        let config = build_frame_buffer_config(&mode(FirmwarePixelFormat::Rgb)).unwrap();
        assert_eq!(config.frame_buffer as u64, 0x8000_0000);
        assert_eq!(config.pixels_per_scan_line, 832);
        assert_eq!(config.horizontal_resolution, 800);
        assert_eq!(config.vertical_resolution, 600);
        assert_eq!(config.pixel_format, PixelFormat::RgbResv8BitPerColor);

        let config = build_frame_buffer_config(&mode(FirmwarePixelFormat::Bgr)).unwrap();
        assert_eq!(config.pixel_format, PixelFormat::BgrResv8BitPerColor);
    }

    #[test]
    fn rejects_other_pixel_formats() {
        for format in [FirmwarePixelFormat::Bitmask, FirmwarePixelFormat::BltOnly] {
            assert_eq!(
                build_frame_buffer_config(&mode(format)),
                Err(BootError::UnsupportedPixelFormat(format))
            );
        }
    }

    #[test]
    fn discover_takes_the_first_device() {
        let mut firmware = FakeFirmware::new().with_graphics(mode(FirmwarePixelFormat::Bgr));
        assert_eq!(
            discover(&mut firmware),
            Ok(mode(FirmwarePixelFormat::Bgr))
        );
    }

    #[test]
    fn discover_without_device_fails() {
        let mut firmware = FakeFirmware::new();
        assert_eq!(discover(&mut firmware), Err(BootError::GraphicsNotFound(None)));
    }

    #[test]
    fn discover_keeps_the_firmware_status() {
        let mut firmware = FakeFirmware::new().with_graphics(mode(FirmwarePixelFormat::Rgb));
        firmware.fail_graphics(Status::DEVICE_ERROR);
        let err = discover(&mut firmware).unwrap_err();
        assert_eq!(err, BootError::GraphicsNotFound(Some(Status::DEVICE_ERROR)));
        assert!(err.to_string().contains("DEVICE_ERROR"));
    }

    #[test]
    fn discover_survives_a_mode_at_the_top_of_memory() {
        let mut top = mode(FirmwarePixelFormat::Bgr);
        top.frame_buffer_base = u64::MAX - 0xfff;
        let mut firmware = FakeFirmware::new().with_graphics(top);
        assert_eq!(discover(&mut firmware), Ok(top));
    }

    #[test]
    fn paint_fills_the_whole_frame_buffer() {
        let mut pixels = vec![0u8; 64 * 4 * 8];
        let mut mode = mode(FirmwarePixelFormat::Rgb);
        mode.frame_buffer_base = pixels.as_mut_ptr() as u64;
        mode.frame_buffer_size = pixels.len();

        unsafe { paint(&mode, 0xff) };
        assert!(pixels.iter().all(|&b| b == 0xff));
    }
}
