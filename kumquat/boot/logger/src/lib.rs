#![cfg_attr(not(test), no_std)]

//! Logging facilities for the bootloader, and the configuration that
//! drives them.
//!
//! The UEFI console works only while the boot services are active, and the
//! kernel is entered right after they are gone. For output that survives
//! the exit, a polled UART is used.

use core::fmt::Write;

use conquer_once::spin::OnceCell;
use log::LevelFilter;
use poll_uart::BaudDivisor;
use poll_uart::ComPort;
use poll_uart::ComPortIo;
use spinning_top::Spinlock;
use uefi::boot;
use uefi::proto::console::text::Output;
use uefi::table;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LogDevice {
    Null,
    StdOut,
    Com1,
    Com2,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootLoaderConfig {
    /// The target device for boot logging.
    pub log_device: LogDevice,
    /// Verbosity for logging.
    pub log_level: LevelFilter,
    /// Log source line and path.
    pub log_source_path: bool,
    /// Dump the memory map to a file on the boot volume.
    pub save_memory_map: bool,
    /// Fill the frame buffer before starting the kernel.
    pub paint_screen: bool,
    /// Call the kernel without passing the frame buffer description.
    pub bare_entry: bool,
}

impl Default for BootLoaderConfig {
    fn default() -> Self {
        Self {
            log_device: LogDevice::StdOut,
            log_level: LevelFilter::Info,
            log_source_path: false,
            save_memory_map: true,
            paint_screen: true,
            bare_entry: false,
        }
    }
}

fn is_yes(value: &[u8]) -> bool {
    value == b"yes" || value == b"on" || value == b"1" || value == b"true"
}

impl BootLoaderConfig {
    /// Reads `key = value` lines. Unknown keys and values are skipped, and
    /// parsing stops at the first syntax error keeping what came before.
    pub fn parse(bytes: &[u8]) -> Self {
        let mut config = Self::default();
        let mut parser = ini_file::Parser::new(bytes);

        while let Ok(Some(ini_file::KeyValue { key, value })) = parser.parse() {
            match key {
                b"log_device" => match value {
                    b"null" => config.log_device = LogDevice::Null,
                    b"com1" => config.log_device = LogDevice::Com1,
                    b"com2" => config.log_device = LogDevice::Com2,
                    b"stdout" => config.log_device = LogDevice::StdOut,
                    _ => continue,
                },
                b"log_level" => match value {
                    b"info" => config.log_level = LevelFilter::Info,
                    b"warn" => config.log_level = LevelFilter::Warn,
                    b"error" => config.log_level = LevelFilter::Error,
                    b"debug" => config.log_level = LevelFilter::Debug,
                    b"trace" => config.log_level = LevelFilter::Trace,
                    _ => continue,
                },
                b"log_source_path" => config.log_source_path = is_yes(value),
                b"save_memory_map" => config.save_memory_map = is_yes(value),
                b"paint_screen" => config.paint_screen = is_yes(value),
                b"entry_args" => match value {
                    b"frame_buffer" => config.bare_entry = false,
                    b"none" => config.bare_entry = true,
                    _ => continue,
                },
                _ => continue,
            }
        }

        config
    }
}

#[derive(Debug)]
pub enum LogOutput {
    Stdout,
    Com(Spinlock<ComPort>),
}

/// Single-thread logger
#[derive(Debug)]
pub struct BootLogger {
    output: Option<LogOutput>,
    log_source_path: bool,
}

impl BootLogger {
    fn write(&self, output: &mut dyn Write, record: &log::Record) {
        output
            .write_fmt(format_args!(
                "[{:7}][{}",
                record.level(),
                record.module_path().unwrap_or_default(),
            ))
            .ok();
        if self.log_source_path {
            output
                .write_fmt(format_args!(
                    " {}@{}",
                    record.file().unwrap_or_default(),
                    record.line().unwrap_or_default(),
                ))
                .ok();
        }
        output.write_fmt(format_args!("] {}\n", record.args())).ok();
    }
}

unsafe impl Send for BootLogger {}
unsafe impl Sync for BootLogger {}

impl log::Log for BootLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        match &self.output {
            None => {}
            Some(LogOutput::Stdout) => {
                // Gone once the boot services have exited.
                if table::system_table_raw().is_none() {
                    return;
                }
                let Ok(handle) = boot::get_handle_for_protocol::<Output>() else {
                    return;
                };
                if let Ok(mut stdout) = boot::open_protocol_exclusive::<Output>(handle) {
                    self.write(&mut *stdout, record);
                }
            }
            Some(LogOutput::Com(serial_port)) => {
                self.write(&mut *serial_port.lock(), record);
            }
        }
    }

    fn flush(&self) {}
}

static BOOT_LOGGER: OnceCell<BootLogger> = OnceCell::uninit();

fn stdout_output() -> Option<LogOutput> {
    let handle = boot::get_handle_for_protocol::<Output>().ok()?;
    let mut stdout = boot::open_protocol_exclusive::<Output>(handle).ok()?;
    stdout.clear().ok();
    Some(LogOutput::Stdout)
}

fn com_output(port: ComPortIo) -> Option<LogOutput> {
    let port = ComPort::new(port, BaudDivisor::Baud115200);
    if port.is_present() {
        Some(LogOutput::Com(Spinlock::new(port)))
    } else {
        stdout_output()
    }
}

/// Installs the logger. A COM port that does not respond falls back to
/// the console.
pub fn setup_logger(config: &BootLoaderConfig) -> Result<(), log::SetLoggerError> {
    let logger = BOOT_LOGGER.get_or_init(|| {
        let output = match config.log_device {
            LogDevice::StdOut => stdout_output(),
            LogDevice::Com1 => com_output(ComPortIo::Com1),
            LogDevice::Com2 => com_output(ComPortIo::Com2),
            LogDevice::Null => None,
        };

        BootLogger {
            output,
            log_source_path: config.log_source_path,
        }
    });

    log::set_logger(logger)?;
    log::set_max_level(config.log_level);
    Ok(())
}
