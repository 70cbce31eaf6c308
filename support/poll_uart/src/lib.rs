//! Polled 16550-compatible COM port, transmit side only.
//!
//! Used for logging where the firmware console isn't available anymore.
//! No interrupts, no FIFO tuning: 8 data bits, 1 stop bit, no parity.
//!
//!  Offs. DLAB  Register
//!  ---------------------------------------------------------------
//!   +0     0   THR  Transmitter Holding Register (write only)
//!   +0     1   DLL  Divisor Latch (LSB)
//!   +1     1   DLM  Divisor Latch (MSB)
//!   +1     0   IER  Interrupt Enable Register
//!   +2     x   FCR  FIFO Control Register (w/o)
//!   +3     x   LCR  Line Control Register
//!   +4     x   MCR  Modem Control Register
//!   +5     x   LSR  Line Status Register
//!   +7     x   SCR  Scratch Register

#![no_std]

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComPortIo {
    Com1 = 0x3F8,
    Com2 = 0x2F8,
}

#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BaudDivisor {
    Baud9600 = 0xC,
    Baud38400 = 0x3,
    Baud115200 = 0x1,
}

const IER: u16 = 1;
const FCR: u16 = 2;
const LCR: u16 = 3;
const MCR: u16 = 4;
const LSR: u16 = 5;
const SCR: u16 = 7;

const LCR_8N1: u8 = 0x03;
const LCR_DLAB: u8 = 0x80;
const LSR_THRE: u8 = 0x20;

#[cfg(target_arch = "x86_64")]
mod port {
    use core::arch::asm;

    #[inline]
    pub fn out8(port: u16, val: u8) {
        unsafe {
            asm!("outb %al, %dx", in("al") val, in("dx") port, options(att_syntax, nostack, nomem));
        }
    }

    #[inline]
    pub fn in8(port: u16) -> u8 {
        let val: u8;
        unsafe {
            asm!("inb %dx, %al", out("al") val, in("dx") port, options(att_syntax, nostack, nomem));
        }
        val
    }
}

// Keeps the crate building for host-side tests of its users.
#[cfg(not(target_arch = "x86_64"))]
mod port {
    pub fn out8(_port: u16, _val: u8) {}

    pub fn in8(_port: u16) -> u8 {
        0xff
    }
}

/// Serial port with 8 bit data, 1 stop bit, and no parity.
#[derive(Debug)]
pub struct ComPort {
    base: u16,
    present: bool,
}

impl ComPort {
    pub fn new(port: ComPortIo, baud: BaudDivisor) -> Self {
        let base = port as u16;

        // The scratch register reads back on anything 16450 and newer;
        // a floating bus reads as 0xff.
        port::out8(base + SCR, 0x5a);
        let present = port::in8(base + SCR) == 0x5a;

        if present {
            let divisor = baud as u16;
            port::out8(base + IER, 0x00);
            port::out8(base + LCR, LCR_DLAB | LCR_8N1);
            port::out8(base, divisor as u8);
            port::out8(base + IER, (divisor >> 8) as u8);
            port::out8(base + LCR, LCR_8N1);
            // Enable and reset FIFOs
            port::out8(base + FCR, 0x07);
            // DTR | RTS
            port::out8(base + MCR, 0x03);
        }

        Self { base, present }
    }

    pub fn is_present(&self) -> bool {
        self.present
    }

    pub fn send_byte(&self, byte: u8) {
        if !self.present {
            return;
        }
        while port::in8(self.base + LSR) & LSR_THRE == 0 {
            core::hint::spin_loop();
        }
        port::out8(self.base, byte);
    }
}

impl core::fmt::Write for ComPort {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            if byte == b'\n' {
                self.send_byte(b'\r');
            }
            self.send_byte(byte);
        }
        Ok(())
    }
}
