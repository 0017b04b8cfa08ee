//! Framed, verbosity-gated console.
//!
//! `Lvl0` prints always; `Lvl1`/`Lvl2` print only once the matching
//! elevated-prompt command token has been recognized on the Rx side. A
//! command is "raised" the instant its token is recognized and "serviced"
//! once [`Console::sync`] has dispatched it -- the same raise-then-defer
//! split the original firmware used so token matching (interrupt context)
//! never directly calls the heavier command action.

use core::fmt::Write as _;

use crate::config::CONSOLE_BUFFER_SIZE;
use crate::error::{Error, Result};

/// Output verbosity level of a single `print` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PrintLevel {
    Lvl0,
    Lvl1,
    Lvl2,
}

/// Byte-level transport the console needs from the board: blocking
/// single-byte transmit and a blocking buffered transmit/receive with an
/// implementation-defined timeout.
pub trait ConsoleTransport {
    fn transmit(&mut self, data: &[u8]) -> Result<()>;
    fn receive(&mut self, buf: &mut [u8]) -> Result<()>;
}

const MAX_COMMANDS: usize = 2;

#[derive(Clone, Copy)]
struct CommandSlot {
    token: &'static str,
    raised: bool,
    serviced: bool,
}

/// The two elevated-prompt commands this appliance recognizes: enabling
/// level-1 and level-2 console verbosity.
pub const CMD_LEVEL1_ENABLE: usize = 0;
pub const CMD_LEVEL2_ENABLE: usize = 1;

pub struct Console<T> {
    transport: T,
    commands: [CommandSlot; MAX_COMMANDS],
    scratch: [u8; CONSOLE_BUFFER_SIZE],
}

impl<T: ConsoleTransport> Console<T> {
    pub fn new(transport: T) -> Self {
        Console {
            transport,
            commands: [
                CommandSlot { token: "enable-lvl1", raised: false, serviced: false },
                CommandSlot { token: "enable-lvl2", raised: false, serviced: false },
            ],
            scratch: [0u8; CONSOLE_BUFFER_SIZE],
        }
    }

    fn level_sufficient(&self, level: PrintLevel) -> bool {
        match level {
            PrintLevel::Lvl0 => true,
            PrintLevel::Lvl1 => self.commands[CMD_LEVEL1_ENABLE].raised,
            PrintLevel::Lvl2 => self.commands[CMD_LEVEL2_ENABLE].raised,
        }
    }

    /// Formats and transmits `args` if `level` is currently open. Mirrors
    /// the original's fixed-size scratch buffer rather than allocating.
    pub fn print(&mut self, level: PrintLevel, args: core::fmt::Arguments) -> Result<()> {
        if !self.level_sufficient(level) {
            return Ok(());
        }
        let mut writer = ScratchWriter { buf: &mut self.scratch, len: 0 };
        let _ = writer.write_fmt(args);
        let len = writer.len;
        self.transport.transmit(&self.scratch[..len])
    }

    /// Writes a single `.` progress tick, always open regardless of level.
    pub fn progress_tick(&mut self) -> Result<()> {
        self.transport.transmit(b".")
    }

    /// Scans a just-received token buffer for a known command string and
    /// raises it. Called from the Rx-complete path; does not invoke the
    /// command action itself -- see [`Console::sync`].
    pub fn on_token_received(&mut self, token: &str) {
        for slot in self.commands.iter_mut() {
            if token.contains(slot.token) {
                slot.raised = true;
                break;
            }
        }
    }

    pub fn is_command_raised(&self, cmd: usize) -> bool {
        self.commands.get(cmd).map(|s| s.raised).unwrap_or(false)
    }

    /// Deferred processing: services any command that has been raised but
    /// not yet serviced, invoking `actor` once per command index.
    pub fn sync(&mut self, mut actor: impl FnMut(usize)) {
        for (i, slot) in self.commands.iter_mut().enumerate() {
            if slot.raised && !slot.serviced {
                slot.serviced = true;
                actor(i);
            }
        }
    }

    pub fn receive_line(&mut self, buf: &mut [u8]) -> Result<()> {
        self.transport.receive(buf).map_err(|_| Error::ConsoleTimeout)
    }
}

impl<T: ConsoleTransport> crate::xmodem::ByteIo for Console<T> {
    /// XMODEM and the leveled console print share the same physical UART
    /// on every board this crate targets -- there is exactly one owner of
    /// the transport, so the receiver borrows it through the console
    /// rather than needing a second handle to the same peripheral.
    fn recv_byte(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.transport.receive(&mut b).map_err(|_| Error::ConsoleTimeout)?;
        Ok(b[0])
    }

    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.transport.receive(buf).map_err(|_| Error::ConsoleTimeout)
    }

    fn send_byte(&mut self, byte: u8) -> Result<()> {
        self.transport.transmit(&[byte]).map_err(|_| Error::ConsoleTimeout)
    }
}

struct ScratchWriter<'a> {
    buf: &'a mut [u8],
    len: usize,
}

impl<'a> core::fmt::Write for ScratchWriter<'a> {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        let bytes = s.as_bytes();
        let room = self.buf.len() - self.len;
        let n = bytes.len().min(room);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
        Ok(())
    }
}
