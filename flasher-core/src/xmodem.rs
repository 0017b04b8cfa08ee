//! XMODEM-CRC receiver.
//!
//! Ported from a bit-exact reimplementation of the classic Nemeth xmodem.c
//! state machine: 128/1024-byte SOH/STX packets, CRC-16/CCITT framing, an
//! 8-bit sequence number with one's-complement check, and a "spam C until
//! the sender notices" poll before the first packet.

use crate::config::{XMODEM_MAX_ERRORS, XMODEM_PACKET_1024_SIZE, XMODEM_PACKET_128_SIZE};
use crate::crc::crc16_ccitt;
use crate::error::{Error, Result};
use crate::fs::{GoldenImageStore, OpenMode};

const SOH: u8 = 0x01;
const STX: u8 = 0x02;
const EOT: u8 = 0x04;
const ACK: u8 = 0x06;
const NAK: u8 = 0x15;
const CAN: u8 = 0x18;
const C: u8 = b'C';

/// Minimal byte-level transport the receiver needs from the console: a
/// blocking single-byte receive with an implementation-defined timeout
/// (signalled by `Err`), a blocking fixed-length receive, and a
/// single-byte transmit.
pub trait ByteIo {
    fn recv_byte(&mut self) -> Result<u8>;
    fn recv_exact(&mut self, buf: &mut [u8]) -> Result<()>;
    fn send_byte(&mut self, byte: u8) -> Result<()>;
}

/// Outcome of a full receive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmodemOutcome {
    Complete,
    Aborted,
}

struct Session {
    packet_number: u8,
    is_first_packet: bool,
    error_count: u8,
}

impl Session {
    fn new() -> Self {
        Session { packet_number: 1, is_first_packet: false, error_count: 0 }
    }
}

/// Runs one full XMODEM-CRC receive session, streaming packets straight
/// into `target`'s golden image file. `target` must not have a file open
/// on entry; the first successfully validated packet opens it for
/// truncating write.
pub fn receive<IO: ByteIo, T: GoldenImageStore>(io: &mut IO, target: &mut T) -> Result<XmodemOutcome> {
    let mut session = Session::new();

    loop {
        let header = match io.recv_byte() {
            Ok(b) => b,
            Err(_) if !session.is_first_packet => {
                // Spam C until the sender notices we want CRC mode.
                let _ = io.send_byte(C);
                continue;
            }
            Err(_) => {
                if error_handler(io, target, &mut session.error_count)? {
                    return Ok(XmodemOutcome::Aborted);
                }
                continue;
            }
        };

        match header {
            SOH | STX => {
                let size = if header == SOH { XMODEM_PACKET_128_SIZE } else { XMODEM_PACKET_1024_SIZE };
                match handle_packet(io, target, &mut session, size) {
                    Ok(()) => {
                        io.send_byte(ACK)?;
                    }
                    Err(Error::FsError) => {
                        // Flash-related errors are not retried: force an
                        // immediate graceful abort.
                        session.error_count = XMODEM_MAX_ERRORS;
                        if error_handler(io, target, &mut session.error_count)? {
                            return Ok(XmodemOutcome::Aborted);
                        }
                    }
                    Err(_) => {
                        if error_handler(io, target, &mut session.error_count)? {
                            return Ok(XmodemOutcome::Aborted);
                        }
                    }
                }
            }
            EOT => {
                io.send_byte(ACK)?;
                target.close()?;
                return Ok(XmodemOutcome::Complete);
            }
            CAN => {
                return Ok(XmodemOutcome::Aborted);
            }
            _ => {
                if error_handler(io, target, &mut session.error_count)? {
                    return Ok(XmodemOutcome::Aborted);
                }
            }
        }
    }
}

/// Returns `true` if the error handler decided to abort the session.
fn error_handler<IO: ByteIo, T: GoldenImageStore>(
    io: &mut IO,
    target: &mut T,
    error_count: &mut u8,
) -> Result<bool> {
    *error_count += 1;
    if *error_count >= XMODEM_MAX_ERRORS {
        let _ = io.send_byte(CAN);
        let _ = io.send_byte(CAN);
        let _ = target.delete();
        Ok(true)
    } else {
        io.send_byte(NAK)?;
        Ok(false)
    }
}

fn handle_packet<IO: ByteIo, T: GoldenImageStore>(
    io: &mut IO,
    target: &mut T,
    session: &mut Session,
    size: usize,
) -> Result<()> {
    let mut seq = [0u8; 2];
    io.recv_exact(&mut seq)?;

    let mut data = [0u8; XMODEM_PACKET_1024_SIZE];
    io.recv_exact(&mut data[..size])?;

    let mut crc_bytes = [0u8; 2];
    io.recv_exact(&mut crc_bytes)?;
    let crc_received = u16::from_be_bytes(crc_bytes);
    let crc_calculated = crc16_ccitt(&data[..size]);

    if !session.is_first_packet {
        target.open(OpenMode::AppendCreate).map_err(|_| Error::FsError)?;
        session.is_first_packet = true;
    }

    if session.packet_number != seq[0] {
        return Err(Error::XmodemAborted);
    }
    // The packet number and its one's complement must sum to 255 -- this
    // preserves the original's 8-bit wraparound behavior exactly: at
    // packet 256 the counter rolls over to 0 and the check still holds.
    if seq[0].wrapping_add(seq[1]) != 0xFF {
        return Err(Error::XmodemAborted);
    }
    if crc_calculated != crc_received {
        return Err(Error::CrcMismatch);
    }

    target.write(&data[..size]).map_err(|_| Error::FsError)?;
    session.packet_number = session.packet_number.wrapping_add(1);
    Ok(())
}
