//! Requests, commands and data descriptors exchanged with the upstream
//! MMC/SD framework.

use crate::error::MmcError;
use bitflags::bitflags;

/// Command indices the bridge itself needs to recognise, plus the ones the
/// card session issues
pub mod opcode {
    pub const GO_IDLE_STATE: u32 = 0;
    /// MMC SEND_OP_COND; its R3 response carries no CRC
    pub const SEND_OP_COND: u32 = 1;
    pub const ALL_SEND_CID: u32 = 2;
    pub const SEND_RELATIVE_ADDR: u32 = 3;
    pub const SELECT_CARD: u32 = 7;
    pub const SEND_IF_COND: u32 = 8;
    pub const SEND_CSD: u32 = 9;
    pub const STOP_TRANSMISSION: u32 = 12;
    pub const SEND_STATUS: u32 = 13;
    pub const SET_BLOCKLEN: u32 = 16;
    pub const READ_SINGLE_BLOCK: u32 = 17;
    pub const READ_MULTIPLE_BLOCK: u32 = 18;
    pub const WRITE_BLOCK: u32 = 24;
    pub const WRITE_MULTIPLE_BLOCK: u32 = 25;
    pub const APP_CMD: u32 = 55;
}

/// Application commands (valid after APP_CMD)
pub mod acmd {
    pub const SET_BUS_WIDTH: u32 = 6;
    pub const SD_STATUS: u32 = 13;
    /// SD_SEND_OP_COND; its R3 response carries no CRC
    pub const SD_SEND_OP_COND: u32 = 41;
    pub const SEND_SCR: u32 = 51;
}

/// Operating conditions register bits
pub mod ocr {
    pub const VDD_320_330: u32 = 1 << 20;
    pub const VDD_330_340: u32 = 1 << 21;
    /// Card capacity status / host capacity support
    pub const CCS: u32 = 1 << 30;
    /// Set once the card finished power-up
    pub const BUSY: u32 = 1 << 31;
}

bitflags! {
    /// Response format expected from the card
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResponseFlags: u32 {
        const PRESENT = 1 << 0;
        /// 136-bit response
        const LONG = 1 << 1;
        const CRC = 1 << 2;
        const BUSY = 1 << 3;
        const OPCODE = 1 << 4;
    }
}

impl ResponseFlags {
    pub const NONE: Self = Self::empty();
    pub const R1: Self = Self::PRESENT.union(Self::CRC).union(Self::OPCODE);
    pub const R1B: Self = Self::R1.union(Self::BUSY);
    pub const R2: Self = Self::PRESENT.union(Self::LONG).union(Self::CRC);
    pub const R3: Self = Self::PRESENT;
    pub const R6: Self = Self::R1;
    pub const R7: Self = Self::R1;

    /// Number of RSPR words holding the response
    pub fn words(self) -> usize {
        if !self.contains(Self::PRESENT) {
            0
        } else if self.contains(Self::LONG) {
            4
        } else {
            1
        }
    }
}

bitflags! {
    /// Direction and shape of an attached data phase
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DataFlags: u32 {
        /// Host → card
        const WRITE = 1 << 0;
        /// Card → host
        const READ = 1 << 1;
        const STREAM = 1 << 2;
        const MULTI = 1 << 3;
    }
}

/// Data phase of a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    /// Source (write) or destination (read); its length is the transfer length
    pub buf: Vec<u8>,
    pub flags: DataFlags,
    /// Bytes accounted as transferred; reset when the transfer is staged
    pub xfer_len: usize,
}

impl Data {
    /// Zero-filled destination for a read of `len` bytes
    pub fn read(len: usize) -> Self {
        Self {
            buf: vec![0; len],
            flags: DataFlags::READ,
            xfer_len: 0,
        }
    }

    pub fn write(buf: Vec<u8>) -> Self {
        Self {
            buf,
            flags: DataFlags::WRITE,
            xfer_len: 0,
        }
    }

    pub fn multi(mut self) -> Self {
        self.flags |= DataFlags::MULTI;
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn is_read(&self) -> bool {
        self.flags.contains(DataFlags::READ)
    }
}

/// One card command and its result slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: u32,
    pub arg: u32,
    pub flags: ResponseFlags,
    pub data: Option<Data>,
    /// Set by the bridge once the command finished
    pub error: Option<MmcError>,
    /// Response words as read from RSPR; only the first [`ResponseFlags::words`] are valid
    pub resp: [u32; 4],
}

impl Command {
    pub fn new(opcode: u32, arg: u32, flags: ResponseFlags) -> Self {
        Self {
            opcode,
            arg,
            flags,
            data: None,
            error: None,
            resp: [0; 4],
        }
    }

    pub fn with_data(mut self, data: Data) -> Self {
        self.data = Some(data);
        self
    }

    pub fn result(&self) -> Result<(), MmcError> {
        self.error.map_or(Ok(()), Err)
    }
}

/// Unit of work handed to the bridge: a command and an optional stop command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub cmd: Command,
    pub stop: Option<Command>,
}

impl Request {
    pub fn new(cmd: Command) -> Self {
        Self { cmd, stop: None }
    }

    pub fn with_stop(mut self, stop: Command) -> Self {
        self.stop = Some(stop);
        self
    }

    /// First error among the command and its stop command
    pub fn result(&self) -> Result<(), MmcError> {
        self.cmd.result()?;
        self.stop.as_ref().map_or(Ok(()), Command::result)
    }

    /// STOP_TRANSMISSION as issued after open-ended multi-block transfers
    pub fn stop_transmission() -> Command {
        Command::new(opcode::STOP_TRANSMISSION, 0, ResponseFlags::R1B)
    }
}
