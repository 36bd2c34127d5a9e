//! SD card model behind the simulated controller.
//!
//! Implements the subset of the SD physical layer the bridge and the card
//! session exercise: identification, addressing, selection, block length,
//! single and multiple block transfers, and the handful of application
//! commands used during bring-up.
//!
//! # References
//! - [SD Physical Layer Simplified Specification v2.00](https://www.sdcard.org/downloads/pls/)

use crate::mmc::{acmd, ocr, opcode};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use tracing::{debug, trace, warn};

/// Sector size the card addresses in when in block-addressing mode
pub const SECTOR_SIZE: u64 = 512;

/// Status polls ACMD41 reports busy before the card finishes power-up
const POWER_UP_POLLS: u8 = 1;

/// RCA the card publishes from CMD3
pub const DEFAULT_RCA: u16 = 0x1234;

const CID: [u32; 4] = [0x0353_4453, 0x4430_3847, 0x8012_3456, 0x7801_2a00];

/// R1 card status bits
pub mod status {
    pub const APP_CMD: u32 = 1 << 5;
    pub const READY_FOR_DATA: u32 = 1 << 8;
    pub const CURRENT_STATE_SHIFT: u32 = 9;
    pub const ILLEGAL_COMMAND: u32 = 1 << 22;
    pub const OUT_OF_RANGE: u32 = 1 << 31;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CardState {
    Idle = 0,
    Ready = 1,
    Identify = 2,
    Standby = 3,
    Transfer = 4,
    Data = 5,
    Receive = 6,
    Program = 7,
}

/// What the card drives back on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Command accepted, no response token (CMD0)
    None,
    Short(u32),
    /// R3: no CRC field, the controller flags RCRCE on it
    ShortNoCrc(u32),
    Long([u32; 4]),
}

/// Data phase armed by the last command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    ReadBlocks { offset: u64, multi: bool },
    WriteBlocks { offset: u64, multi: bool },
    Scr,
    SdStatus,
}

/// Card contents
#[derive(Debug)]
pub enum Storage {
    Memory(Vec<u8>),
    File { file: File, len: u64 },
}

impl Storage {
    pub fn len(&self) -> u64 {
        match self {
            Self::Memory(bytes) => bytes.len() as u64,
            Self::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        if offset + buf.len() as u64 > self.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read past end of card",
            ));
        }
        match self {
            Self::Memory(bytes) => {
                let start = offset as usize;
                buf.copy_from_slice(&bytes[start..start + buf.len()]);
                Ok(())
            }
            Self::File { file, .. } => {
                file.seek(SeekFrom::Start(offset))?;
                file.read_exact(buf)
            }
        }
    }

    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        if offset + buf.len() as u64 > self.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write past end of card",
            ));
        }
        match self {
            Self::Memory(bytes) => {
                let start = offset as usize;
                bytes[start..start + buf.len()].copy_from_slice(buf);
                Ok(())
            }
            Self::File { file, .. } => {
                file.seek(SeekFrom::Start(offset))?;
                file.write_all(buf)?;
                file.flush()
            }
        }
    }
}

#[derive(Debug)]
pub struct Card {
    state: CardState,
    storage: Storage,
    app_command_next: bool,
    power_up_polls: u8,
    /// Block addressing negotiated through ACMD41 HCS
    high_capacity: bool,
    rca: u16,
    block_len: u32,
    four_bit: bool,
    pending: Option<Pending>,
    status_errors: u32,
}

impl Card {
    pub fn new(storage: Storage) -> Self {
        Self {
            state: CardState::Idle,
            storage,
            app_command_next: false,
            power_up_polls: POWER_UP_POLLS,
            high_capacity: false,
            rca: 0,
            block_len: SECTOR_SIZE as u32,
            four_bit: false,
            pending: None,
            status_errors: 0,
        }
    }

    /// Zero-filled card of `len` bytes
    pub fn in_memory(len: usize) -> Self {
        Self::new(Storage::Memory(vec![0; len]))
    }

    /// Card backed by a raw disk image
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)?;
        let len = file.metadata()?.len();
        debug!("Opened SD card image: {:?} ({} bytes)", path, len);
        Ok(Self::new(Storage::File { file, len }))
    }

    pub fn state(&self) -> CardState {
        self.state
    }

    pub fn rca(&self) -> u16 {
        self.rca
    }

    pub fn is_high_capacity(&self) -> bool {
        self.high_capacity
    }

    pub fn block_len(&self) -> u32 {
        self.block_len
    }

    pub fn is_four_bit(&self) -> bool {
        self.four_bit
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }

    /// True while a data phase is armed
    pub fn expects_data(&self) -> bool {
        self.pending.is_some()
    }

    /// True when the armed data phase flows host → card
    pub fn expects_write(&self) -> bool {
        matches!(self.pending, Some(Pending::WriteBlocks { .. }))
    }

    fn r1(&mut self) -> u32 {
        let mut r1 = (self.state as u32) << status::CURRENT_STATE_SHIFT;
        if self.app_command_next {
            r1 |= status::APP_CMD;
        }
        if self.pending.is_none() {
            r1 |= status::READY_FOR_DATA;
        }
        r1 | std::mem::take(&mut self.status_errors)
    }

    /// C_SIZE of a CSD v2 register for the card's capacity
    fn c_size(&self) -> u32 {
        let units = self.storage.len() / (512 * 1024);
        units.saturating_sub(1).min(0x3f_ffff) as u32
    }

    fn csd(&self) -> [u32; 4] {
        let c_size = self.c_size();
        [
            // CSD_STRUCTURE = 1, TAAC, NSAC, TRAN_SPEED = 25 MHz
            0x400e_0032,
            // CCC, READ_BL_LEN = 9, C_SIZE[21:16]
            0x5b59_0000 | (c_size >> 16),
            // C_SIZE[15:0], ERASE_BLK_EN, SECTOR_SIZE
            (c_size & 0xffff) << 16 | 0x7f80,
            // WRITE_BL_LEN = 9
            0x0a40_0001,
        ]
    }

    /// Byte offset addressed by a data command argument
    fn address(&self, arg: u32) -> u64 {
        if self.high_capacity {
            arg as u64 * SECTOR_SIZE
        } else {
            arg as u64
        }
    }

    /// Execute one command. `None` means the card stayed silent, which the
    /// controller reports as a response timeout.
    pub fn execute(&mut self, index: u32, arg: u32) -> Option<Reply> {
        if std::mem::take(&mut self.app_command_next) {
            trace!("card ACMD{} arg={:#X}", index, arg);
            return self.execute_acmd(index, arg);
        }
        trace!("card CMD{} arg={:#X}", index, arg);

        match index {
            opcode::GO_IDLE_STATE => {
                self.state = CardState::Idle;
                self.power_up_polls = POWER_UP_POLLS;
                self.high_capacity = false;
                self.rca = 0;
                self.four_bit = false;
                self.pending = None;
                Some(Reply::None)
            }
            opcode::SEND_IF_COND => (self.state == CardState::Idle)
                .then_some(Reply::Short(arg & 0xfff)),
            opcode::ALL_SEND_CID if self.state == CardState::Ready => {
                self.state = CardState::Identify;
                Some(Reply::Long(CID))
            }
            opcode::SEND_RELATIVE_ADDR
                if matches!(self.state, CardState::Identify | CardState::Standby) =>
            {
                self.rca = DEFAULT_RCA;
                self.state = CardState::Standby;
                let r1 = self.r1();
                // R6: RCA plus status bits 23, 22, 19 and 12:0
                let bits = (r1 >> 8) & 0xc000 | (r1 >> 6) & 0x2000 | r1 & 0x1fff;
                Some(Reply::Short((self.rca as u32) << 16 | bits))
            }
            opcode::SELECT_CARD => {
                let selected = (arg >> 16) as u16 == self.rca && self.rca != 0;
                match (self.state, selected) {
                    (CardState::Standby, true) => self.state = CardState::Transfer,
                    (CardState::Transfer, false) => self.state = CardState::Standby,
                    (_, true) => {}
                    (_, false) => return None,
                }
                Some(Reply::Short(self.r1()))
            }
            opcode::SEND_CSD if (arg >> 16) as u16 == self.rca => {
                (self.state == CardState::Standby).then(|| Reply::Long(self.csd()))
            }
            opcode::STOP_TRANSMISSION => {
                self.pending = None;
                if matches!(self.state, CardState::Data | CardState::Receive) {
                    self.state = CardState::Transfer;
                }
                Some(Reply::Short(self.r1()))
            }
            opcode::SEND_STATUS if (arg >> 16) as u16 == self.rca => {
                Some(Reply::Short(self.r1()))
            }
            opcode::SET_BLOCKLEN if self.state == CardState::Transfer => {
                if self.high_capacity && arg != SECTOR_SIZE as u32 {
                    debug!("SDHC card ignores block length {}", arg);
                } else {
                    self.block_len = arg;
                }
                Some(Reply::Short(self.r1()))
            }
            opcode::READ_SINGLE_BLOCK | opcode::READ_MULTIPLE_BLOCK
                if self.state == CardState::Transfer =>
            {
                let reply = Reply::Short(self.r1());
                self.pending = Some(Pending::ReadBlocks {
                    offset: self.address(arg),
                    multi: index == opcode::READ_MULTIPLE_BLOCK,
                });
                self.state = CardState::Data;
                Some(reply)
            }
            opcode::WRITE_BLOCK | opcode::WRITE_MULTIPLE_BLOCK
                if self.state == CardState::Transfer =>
            {
                let reply = Reply::Short(self.r1());
                self.pending = Some(Pending::WriteBlocks {
                    offset: self.address(arg),
                    multi: index == opcode::WRITE_MULTIPLE_BLOCK,
                });
                self.state = CardState::Receive;
                Some(reply)
            }
            opcode::APP_CMD => {
                self.app_command_next = true;
                Some(Reply::Short(self.r1()))
            }
            _ => {
                warn!("card ignores CMD{} in {:?}", index, self.state);
                None
            }
        }
    }

    fn execute_acmd(&mut self, index: u32, arg: u32) -> Option<Reply> {
        match index {
            acmd::SD_SEND_OP_COND if self.state == CardState::Idle => {
                let mut value = ocr::VDD_320_330 | ocr::VDD_330_340 | 0x00ff_8000;
                if arg & value == 0 && arg != 0 {
                    warn!("card: no common voltage window in {:#X}", arg);
                    return None;
                }
                if self.power_up_polls > 0 {
                    self.power_up_polls -= 1;
                } else if arg != 0 {
                    self.high_capacity = arg & ocr::CCS != 0;
                    self.state = CardState::Ready;
                    value |= ocr::BUSY;
                    if self.high_capacity {
                        value |= ocr::CCS;
                    }
                }
                Some(Reply::ShortNoCrc(value))
            }
            acmd::SET_BUS_WIDTH if self.state == CardState::Transfer => {
                self.four_bit = arg & 0x3 == 0x2;
                Some(Reply::Short(self.r1() | status::APP_CMD))
            }
            acmd::SEND_SCR if self.state == CardState::Transfer => {
                let reply = Reply::Short(self.r1() | status::APP_CMD);
                self.pending = Some(Pending::Scr);
                self.state = CardState::Data;
                Some(reply)
            }
            acmd::SD_STATUS if self.state == CardState::Transfer => {
                let reply = Reply::Short(self.r1() | status::APP_CMD);
                self.pending = Some(Pending::SdStatus);
                self.state = CardState::Data;
                Some(reply)
            }
            _ => {
                warn!("card ignores ACMD{} in {:?}", index, self.state);
                None
            }
        }
    }

    fn end_data(&mut self, multi: bool) {
        if !multi {
            self.pending = None;
            self.state = CardState::Transfer;
        }
    }

    /// Produce `len` bytes for the armed read phase.
    pub fn read_data(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; len];
        match self.pending {
            Some(Pending::ReadBlocks { offset, multi }) => {
                if let Err(err) = self.storage.read_at(offset, &mut buf) {
                    self.status_errors |= status::OUT_OF_RANGE;
                    self.pending = None;
                    self.state = CardState::Transfer;
                    return Err(err);
                }
                debug!("card read {} bytes at {:#X}", len, offset);
                if multi {
                    self.pending = Some(Pending::ReadBlocks {
                        offset: offset + len as u64,
                        multi,
                    });
                }
                self.end_data(multi);
            }
            Some(Pending::Scr) => {
                // SD 2.00, 1 and 4 bit buses
                let scr = [0x02, 0x35, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00];
                let n = len.min(scr.len());
                buf[..n].copy_from_slice(&scr[..n]);
                self.end_data(false);
            }
            Some(Pending::SdStatus) => {
                if self.four_bit && !buf.is_empty() {
                    buf[0] = 0x80;
                }
                self.end_data(false);
            }
            Some(Pending::WriteBlocks { .. }) | None => {
                self.status_errors |= status::ILLEGAL_COMMAND;
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "no read phase armed",
                ));
            }
        }
        Ok(buf)
    }

    /// Consume the armed write phase's payload.
    pub fn write_data(&mut self, data: &[u8]) -> io::Result<()> {
        let Some(Pending::WriteBlocks { offset, multi }) = self.pending else {
            self.status_errors |= status::ILLEGAL_COMMAND;
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "no write phase armed",
            ));
        };
        if let Err(err) = self.storage.write_at(offset, data) {
            self.status_errors |= status::OUT_OF_RANGE;
            self.pending = None;
            self.state = CardState::Transfer;
            return Err(err);
        }
        debug!("card wrote {} bytes at {:#X}", data.len(), offset);
        if multi {
            self.pending = Some(Pending::WriteBlocks {
                offset: offset + data.len() as u64,
                multi,
            });
        }
        self.end_data(multi);
        Ok(())
    }
}
