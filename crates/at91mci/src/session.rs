//! Minimal upstream side of the bridge: SD card bring-up and single-block
//! I/O, plus a byte-addressed [`BlockDevice`] for filesystem crates.
//!
//! Completions are awaited with a timeout, so something else (a platform
//! interrupt handler or [`crate::sim::Simulator::spawn_interrupt_thread`])
//! must be calling [`Controller::handle_interrupt`].

use crate::bridge::Controller;
use crate::dma::BusDma;
use crate::error::SessionError;
use crate::host::{BusMode, BusWidth, HostCaps, HostMode, Ivar, IvarValue, PowerMode};
use crate::mmc::{Command, Data, Request, ResponseFlags, acmd, ocr, opcode};
use crate::regs::RegisterBlock;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Block size used for all data transfers
pub const BLOCK_SIZE: usize = 512;

/// Default wait for a single request to complete
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// ACMD41 attempts before giving up on power-up
const OCR_POLL_LIMIT: u32 = 100;
const OCR_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// CMD8 argument: 2.7-3.6V window, check pattern 0xAA
const IF_COND_CHECK: u32 = 0x1aa;

/// What bring-up learned about the card
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardInfo {
    pub rca: u16,
    /// Block (SDHC) rather than byte addressing
    pub high_capacity: bool,
    /// Capacity in bytes, from the CSD
    pub capacity: u64,
    pub bus_width: BusWidth,
    /// Achieved bus clock in Hz
    pub clock: u32,
}

/// Capacity in bytes encoded in a CSD (v1 or v2 layout)
pub fn csd_capacity(csd: &[u32; 4]) -> u64 {
    match csd[0] >> 30 {
        1 => {
            let c_size = (((csd[1] & 0x3f) << 16) | (csd[2] >> 16)) as u64;
            (c_size + 1) * 512 * 1024
        }
        _ => {
            let read_bl_len = (csd[1] >> 16) & 0xf;
            let c_size = (((csd[1] & 0x3ff) << 2) | (csd[2] >> 30)) as u64;
            let c_size_mult = (csd[2] >> 15) & 0x7;
            (c_size + 1) << (c_size_mult + 2 + read_bl_len)
        }
    }
}

/// Holds bus ownership until dropped
struct HostGuard<'a, R: RegisterBlock, D: BusDma>(&'a Controller<R, D>);

impl<'a, R: RegisterBlock, D: BusDma> HostGuard<'a, R, D> {
    fn acquire(controller: &'a Controller<R, D>) -> Self {
        controller.acquire_host();
        Self(controller)
    }
}

impl<R: RegisterBlock, D: BusDma> Drop for HostGuard<'_, R, D> {
    fn drop(&mut self) {
        self.0.release_host();
    }
}

/// An initialised card on one controller
pub struct CardSession<R, D> {
    controller: Arc<Controller<R, D>>,
    info: CardInfo,
    timeout: Duration,
}

impl<R: RegisterBlock, D: BusDma> CardSession<R, D> {
    /// Bring the card from power-up to transfer state.
    #[instrument(level = "debug", skip_all, fields(unit = controller.unit()))]
    pub fn init(controller: Arc<Controller<R, D>>) -> Result<Self, SessionError> {
        Self::init_with_timeout(controller, DEFAULT_TIMEOUT)
    }

    pub fn init_with_timeout(
        controller: Arc<Controller<R, D>>,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        let mut session = Self {
            controller,
            info: CardInfo {
                rca: 0,
                high_capacity: false,
                capacity: 0,
                bus_width: BusWidth::One,
                clock: 0,
            },
            timeout,
        };
        session.info = session.identify()?;
        info!(
            "card ready: RCA {:#06X}, {} bytes, {}, {:?} bus @ {} Hz",
            session.info.rca,
            session.info.capacity,
            if session.info.high_capacity { "SDHC" } else { "SDSC" },
            session.info.bus_width,
            session.info.clock
        );
        Ok(session)
    }

    pub fn info(&self) -> CardInfo {
        self.info
    }

    pub fn controller(&self) -> &Arc<Controller<R, D>> {
        &self.controller
    }

    /// Number of addressable blocks
    pub fn block_count(&self) -> u64 {
        self.info.capacity / BLOCK_SIZE as u64
    }

    fn identify(&self) -> Result<CardInfo, SessionError> {
        let ctl = &*self.controller;
        let _host = HostGuard::acquire(ctl);
        let host = ctl.host();

        ctl.write_ivar(IvarValue::PowerMode(PowerMode::Up))?;
        ctl.write_ivar(IvarValue::Vdd(host.host_ocr.trailing_zeros()))?;
        ctl.write_ivar(IvarValue::BusMode(BusMode::OpenDrain))?;
        ctl.write_ivar(IvarValue::PowerMode(PowerMode::On))?;
        ctl.set_timing(host.f_min, BusWidth::One)?;

        self.command(Command::new(opcode::GO_IDLE_STATE, 0, ResponseFlags::NONE))?;

        let v2 = match self.command(Command::new(
            opcode::SEND_IF_COND,
            IF_COND_CHECK,
            ResponseFlags::R7,
        )) {
            Ok(cmd) if cmd.resp[0] & 0xfff == IF_COND_CHECK => true,
            Ok(_) => return Err(SessionError::VoltageMismatch),
            Err(SessionError::Command { .. }) => {
                debug!("no CMD8 response: version 1.x card");
                false
            }
            Err(err) => return Err(err),
        };

        let mut op_cond = host.host_ocr;
        if v2 {
            op_cond |= ocr::CCS;
        }
        let mut card_ocr = 0;
        for attempt in 0..OCR_POLL_LIMIT {
            self.app_command(0)?;
            let cmd = self.command(Command::new(
                acmd::SD_SEND_OP_COND,
                op_cond,
                ResponseFlags::R3,
            ))?;
            card_ocr = cmd.resp[0];
            if card_ocr & ocr::BUSY != 0 {
                debug!("card powered up after {} polls: OCR {:#010X}", attempt + 1, card_ocr);
                break;
            }
            std::thread::sleep(OCR_POLL_INTERVAL);
        }
        if card_ocr & ocr::BUSY == 0 {
            return Err(SessionError::InitTimeout);
        }
        ctl.write_ivar(IvarValue::Ocr(card_ocr & host.host_ocr))?;
        ctl.write_ivar(IvarValue::Mode(HostMode::Sd))?;

        self.command(Command::new(opcode::ALL_SEND_CID, 0, ResponseFlags::R2))?;
        let rca = (self
            .command(Command::new(opcode::SEND_RELATIVE_ADDR, 0, ResponseFlags::R6))?
            .resp[0]
            >> 16) as u16;
        let rca_arg = (rca as u32) << 16;
        let csd = self
            .command(Command::new(opcode::SEND_CSD, rca_arg, ResponseFlags::R2))?
            .resp;

        ctl.write_ivar(IvarValue::BusMode(BusMode::PushPull))?;
        let mut ios = ctl.set_timing(host.f_max, BusWidth::One)?;
        self.command(Command::new(opcode::SELECT_CARD, rca_arg, ResponseFlags::R1B))?;

        let caps = match ctl.read_ivar(Ivar::Caps)? {
            IvarValue::Caps(caps) => caps,
            _ => HostCaps::empty(),
        };
        if caps.contains(HostCaps::FOUR_BIT_DATA) {
            self.app_command(rca_arg)?;
            self.command(Command::new(acmd::SET_BUS_WIDTH, 2, ResponseFlags::R1))?;
            ios = ctl.set_timing(host.f_max, BusWidth::Four)?;
        }

        self.command(Command::new(
            opcode::SET_BLOCKLEN,
            BLOCK_SIZE as u32,
            ResponseFlags::R1,
        ))?;

        Ok(CardInfo {
            rca,
            high_capacity: card_ocr & ocr::CCS != 0,
            capacity: csd_capacity(&csd),
            bus_width: ios.bus_width,
            clock: ios.clock,
        })
    }

    fn app_command(&self, rca_arg: u32) -> Result<Command, SessionError> {
        self.command(Command::new(opcode::APP_CMD, rca_arg, ResponseFlags::R1))
    }

    /// Run `request` to completion and surface the first command error.
    pub fn execute(&self, request: Request) -> Result<Request, SessionError> {
        let completion = self.controller.submit(request)?;
        let request = completion
            .wait_timeout(self.timeout)?
            .ok_or(SessionError::Stalled(self.timeout))?;
        for cmd in std::iter::once(&request.cmd).chain(request.stop.as_ref()) {
            if let Some(error) = cmd.error {
                return Err(SessionError::Command {
                    opcode: cmd.opcode,
                    error,
                });
            }
        }
        Ok(request)
    }

    /// Run a single command without a stop command
    pub fn command(&self, cmd: Command) -> Result<Command, SessionError> {
        Ok(self.execute(Request::new(cmd))?.cmd)
    }

    fn block_arg(&self, lba: u64) -> u32 {
        if self.info.high_capacity {
            lba as u32
        } else {
            (lba * BLOCK_SIZE as u64) as u32
        }
    }

    /// Read block `lba` into `buf`
    #[instrument(level = "debug", skip(self, buf))]
    pub fn read_block(&self, lba: u64, buf: &mut [u8]) -> Result<(), SessionError> {
        if buf.len() != BLOCK_SIZE {
            return Err(SessionError::Unaligned(buf.len()));
        }
        let _host = HostGuard::acquire(&*self.controller);
        let cmd = Command::new(opcode::READ_SINGLE_BLOCK, self.block_arg(lba), ResponseFlags::R1)
            .with_data(Data::read(BLOCK_SIZE));
        let cmd = self.command(cmd)?;
        if let Some(data) = cmd.data {
            buf.copy_from_slice(&data.buf);
        }
        Ok(())
    }

    /// Write `buf` to block `lba`
    #[instrument(level = "debug", skip(self, buf))]
    pub fn write_block(&self, lba: u64, buf: &[u8]) -> Result<(), SessionError> {
        if buf.len() != BLOCK_SIZE {
            return Err(SessionError::Unaligned(buf.len()));
        }
        let _host = HostGuard::acquire(&*self.controller);
        let cmd = Command::new(opcode::WRITE_BLOCK, self.block_arg(lba), ResponseFlags::R1)
            .with_data(Data::write(buf.to_vec()));
        self.command(cmd)?;
        Ok(())
    }

    /// Card status register (CMD13)
    pub fn status(&self) -> Result<u32, SessionError> {
        let _host = HostGuard::acquire(&*self.controller);
        let arg = (self.info.rca as u32) << 16;
        Ok(self
            .command(Command::new(opcode::SEND_STATUS, arg, ResponseFlags::R1))?
            .resp[0])
    }
}

/// Byte-addressed view of a card for `Read + Write + Seek` consumers
pub struct BlockDevice<R, D> {
    session: CardSession<R, D>,
    pos: u64,
}

impl<R: RegisterBlock, D: BusDma> BlockDevice<R, D> {
    pub fn new(session: CardSession<R, D>) -> Self {
        Self { session, pos: 0 }
    }

    pub fn len(&self) -> u64 {
        self.session.info.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_session(self) -> CardSession<R, D> {
        self.session
    }

    fn split(&self) -> (u64, usize) {
        (
            self.pos / BLOCK_SIZE as u64,
            (self.pos % BLOCK_SIZE as u64) as usize,
        )
    }
}

impl<R: RegisterBlock, D: BusDma> Read for BlockDevice<R, D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.len() || buf.is_empty() {
            return Ok(0);
        }
        let (lba, offset) = self.split();
        let mut block = [0u8; BLOCK_SIZE];
        self.session.read_block(lba, &mut block)?;
        let n = (BLOCK_SIZE - offset)
            .min(buf.len())
            .min((self.len() - self.pos) as usize);
        buf[..n].copy_from_slice(&block[offset..offset + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: RegisterBlock, D: BusDma> Write for BlockDevice<R, D> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.pos >= self.len() {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write past end of card",
            ));
        }
        let (lba, offset) = self.split();
        let n = (BLOCK_SIZE - offset)
            .min(buf.len())
            .min((self.len() - self.pos) as usize);
        let mut block = [0u8; BLOCK_SIZE];
        if n != BLOCK_SIZE {
            self.session.read_block(lba, &mut block)?;
        }
        block[offset..offset + n].copy_from_slice(&buf[..n]);
        self.session.write_block(lba, &block)?;
        self.pos += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<R: RegisterBlock, D: BusDma> Seek for BlockDevice<R, D> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.len().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of card")
        })?;
        self.pos = target;
        Ok(target)
    }
}
