//! Command sequencing: one primary command, then an optional stop command,
//! then completion.
//!
//! `advance` runs after submit and after every finished step. `start_cmd`
//! programs the controller for a single command and, when data is attached,
//! arms the matching PDC channel.
//!
//! # References
//! - AT91SAM9260 datasheet, MCI chapter: "Command Register", "PDC mode"

use crate::bridge::{Completer, State};
use crate::dma::{BusDma, DmaDirection, SyncOp, stage_write};
use crate::error::MmcError;
use crate::host::BusMode;
use crate::mmc::{Command, DataFlags, Request, opcode};
use crate::regs::RegisterBlock;
use at91mci_hw::mmio::mci::{self, cmdr, registers::*};
use at91mci_hw::mmio::pdc::{self, registers::*};
use at91mci_hw::specs;
use bitflags::bitflags;
use tracing::{debug, warn};

bitflags! {
    /// Progress through the current request
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub(crate) struct SeqFlags: u8 {
        const CMD_STARTED = 1 << 0;
        const STOP_STARTED = 1 << 1;
    }
}

/// Which of the request's commands is on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Command,
    Stop,
}

/// The outstanding request and its sequencing state
#[derive(Debug)]
pub(crate) struct Active {
    pub(crate) request: Request,
    completer: Completer,
    pub(crate) flags: SeqFlags,
    pub(crate) current: Option<Phase>,
}

impl Active {
    pub(crate) fn new(request: Request, completer: Completer) -> Self {
        Self {
            request,
            completer,
            flags: SeqFlags::empty(),
            current: None,
        }
    }

    /// The command currently on the wire
    pub(crate) fn current_mut(&mut self) -> Option<&mut Command> {
        match self.current? {
            Phase::Command => Some(&mut self.request.cmd),
            Phase::Stop => self.request.stop.as_mut(),
        }
    }

    pub(crate) fn finish(self) {
        debug!(
            "request CMD{} done: {:?}",
            self.request.cmd.opcode,
            self.request.result()
        );
        self.completer.complete(self.request);
    }
}

/// CMDR value for `cmd`, without the data-phase bits
pub(crate) fn compose_cmdr(cmd: &Command, bus_mode: BusMode) -> u32 {
    let mut value = cmd.opcode & cmdr::CMDNB;
    if cmd.flags.words() == 0 {
        value |= cmdr::RSPTYP_NO;
    } else {
        value |= cmdr::MAXLAT;
        value |= if cmd.flags.words() == 4 {
            cmdr::RSPTYP_136
        } else {
            cmdr::RSPTYP_48
        };
    }
    if cmd.opcode == opcode::STOP_TRANSMISSION {
        value |= cmdr::TRCMD_STOP;
    }
    if bus_mode == BusMode::OpenDrain {
        value |= cmdr::OPDCMD;
    }
    value
}

/// Data-phase CMDR bits for `flags`
pub(crate) fn data_cmdr(flags: DataFlags) -> u32 {
    let mut value = 0;
    if flags.contains(DataFlags::READ) {
        value |= cmdr::TRDIR;
    }
    if flags.intersects(DataFlags::READ | DataFlags::WRITE) {
        value |= cmdr::TRCMD_START;
    }
    if flags.contains(DataFlags::STREAM) {
        value |= cmdr::TRTYP_STREAM;
    }
    if flags.contains(DataFlags::MULTI) {
        value |= cmdr::TRTYP_MULTIPLE;
    }
    value
}

impl<R: RegisterBlock, D: BusDma> State<R, D> {
    /// Start the next command of the active request, or complete it.
    pub(crate) fn advance(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };

        if !active.flags.contains(SeqFlags::CMD_STARTED) {
            active.flags |= SeqFlags::CMD_STARTED;
            self.start_cmd(Phase::Command);
            return;
        }
        if !active.flags.contains(SeqFlags::STOP_STARTED) && active.request.stop.is_some() {
            active.flags |= SeqFlags::STOP_STARTED;
            self.start_cmd(Phase::Stop);
            return;
        }

        if let Some(active) = self.active.take() {
            active.finish();
        }
    }

    fn start_cmd(&mut self, phase: Phase) {
        let State {
            regs,
            dma,
            bounce,
            host,
            quirks,
            active: slot,
            ..
        } = self;
        let Some(active) = slot.as_mut() else {
            return;
        };
        active.current = Some(phase);
        let Some(cmd) = active.current_mut() else {
            warn!("{:?} phase started without a command", phase);
            return;
        };

        let mut value = compose_cmdr(cmd, host.ios.bus_mode);
        debug!(
            "CMD{} arg={:#010X} flags={:?} data={}",
            cmd.opcode,
            cmd.arg,
            cmd.flags,
            cmd.data.as_ref().map_or(0, |d| d.len())
        );

        let Some(data) = cmd.data.as_mut() else {
            regs.pdc_disable();
            regs.wr(ARGR, cmd.arg);
            regs.wr(CMDR, value);
            regs.wr(IER, mci::sr::ERROR | mci::sr::CMDRDY);
            return;
        };

        value |= data_cmdr(data.flags);
        let transfer = value & cmdr::TRCMD_START != 0;
        let read = data.is_read();

        let mr = regs.rd(MR) & !mci::mr::BLKLEN;
        let blklen = ((data.len() as u32) << mci::mr::BLKLEN_SHIFT) & mci::mr::BLKLEN;
        regs.wr(MR, mr | blklen | mci::mr::PDCMODE);
        regs.wr(PTCR, pdc::ptcr::RXTDIS | pdc::ptcr::TXTDIS);

        let mut ier = mci::sr::CMDRDY;
        if transfer {
            data.xfer_len = 0;
            let mapped = if read {
                let len = data.len();
                dma.load(&mut data.buf, DmaDirection::FromDevice)
                    .map(|addr| (addr, len))
            } else {
                stage_write(
                    bounce,
                    &data.buf,
                    quirks.short_write_erratum,
                    specs::dma::SHORT_WRITE_MIN,
                    quirks.needs_byteswap,
                )
                .and_then(|len| {
                    dma.load(&mut bounce[..len], DmaDirection::ToDevice)
                        .map(|addr| (addr, len))
                })
            };

            let (addr, len) = match mapped {
                Ok(mapping) => mapping,
                Err(err) => {
                    warn!("CMD{}: DMA setup failed: {}", cmd.opcode, err);
                    cmd.error = Some(MmcError::NoMemory);
                    if let Some(active) = slot.take() {
                        active.finish();
                    }
                    return;
                }
            };

            let words = (len / 4) as u32;
            if read {
                dma.sync(SyncOp::PreRead);
                regs.wr(RPR, addr);
                regs.wr(RCR, words);
                ier = mci::sr::ENDRX;
            } else {
                dma.sync(SyncOp::PreWrite);
                regs.wr(TPR, addr);
                regs.wr(TCR, words);
                ier = mci::sr::TXBUFE;
            }
        }

        regs.wr(ARGR, cmd.arg);
        if transfer && read {
            regs.wr(PTCR, pdc::ptcr::RXTEN);
            regs.wr(CMDR, value);
        } else if transfer {
            regs.wr(CMDR, value);
            regs.wr(PTCR, pdc::ptcr::TXTEN);
        } else {
            regs.wr(CMDR, value);
        }
        regs.wr(IER, mci::sr::ERROR | ier);
    }
}
