//! Interrupt handling.
//!
//! Reads, per transfer direction, follow ENDRX → RXBUFF → CMDRDY and writes
//! follow TXBUFE → NOTBUSY → CMDRDY; each stage unmasks only the next one.
//! Any error bit ends the step immediately.

use crate::bridge::State;
use crate::dma::{BusDma, SyncOp, swap_words};
use crate::error::MmcError;
use crate::mmc::{acmd, opcode};
use crate::regs::RegisterBlock;
use at91mci_hw::mmio::mci::{registers::*, sr};
use at91mci_hw::mmio::pdc::{self, registers::PTCR};
use tracing::{debug, trace, warn};

/// Map an error status to the command result.
///
/// Response CRC errors on the two R3 operating-condition commands are not
/// errors: R3 carries no CRC and the controller flags it anyway.
pub(crate) fn classify(status: u32, opcode: u32) -> Option<MmcError> {
    if status & sr::RCRCE != 0
        && (opcode == opcode::SEND_OP_COND || opcode == acmd::SD_SEND_OP_COND)
    {
        return None;
    }
    Some(if status & (sr::RTOE | sr::DTOE) != 0 {
        MmcError::Timeout
    } else if status & (sr::RCRCE | sr::DCRCE) != 0 {
        MmcError::BadCrc
    } else if status & (sr::OVRE | sr::UNRE) != 0 {
        MmcError::Fifo
    } else {
        MmcError::Failed
    })
}

impl<R: RegisterBlock, D: BusDma> State<R, D> {
    pub(crate) fn interrupt(&mut self) {
        let status = self.regs.rd(SR) & self.regs.rd(IMR);
        trace!("MCI interrupt: SR&IMR={:#010X}", status);

        let State {
            regs,
            dma,
            quirks,
            active,
            ..
        } = self;
        let Some(cmd) = active.as_mut().and_then(|a| a.current_mut()) else {
            warn!("spurious MCI interrupt: status {:#010X}", status);
            regs.wr(IDR, sr::ALL);
            return;
        };

        let mut done = false;
        if status & sr::ERROR != 0 {
            cmd.error = classify(status, cmd.opcode);
            match cmd.error {
                Some(err) => {
                    debug!("CMD{} error {:#010X}: {}", cmd.opcode, status, err);
                    if dma.is_mapped() {
                        dma.unload();
                    }
                }
                None => trace!("CMD{}: ignoring R3 CRC error", cmd.opcode),
            }
            done = true;
        } else {
            if status & sr::TXBUFE != 0 {
                trace!("TXBUFE");
                regs.wr(PTCR, pdc::ptcr::RXTDIS | pdc::ptcr::TXTDIS);
                regs.wr(IDR, sr::TXBUFE);
                regs.wr(IER, sr::NOTBUSY);
                dma.sync(SyncOp::PostWrite);
                dma.unload();
                if let Some(data) = cmd.data.as_mut() {
                    data.xfer_len = data.len();
                }
            }
            if status & sr::RXBUFF != 0 {
                trace!("RXBUFF");
                regs.wr(IDR, sr::RXBUFF);
                regs.wr(IER, sr::CMDRDY);
            }
            if status & sr::ENDTX != 0 {
                trace!("ENDTX");
            }
            if status & sr::ENDRX != 0 {
                trace!("ENDRX");
                dma.sync(SyncOp::PostRead);
                dma.unload();
                if let Some(data) = cmd.data.as_mut() {
                    if quirks.needs_byteswap {
                        swap_words(&mut data.buf);
                    }
                    data.xfer_len = data.len();
                }
                regs.wr(IDR, sr::ENDRX);
                regs.wr(IER, sr::RXBUFF);
                regs.wr(PTCR, pdc::ptcr::RXTDIS | pdc::ptcr::TXTDIS);
            }
            if status & sr::NOTBUSY != 0 {
                trace!("NOTBUSY");
                regs.wr(IDR, sr::NOTBUSY);
                regs.wr(IER, sr::CMDRDY);
            }
            if status & sr::DTIP != 0 {
                trace!("DTIP");
            }
            if status & sr::BLKE != 0 {
                trace!("BLKE");
            }
            if status & sr::TXRDY != 0 {
                trace!("TXRDY");
            }
            if status & sr::RXRDY != 0 {
                trace!("RXRDY");
            }
            if status & sr::CMDRDY != 0 {
                trace!("CMDRDY");
                cmd.error = None;
                done = true;
            }
        }

        if !done {
            return;
        }

        regs.wr(IDR, sr::ALL);
        for (i, word) in cmd.resp.iter_mut().take(cmd.flags.words()).enumerate() {
            *word = regs.rd(RSPR + i * 4);
        }
        trace!("CMD{} response {:08X?}", cmd.opcode, cmd.resp);
        self.advance();
    }
}
