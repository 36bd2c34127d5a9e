//! Software model of an AT91 MCI block, its PDC channel pair and an SD card.
//!
//! [`Simulator`] hands out a [`SimRegisters`] register block and a [`SimDma`]
//! engine that share one model, so a [`crate::Controller`] can be attached to
//! it exactly as to real hardware. The interrupt line is level-triggered:
//! it is asserted whenever `SR & IMR` is non-zero.
//!
//! Command and data phases complete instantly when their trigger register is
//! written. PDC status bits are derived from the pointer/counter registers,
//! so ENDRX/RXBUFF/ENDTX/TXBUFE rise as soon as a counter reaches zero.
//!
//! The model reproduces the two controller quirks the driver works around:
//! RM9200 stores received words byte-reversed (and fetches transmitted words
//! the same way), and MCI1 rev2xx parts underrun on writes under 12 bytes.
//!
//! # References
//! - AT91RM9200 / AT91SAM9260 datasheets, MCI and PDC chapters
//! - AT91SAM9260 errata: "MCI: Data Write Operation and number of bytes"

pub mod card;

pub use card::{Card, CardState, Reply, Storage};

use crate::dma::{BusDma, DmaDirection, SyncOp, swap_words};
use crate::error::DmaError;
use crate::platform::SocVariant;
use crate::regs::RegisterBlock;
use at91mci_hw::mmio::mci::{self, cmdr, registers::*, sr};
use at91mci_hw::mmio::pdc::{self, registers::*};
use at91mci_hw::specs;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Bus address of every mapping [`SimDma`] hands out
pub const BUS_BASE: u32 = 0x2000_0000;

/// How often an idle interrupt thread re-checks for shutdown
const IRQ_POLL: Duration = Duration::from_millis(20);

/// One DMA engine call, in the order the driver made them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaEvent {
    Load {
        bus: u32,
        len: usize,
        dir: DmaDirection,
    },
    Sync(SyncOp),
    Unload,
}

/// Raw pointer to a loaded buffer
struct DmaPtr(NonNull<u8>);

// SAFETY: the pointer is only dereferenced under the model lock while the
// mapping is loaded, which the `BusDma::load` contract keeps valid.
unsafe impl Send for DmaPtr {}

struct Mapping {
    ptr: DmaPtr,
    bus: u32,
    len: usize,
}

struct SimState {
    soc: SocVariant,
    card: Card,
    regs: [u32; mci::WINDOW / 4],
    enabled: bool,
    imr: u32,
    /// Latched SR bits; the PDC and NOTBUSY bits are derived in `status`
    status: u32,
    rx_enabled: bool,
    tx_enabled: bool,
    /// Card data waiting for the RX channel
    rx_pending: Option<Vec<u8>>,
    /// Logical length the card expects, waiting for the TX channel
    tx_pending: Option<usize>,
    card_busy: bool,
    inject: u32,
    mapping: Option<Mapping>,
    fail_next_load: bool,
    write_log: Vec<(usize, u32)>,
    dma_log: Vec<DmaEvent>,
    last_tx: Vec<u8>,
}

impl SimState {
    fn new(soc: SocVariant, card: Card) -> Self {
        Self {
            soc,
            card,
            regs: [0; mci::WINDOW / 4],
            enabled: false,
            imr: 0,
            status: 0,
            rx_enabled: false,
            tx_enabled: false,
            rx_pending: None,
            tx_pending: None,
            card_busy: false,
            inject: 0,
            mapping: None,
            fail_next_load: false,
            write_log: Vec::new(),
            dma_log: Vec::new(),
            last_tx: Vec::new(),
        }
    }

    fn reg(&self, offset: usize) -> u32 {
        self.regs[offset / 4]
    }

    fn set_reg(&mut self, offset: usize, value: u32) {
        self.regs[offset / 4] = value;
    }

    fn reset(&mut self) {
        debug!("MCI software reset");
        self.regs = [0; mci::WINDOW / 4];
        self.enabled = false;
        self.imr = 0;
        self.status = 0;
        self.rx_enabled = false;
        self.tx_enabled = false;
        self.rx_pending = None;
        self.tx_pending = None;
        self.card_busy = false;
    }

    fn status(&self) -> u32 {
        let mut status = self.status;
        let (rcr, rncr) = (self.reg(RCR), self.reg(RNCR));
        let (tcr, tncr) = (self.reg(TCR), self.reg(TNCR));
        if rcr == 0 {
            status |= sr::ENDRX;
            if rncr == 0 {
                status |= sr::RXBUFF;
            }
        }
        if tcr == 0 {
            status |= sr::ENDTX;
            if tncr == 0 {
                status |= sr::TXBUFE;
            }
        }
        if !self.card_busy {
            status |= sr::NOTBUSY;
        }
        status
    }

    fn irq_asserted(&self) -> bool {
        self.status() & self.imr != 0
    }

    fn read(&mut self, offset: usize) -> u32 {
        match offset {
            SR => self.status(),
            IMR => self.imr,
            PTSR => {
                let mut value = 0;
                if self.rx_enabled {
                    value |= pdc::ptsr::RXTEN;
                }
                if self.tx_enabled {
                    value |= pdc::ptsr::TXTEN;
                }
                value
            }
            o if o < mci::WINDOW && o % 4 == 0 => self.reg(o),
            _ => {
                warn!("Unknown MCI register read: offset={:#X}", offset);
                0
            }
        }
    }

    fn write(&mut self, offset: usize, value: u32) {
        self.write_log.push((offset, value));
        match offset {
            CR => {
                if value & mci::cr::SWRST != 0 {
                    self.reset();
                }
                if value & mci::cr::MCIDIS != 0 {
                    self.enabled = false;
                } else if value & mci::cr::MCIEN != 0 {
                    self.enabled = true;
                }
            }
            IER => self.imr |= value,
            IDR => self.imr &= !value,
            CMDR => {
                self.set_reg(CMDR, value);
                self.command(value);
            }
            PTCR => self.ptcr(value),
            SR | IMR | PTSR => {
                warn!("Write to read-only MCI register {:#X}", offset);
            }
            o if (RSPR..RSPR + 16).contains(&o) => {
                warn!("Write to read-only MCI register {:#X}", offset);
            }
            o if o < mci::WINDOW && o % 4 == 0 => self.set_reg(o, value),
            _ => {
                warn!(
                    "Unknown MCI register write: offset={:#X}, value={:#X}",
                    offset, value
                );
            }
        }
    }

    fn ptcr(&mut self, value: u32) {
        if value & pdc::ptcr::RXTDIS != 0 {
            self.rx_enabled = false;
        } else if value & pdc::ptcr::RXTEN != 0 {
            self.rx_enabled = true;
            self.pump_rx();
        }
        if value & pdc::ptcr::TXTDIS != 0 {
            self.tx_enabled = false;
        } else if value & pdc::ptcr::TXTEN != 0 {
            self.tx_enabled = true;
            self.pump_tx();
        }
    }

    fn set_response(&mut self, words: [u32; 4]) {
        for (i, word) in words.into_iter().enumerate() {
            self.set_reg(RSPR + i * 4, word);
        }
    }

    fn command(&mut self, value: u32) {
        self.status &= !(sr::CMDRDY | sr::ERROR);
        let index = value & cmdr::CMDNB;
        let arg = self.reg(ARGR);
        let expects_response = value & cmdr::RSPTYP != cmdr::RSPTYP_NO;
        debug!("MCI CMD{} arg={:#X} cmdr={:#X}", index, arg, value);

        if !self.enabled {
            warn!("CMD{} issued with the controller disabled", index);
            self.status |= sr::RTOE | sr::CMDRDY;
            return;
        }
        let injected = std::mem::take(&mut self.inject);
        if injected != 0 {
            debug!("CMD{}: injecting status {:#X}", index, injected);
            self.status |= injected | sr::CMDRDY;
            return;
        }

        match self.card.execute(index, arg) {
            None => {
                if expects_response {
                    self.status |= sr::RTOE;
                }
                self.status |= sr::CMDRDY;
                return;
            }
            Some(Reply::None) => {}
            Some(Reply::Short(word)) => self.set_response([word, 0, 0, 0]),
            Some(Reply::ShortNoCrc(word)) => {
                self.set_response([word, 0, 0, 0]);
                if expects_response {
                    self.status |= sr::RCRCE;
                }
            }
            Some(Reply::Long(words)) => self.set_response(words),
        }
        self.status |= sr::CMDRDY;

        if value & cmdr::TRCMD == cmdr::TRCMD_START {
            self.data_phase(value);
        }
    }

    fn data_phase(&mut self, value: u32) {
        let blklen = ((self.reg(MR) & mci::mr::BLKLEN) >> mci::mr::BLKLEN_SHIFT) as usize;
        if value & cmdr::TRDIR != 0 {
            match self.card.read_data(blklen) {
                Ok(data) => {
                    self.rx_pending = Some(data);
                    self.pump_rx();
                }
                Err(err) => {
                    warn!("card read failed: {}", err);
                    self.status |= sr::DTOE;
                }
            }
        } else if self.card.expects_write() {
            self.tx_pending = Some(blklen);
            self.card_busy = true;
            self.pump_tx();
        } else {
            warn!("write data phase without a card write command");
            self.status |= sr::DTOE;
        }
    }

    /// Bytes at `bus..bus + len` inside the loaded mapping
    fn mapped_window(&mut self, bus: u32, len: usize) -> Option<&mut [u8]> {
        let mapping = self.mapping.as_ref()?;
        let start = bus.checked_sub(mapping.bus)? as usize;
        if start + len > mapping.len {
            return None;
        }
        // SAFETY: the window lies inside a loaded mapping, which the
        // `BusDma::load` contract keeps valid and otherwise untouched
        unsafe {
            Some(std::slice::from_raw_parts_mut(
                mapping.ptr.0.as_ptr().add(start),
                len,
            ))
        }
    }

    fn pump_rx(&mut self) {
        if !self.rx_enabled {
            return;
        }
        let Some(data) = self.rx_pending.take() else {
            return;
        };
        let bus = self.reg(RPR);
        let len = (self.reg(RCR) as usize * 4).min(data.len());
        let byteswap = self.soc.needs_byteswap();
        let Some(window) = self.mapped_window(bus, len) else {
            warn!("RX DMA to unmapped bus address {:#X}+{}", bus, len);
            self.status |= sr::OVRE;
            return;
        };
        window.copy_from_slice(&data[..len]);
        if byteswap {
            swap_words(window);
        }
        trace!("PDC RX {} bytes to {:#X}", len, bus);
        self.set_reg(RPR, bus + len as u32);
        self.set_reg(RCR, 0);
    }

    fn pump_tx(&mut self) {
        if !self.tx_enabled {
            return;
        }
        let Some(logical) = self.tx_pending.take() else {
            return;
        };
        let bus = self.reg(TPR);
        let len = self.reg(TCR) as usize * 4;
        let Some(window) = self.mapped_window(bus, len) else {
            warn!("TX DMA from unmapped bus address {:#X}+{}", bus, len);
            self.status |= sr::UNRE;
            self.card_busy = false;
            return;
        };
        let fetched = window.to_vec();
        trace!("PDC TX {} bytes from {:#X}", len, bus);
        self.set_reg(TPR, bus + len as u32);
        self.set_reg(TCR, 0);
        self.card_busy = false;
        self.last_tx = fetched.clone();

        if self.soc.is_mci1_rev2xx() && len < specs::dma::SHORT_WRITE_MIN {
            warn!("{} byte write underruns on MCI1 rev2xx", len);
            self.status |= sr::UNRE;
            return;
        }

        let mut payload = fetched;
        if self.soc.needs_byteswap() {
            swap_words(&mut payload);
        }
        payload.truncate(logical.min(len));
        if let Err(err) = self.card.write_data(&payload) {
            warn!("card write failed: {}", err);
            self.status |= sr::DCRCE;
        }
    }
}

struct Shared {
    state: Mutex<SimState>,
    irq: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_irq(&self, timeout: Duration, stop: Option<&AtomicBool>) -> bool {
        let stopped = || stop.is_some_and(|s| s.load(Ordering::Acquire));
        let guard = self.lock();
        let (guard, _) = self
            .irq
            .wait_timeout_while(guard, timeout, |st| !st.irq_asserted() && !stopped())
            .unwrap_or_else(PoisonError::into_inner);
        guard.irq_asserted()
    }
}

/// A simulated controller and card
#[derive(Clone)]
pub struct Simulator {
    shared: Arc<Shared>,
}

impl Simulator {
    pub fn new(soc: SocVariant, card: Card) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SimState::new(soc, card)),
                irq: Condvar::new(),
            }),
        }
    }

    /// Register block view for [`crate::Controller::attach`]
    pub fn registers(&self) -> SimRegisters {
        SimRegisters {
            shared: Arc::clone(&self.shared),
        }
    }

    /// DMA engine view for [`crate::Controller::attach`]
    pub fn dma(&self) -> SimDma {
        SimDma {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn soc(&self) -> SocVariant {
        self.shared.lock().soc
    }

    pub fn irq_asserted(&self) -> bool {
        self.shared.lock().irq_asserted()
    }

    /// Block until the interrupt line is asserted or `timeout` passes
    pub fn wait_irq(&self, timeout: Duration) -> bool {
        self.shared.wait_irq(timeout, None)
    }

    /// Call `handler` while the line stays asserted, at most `limit` times.
    /// Returns the number of calls.
    pub fn pump(&self, mut handler: impl FnMut(), limit: usize) -> usize {
        let mut calls = 0;
        while calls < limit && self.irq_asserted() {
            handler();
            calls += 1;
        }
        calls
    }

    /// Run `handler` on a dedicated thread whenever the line is asserted.
    pub fn spawn_interrupt_thread<F>(&self, handler: F) -> InterruptThread
    where
        F: Fn() + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let shared = Arc::clone(&shared);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    if shared.wait_irq(IRQ_POLL, Some(&stop)) && !stop.load(Ordering::Acquire) {
                        handler();
                    }
                }
            })
        };
        InterruptThread {
            shared,
            stop,
            handle: Some(handle),
        }
    }

    /// Side-effect-free register peek
    pub fn register(&self, offset: usize) -> u32 {
        self.shared.lock().read(offset)
    }

    /// Every register write so far, oldest first
    pub fn write_log(&self) -> Vec<(usize, u32)> {
        self.shared.lock().write_log.clone()
    }

    /// Values written to `offset`, oldest first
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.shared
            .lock()
            .write_log
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn dma_log(&self) -> Vec<DmaEvent> {
        self.shared.lock().dma_log.clone()
    }

    pub fn clear_logs(&self) {
        let mut st = self.shared.lock();
        st.write_log.clear();
        st.dma_log.clear();
    }

    /// Bytes the PDC fetched for the last write, as laid out in memory
    pub fn last_tx(&self) -> Vec<u8> {
        self.shared.lock().last_tx.clone()
    }

    /// Raise `bits` (with CMDRDY) instead of executing the next command
    pub fn inject_error(&self, bits: u32) {
        self.shared.lock().inject = bits;
    }

    /// Latch `bits` in SR immediately
    pub fn raise_status(&self, bits: u32) {
        self.shared.lock().status |= bits;
        self.shared.irq.notify_all();
    }

    /// Make the next DMA load fail with [`DmaError::Exhausted`]
    pub fn fail_next_dma_load(&self) {
        self.shared.lock().fail_next_load = true;
    }

    /// Number of loaded mappings (0 or 1)
    pub fn mapped(&self) -> usize {
        usize::from(self.shared.lock().mapping.is_some())
    }

    pub fn with_card<T>(&self, f: impl FnOnce(&mut Card) -> T) -> T {
        f(&mut self.shared.lock().card)
    }
}

/// The simulator's register window
#[derive(Clone)]
pub struct SimRegisters {
    shared: Arc<Shared>,
}

impl RegisterBlock for SimRegisters {
    fn read(&mut self, offset: usize) -> u32 {
        self.shared.lock().read(offset)
    }

    fn write(&mut self, offset: usize, value: u32) {
        self.shared.lock().write(offset, value);
        self.shared.irq.notify_all();
    }
}

/// The simulator's DMA engine
#[derive(Clone)]
pub struct SimDma {
    shared: Arc<Shared>,
}

impl BusDma for SimDma {
    unsafe fn load(
        &mut self,
        buf: NonNull<u8>,
        len: usize,
        dir: DmaDirection,
    ) -> Result<u32, DmaError> {
        let mut st = self.shared.lock();
        if std::mem::take(&mut st.fail_next_load) {
            return Err(DmaError::Exhausted);
        }
        if len > specs::dma::MAX_MAPPING {
            return Err(DmaError::TooLarge {
                len,
                max: specs::dma::MAX_MAPPING,
            });
        }
        if st.mapping.is_some() {
            return Err(DmaError::AlreadyMapped);
        }
        st.mapping = Some(Mapping {
            ptr: DmaPtr(buf),
            bus: BUS_BASE,
            len,
        });
        st.dma_log.push(DmaEvent::Load {
            bus: BUS_BASE,
            len,
            dir,
        });
        Ok(BUS_BASE)
    }

    fn sync(&mut self, op: SyncOp) {
        self.shared.lock().dma_log.push(DmaEvent::Sync(op));
    }

    fn unload(&mut self) {
        let mut st = self.shared.lock();
        if st.mapping.take().is_none() {
            warn!("SimDma unload without a mapping");
        }
        st.dma_log.push(DmaEvent::Unload);
    }
}

/// Background interrupt dispatcher; stopped and joined on drop
pub struct InterruptThread {
    shared: Arc<Shared>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for InterruptThread {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.shared.irq.notify_all();
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            warn!("interrupt thread panicked");
        }
    }
}
