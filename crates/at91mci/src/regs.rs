//! Register block access.
//!
//! [`RegisterBlock`] is the seam between the driver and whatever backs the
//! MCI window: volatile MMIO on hardware, [`crate::sim::SimRegisters`] in
//! tests and on the host.

use at91mci_hw::mmio::{mci, pdc};
use std::ptr::NonNull;
use tracing::trace;

/// 32-bit register window addressed by byte offset
pub trait RegisterBlock: Send {
    fn read(&mut self, offset: usize) -> u32;
    fn write(&mut self, offset: usize, value: u32);
}

/// The MCI window mapped into the address space
#[derive(Debug)]
pub struct Mmio {
    base: NonNull<u32>,
}

// SAFETY: the window is only reached through `&mut self`, and the controller
// serializes every access under its state lock.
unsafe impl Send for Mmio {}

impl Mmio {
    /// # Safety
    ///
    /// `base` must point at a mapped MCI register window of at least
    /// [`mci::WINDOW`] bytes that stays mapped, and is not accessed through
    /// any other handle, for the lifetime of the returned value.
    pub unsafe fn new(base: NonNull<u32>) -> Self {
        Self { base }
    }
}

impl RegisterBlock for Mmio {
    fn read(&mut self, offset: usize) -> u32 {
        debug_assert!(offset < mci::WINDOW && offset % 4 == 0);
        // SAFETY: offset is inside the window guaranteed by `Mmio::new`
        unsafe { self.base.as_ptr().add(offset / 4).read_volatile() }
    }

    fn write(&mut self, offset: usize, value: u32) {
        debug_assert!(offset < mci::WINDOW && offset % 4 == 0);
        // SAFETY: offset is inside the window guaranteed by `Mmio::new`
        unsafe { self.base.as_ptr().add(offset / 4).write_volatile(value) }
    }
}

/// Traced accessors plus the few multi-register sequences the driver repeats
#[derive(Debug)]
pub(crate) struct Regs<R> {
    block: R,
}

impl<R: RegisterBlock> Regs<R> {
    pub(crate) fn new(block: R) -> Self {
        Self { block }
    }

    pub(crate) fn rd(&mut self, offset: usize) -> u32 {
        let value = self.block.read(offset);
        trace!("MCI read: offset={:#X} value={:#X}", offset, value);
        value
    }

    pub(crate) fn wr(&mut self, offset: usize, value: u32) {
        trace!("MCI write: offset={:#X} value={:#X}", offset, value);
        self.block.write(offset, value);
    }

    /// Stop both PDC channels and clear every pointer/counter pair
    pub(crate) fn pdc_disable(&mut self) {
        use pdc::registers::*;
        self.wr(PTCR, pdc::ptcr::TXTDIS | pdc::ptcr::RXTDIS);
        for reg in [RPR, RCR, RNPR, RNCR, TPR, TCR, TNPR, TNCR] {
            self.wr(reg, 0);
        }
    }

    /// Mask every interrupt, stop DMA and hold the block in reset
    pub(crate) fn fini(&mut self) {
        use mci::registers::*;
        self.wr(IDR, mci::sr::ALL);
        self.pdc_disable();
        self.wr(CR, mci::cr::MCIDIS | mci::cr::SWRST);
    }

    /// Power-on programming: enabled, quiet, 1M-cycle data timeout, slot A
    /// at 1 bit, slow clock until the first ios update
    pub(crate) fn init(&mut self, proof_mode: bool) {
        use mci::registers::*;
        self.wr(CR, mci::cr::MCIEN);
        self.wr(IDR, mci::sr::ALL);
        self.wr(DTOR, mci::dtor::DTOMUL_1M | 1);
        let mut mr = mci::mr::PDCMODE | mci::mr::INIT_DIVIDERS;
        if proof_mode {
            mr |= mci::mr::RDPROOF | mci::mr::WRPROOF;
        }
        self.wr(MR, mr);
        self.wr(SDCR, mci::sdcr::SLOT_A);
    }

    pub(crate) fn into_inner(self) -> R {
        self.block
    }
}
