//! Peripheral DMA Controller (PDC) channel pair embedded in the MCI window.
//!
//! # References
//! - AT91RM9200 datasheet, section "Peripheral Data Controller (PDC)"

/// PDC register offsets (relative to the MCI peripheral base)
pub mod registers {
    /// Receive pointer register
    pub const RPR: usize = 0x100;
    /// Receive counter register (32-bit words in PDC mode)
    pub const RCR: usize = 0x104;
    /// Transmit pointer register
    pub const TPR: usize = 0x108;
    /// Transmit counter register (32-bit words in PDC mode)
    pub const TCR: usize = 0x10c;
    /// Receive next pointer register
    pub const RNPR: usize = 0x110;
    /// Receive next counter register
    pub const RNCR: usize = 0x114;
    /// Transmit next pointer register
    pub const TNPR: usize = 0x118;
    /// Transmit next counter register
    pub const TNCR: usize = 0x11c;
    /// Transfer control register (write-only)
    pub const PTCR: usize = 0x120;
    /// Transfer status register (read-only)
    pub const PTSR: usize = 0x124;
}

/// Transfer control register bits
pub mod ptcr {
    /// Receiver transfer enable
    pub const RXTEN: u32 = 1 << 0;
    /// Receiver transfer disable
    pub const RXTDIS: u32 = 1 << 1;
    /// Transmitter transfer enable
    pub const TXTEN: u32 = 1 << 8;
    /// Transmitter transfer disable
    pub const TXTDIS: u32 = 1 << 9;
}

/// Transfer status register bits
pub mod ptsr {
    /// Receiver transfer enabled
    pub const RXTEN: u32 = 1 << 0;
    /// Transmitter transfer enabled
    pub const TXTEN: u32 = 1 << 8;
}
