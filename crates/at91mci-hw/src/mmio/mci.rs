//! # References
//! - AT91RM9200 datasheet, section "MultiMedia Card Interface (MCI)"
//! - AT91SAM9260 datasheet, section "MultiMedia Card Interface (MCI)"

/// Size of the MCI register window, PDC block included
pub const WINDOW: usize = 0x128;

/// MCI register offsets (relative to the peripheral base)
pub mod registers {
    /// Control register
    pub const CR: usize = 0x00;

    /// Mode register (clock divider, power-save divider, PDC mode, block length)
    pub const MR: usize = 0x04;

    /// Data timeout register
    pub const DTOR: usize = 0x08;

    /// SD card register (slot and bus width selection)
    pub const SDCR: usize = 0x0c;

    /// Command argument register
    pub const ARGR: usize = 0x10;

    /// Command register
    pub const CMDR: usize = 0x14;

    /// Response registers (4 × 32 bits, consecutive)
    pub const RSPR: usize = 0x20;

    /// Receive data register
    pub const RDR: usize = 0x30;

    /// Transmit data register
    pub const TDR: usize = 0x34;

    /// Status register
    pub const SR: usize = 0x40;

    /// Interrupt enable register (write-only)
    pub const IER: usize = 0x44;

    /// Interrupt disable register (write-only)
    pub const IDR: usize = 0x48;

    /// Interrupt mask register (read-only)
    pub const IMR: usize = 0x4c;
}

/// Control register bits
pub mod cr {
    /// Multi-media interface enable
    pub const MCIEN: u32 = 1 << 0;
    /// Multi-media interface disable
    pub const MCIDIS: u32 = 1 << 1;
    /// Power-save mode enable
    pub const PWSEN: u32 = 1 << 2;
    /// Power-save mode disable
    pub const PWSDIS: u32 = 1 << 3;
    /// Software reset
    pub const SWRST: u32 = 1 << 7;
}

/// Mode register bits
pub mod mr {
    /// Clock divider field; bus clock is MCK / (2 * (CLKDIV + 1))
    pub const CLKDIV: u32 = 0xff;
    /// Power-saving divider field
    pub const PWSDIV: u32 = 0x7 << 8;
    /// Read proof enable (stall the bus instead of overrunning)
    pub const RDPROOF: u32 = 1 << 11;
    /// Write proof enable (stall the bus instead of underrunning)
    pub const WRPROOF: u32 = 1 << 12;
    /// PDC force byte transfer
    pub const PDCFBYTE: u32 = 1 << 13;
    /// PDC padding value
    pub const PDCPADV: u32 = 1 << 14;
    /// PDC-oriented mode
    pub const PDCMODE: u32 = 1 << 15;
    /// Data block length field (bytes)
    pub const BLKLEN: u32 = 0xffff << 16;
    /// Shift of the block length field
    pub const BLKLEN_SHIFT: u32 = 16;
    /// Reset-time divider setting: PWSDIV = 3, CLKDIV = 74
    pub const INIT_DIVIDERS: u32 = 0x34a;
}

/// Data timeout register bits
pub mod dtor {
    /// Data timeout cycle number
    pub const DTOCYC: u32 = 0xf;
    /// Data timeout multiplier field
    pub const DTOMUL: u32 = 0x7 << 4;
    /// Multiplier of 1048576 cycles
    pub const DTOMUL_1M: u32 = 0x7 << 4;
}

/// SD card register bits
pub mod sdcr {
    /// Slot selection field
    pub const SDCSEL: u32 = 0x3;
    /// Slot A
    pub const SLOT_A: u32 = 0;
    /// Slot B
    pub const SLOT_B: u32 = 1;
    /// 4-bit data bus
    pub const SDCBUS: u32 = 1 << 7;
}

/// Command register bits
pub mod cmdr {
    /// Command number field
    pub const CMDNB: u32 = 0x3f;
    /// Response type field
    pub const RSPTYP: u32 = 0x3 << 6;
    /// No response
    pub const RSPTYP_NO: u32 = 0x0 << 6;
    /// 48-bit response
    pub const RSPTYP_48: u32 = 0x1 << 6;
    /// 136-bit response
    pub const RSPTYP_136: u32 = 0x2 << 6;
    /// Special command field
    pub const SPCMD: u32 = 0x7 << 8;
    /// Open-drain command
    pub const OPDCMD: u32 = 1 << 11;
    /// Maximum latency for command to response (64 cycles instead of 5)
    pub const MAXLAT: u32 = 1 << 12;
    /// Transfer command field
    pub const TRCMD: u32 = 0x3 << 16;
    /// No data transfer
    pub const TRCMD_NO: u32 = 0x0 << 16;
    /// Start data transfer
    pub const TRCMD_START: u32 = 0x1 << 16;
    /// Stop data transfer
    pub const TRCMD_STOP: u32 = 0x2 << 16;
    /// Transfer direction: set for card → host
    pub const TRDIR: u32 = 1 << 18;
    /// Transfer type field
    pub const TRTYP: u32 = 0x3 << 19;
    /// Single block transfer
    pub const TRTYP_BLOCK: u32 = 0x0 << 19;
    /// Multiple block transfer
    pub const TRTYP_MULTIPLE: u32 = 0x1 << 19;
    /// Stream transfer
    pub const TRTYP_STREAM: u32 = 0x2 << 19;
}

/// Status, interrupt enable/disable and mask register bits
pub mod sr {
    /// Command ready
    pub const CMDRDY: u32 = 1 << 0;
    /// Receiver ready
    pub const RXRDY: u32 = 1 << 1;
    /// Transmit ready
    pub const TXRDY: u32 = 1 << 2;
    /// Data block ended
    pub const BLKE: u32 = 1 << 3;
    /// Data transfer in progress
    pub const DTIP: u32 = 1 << 4;
    /// Card data line not busy
    pub const NOTBUSY: u32 = 1 << 5;
    /// End of PDC receive buffer
    pub const ENDRX: u32 = 1 << 6;
    /// End of PDC transmit buffer
    pub const ENDTX: u32 = 1 << 7;
    /// PDC receive buffer full
    pub const RXBUFF: u32 = 1 << 14;
    /// PDC transmit buffer empty
    pub const TXBUFE: u32 = 1 << 15;
    /// Response index error
    pub const RINDE: u32 = 1 << 16;
    /// Response direction error
    pub const RDIRE: u32 = 1 << 17;
    /// Response CRC error
    pub const RCRCE: u32 = 1 << 18;
    /// Response end bit error
    pub const RENDE: u32 = 1 << 19;
    /// Response timeout error
    pub const RTOE: u32 = 1 << 20;
    /// Data CRC error
    pub const DCRCE: u32 = 1 << 21;
    /// Data timeout error
    pub const DTOE: u32 = 1 << 22;
    /// Receive overrun
    pub const OVRE: u32 = 1 << 30;
    /// Transmit underrun
    pub const UNRE: u32 = 1 << 31;

    /// Every error bit
    pub const ERROR: u32 = RINDE | RDIRE | RCRCE | RENDE | RTOE | DCRCE | DTOE | OVRE | UNRE;

    /// Value written to IDR to mask every source
    pub const ALL: u32 = 0xffff_ffff;
}
