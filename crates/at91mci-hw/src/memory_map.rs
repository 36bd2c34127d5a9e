//! Physical placement of the MCI peripheral on each supported SoC.
//!
//! # References
//! - AT91RM9200 datasheet, "Memory Mapping"
//! - AT91SAM9260 / SAM9263 / SAM9G20 datasheets, "Memory Mapping"

/// AT91RM9200
pub mod rm9200 {
    /// MCI base address
    pub const MCI_BASE: u32 = 0xfffb_4000;
    /// MCI peripheral identifier (interrupt line)
    pub const MCI_IRQ: u32 = 10;
}

/// AT91SAM9260 and the pin-compatible SAM9G20 / SAM9XE
pub mod sam9260 {
    /// MCI base address
    pub const MCI_BASE: u32 = 0xfffa_8000;
    /// MCI peripheral identifier (interrupt line)
    pub const MCI_IRQ: u32 = 9;
}

/// AT91SAM9261 and SAM9G10
pub mod sam9261 {
    /// MCI base address
    pub const MCI_BASE: u32 = 0xfffa_8000;
    /// MCI peripheral identifier (interrupt line)
    pub const MCI_IRQ: u32 = 9;
}

/// AT91SAM9263 (two MCI instances)
pub mod sam9263 {
    /// MCI0 base address
    pub const MCI0_BASE: u32 = 0xfff8_0000;
    /// MCI1 base address
    pub const MCI1_BASE: u32 = 0xfff8_4000;
    /// MCI0 peripheral identifier (interrupt line)
    pub const MCI0_IRQ: u32 = 10;
    /// MCI1 peripheral identifier (interrupt line)
    pub const MCI1_IRQ: u32 = 11;
}

/// AT91CAP9
pub mod cap9 {
    /// MCI0 base address
    pub const MCI0_BASE: u32 = 0xfff8_0000;
    /// MCI0 peripheral identifier (interrupt line)
    pub const MCI0_IRQ: u32 = 10;
}

/// AT91SAM9RL
pub mod sam9rl {
    /// MCI base address
    pub const MCI_BASE: u32 = 0xfffa_4000;
    /// MCI peripheral identifier (interrupt line)
    pub const MCI_IRQ: u32 = 10;
}
