/// Bus clock limits
pub mod clock {
    /// Slowest rate advertised to upper layers: just under the 400 kHz
    /// identification-mode rate cards expect during discovery
    pub const F_MIN_HZ: u32 = 375_000;

    /// Default-speed SD ceiling (SD v1.0, the only timing the MCI supports)
    pub const F_MAX_HZ: u32 = 25_000_000;

    /// Master clock above which a 25 MHz request can be overclocked to MCK / 2
    pub const OVERCLOCK_MCK_THRESHOLD_HZ: u32 = 50_000_000;
}

/// Typical master clock (MCK) frequencies of the supported boards
pub mod mck {
    /// AT91RM9200 (KB9202, Ethernut 5)
    pub const RM9200_HZ: u32 = 60_000_000;

    /// AT91SAM9260 (SAM9260-EK, 18.432 MHz crystal)
    pub const SAM9260_HZ: u32 = 99_328_000;

    /// AT91SAM9263 (SAM9263-EK)
    pub const SAM9263_HZ: u32 = 99_956_000;

    /// AT91SAM9G20 (SAM9G20-EK)
    pub const SAM9G20_HZ: u32 = 132_096_000;
}

/// PDC / bus-dma limits
pub mod dma {
    /// Size of the driver's write bounce buffer in bytes
    pub const BOUNCE_BUFFER_SIZE: usize = 512;

    /// Largest single DMA mapping the controller's tag accepts (MAXPHYS)
    pub const MAX_MAPPING: usize = 128 * 1024;

    /// Writes shorter than this must be padded on MCI1 rev2xx controllers
    pub const SHORT_WRITE_MIN: usize = 12;
}
