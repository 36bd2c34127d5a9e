//! SoC identification and the controller quirks that follow from it.

use at91mci_hw::specs;

/// AT91 family members carrying an MCI block
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SocVariant {
    Rm9200,
    Sam9260,
    Sam9261,
    Sam9263,
    Cap9,
    Sam9g10,
    Sam9g20,
    Sam9g45,
    Sam9rl,
    Sam9xe,
}

impl SocVariant {
    /// RM9200's PDC hands the MCI FIFO words to memory byte-reversed
    pub fn needs_byteswap(self) -> bool {
        self == Self::Rm9200
    }

    /// MCI1 revision 2xx controllers: subject to the "Data Write Operation
    /// and number of bytes" erratum and able to use read/write proof mode
    pub fn is_mci1_rev2xx(self) -> bool {
        matches!(
            self,
            Self::Sam9260 | Self::Sam9263 | Self::Cap9 | Self::Sam9g10 | Self::Sam9g20 | Self::Sam9rl
        )
    }

    /// Placement of MCI instance `unit`, if this SoC has one
    pub fn mci_instance(self, unit: u32) -> Option<MciInstance> {
        use at91mci_hw::memory_map::*;

        let (base, irq) = match (self, unit) {
            (Self::Rm9200, 0) => (rm9200::MCI_BASE, rm9200::MCI_IRQ),
            (Self::Sam9260 | Self::Sam9g20 | Self::Sam9xe, 0) => {
                (sam9260::MCI_BASE, sam9260::MCI_IRQ)
            }
            (Self::Sam9261 | Self::Sam9g10, 0) => (sam9261::MCI_BASE, sam9261::MCI_IRQ),
            (Self::Sam9263 | Self::Sam9g45, 0) => (sam9263::MCI0_BASE, sam9263::MCI0_IRQ),
            (Self::Sam9263 | Self::Sam9g45, 1) => (sam9263::MCI1_BASE, sam9263::MCI1_IRQ),
            (Self::Cap9, 0) => (cap9::MCI0_BASE, cap9::MCI0_IRQ),
            (Self::Sam9rl, 0) => (sam9rl::MCI_BASE, sam9rl::MCI_IRQ),
            _ => return None,
        };
        Some(MciInstance { base, irq })
    }

    /// Master clock of the reference board for this SoC
    pub fn typical_master_clock(self) -> u32 {
        match self {
            Self::Rm9200 => specs::mck::RM9200_HZ,
            Self::Sam9263 | Self::Sam9g45 | Self::Cap9 => specs::mck::SAM9263_HZ,
            Self::Sam9g20 => specs::mck::SAM9G20_HZ,
            _ => specs::mck::SAM9260_HZ,
        }
    }
}

/// Register window and peripheral ID of one MCI instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MciInstance {
    pub base: u32,
    pub irq: u32,
}

/// Static description of the board the controller sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Platform {
    pub soc: SocVariant,
    /// Master clock (MCK) feeding the MCI, in Hz
    pub master_clock: u32,
}

impl Platform {
    pub fn new(soc: SocVariant, master_clock: u32) -> Self {
        Self { soc, master_clock }
    }

    /// Reference board clocking for `soc`
    pub fn reference(soc: SocVariant) -> Self {
        Self::new(soc, soc.typical_master_clock())
    }

    /// Highest bus clock advertised upstream: MCK / 2, capped at 25 MHz
    pub fn f_max(&self) -> u32 {
        (self.master_clock / 2).min(specs::clock::F_MAX_HZ)
    }
}
