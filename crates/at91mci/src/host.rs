//! Negotiated host parameters and the typed property surface the upstream
//! framework reads and writes them through.

use bitflags::bitflags;

/// Command line drive mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusMode {
    /// Identification phase
    #[default]
    OpenDrain,
    PushPull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BusWidth {
    #[default]
    One,
    Four,
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChipSelect {
    #[default]
    DontCare,
    High,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerMode {
    #[default]
    Off,
    Up,
    On,
}

/// Card family the upstream layer is talking to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostMode {
    #[default]
    Mmc,
    Sd,
}

bitflags! {
    /// Host capabilities advertised upstream
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HostCaps: u32 {
        const FOUR_BIT_DATA = 1 << 0;
        const EIGHT_BIT_DATA = 1 << 1;
        const HSPEED = 1 << 2;
    }
}

/// Currently requested bus timing, voltage and width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ios {
    /// Bus clock in Hz; holds the achieved rate after an update
    pub clock: u32,
    /// Selected voltage, as an OCR bit index
    pub vdd: u32,
    pub bus_mode: BusMode,
    pub chip_select: ChipSelect,
    pub bus_width: BusWidth,
    pub power_mode: PowerMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostParams {
    pub f_min: u32,
    pub f_max: u32,
    /// Voltage windows the host supports
    pub host_ocr: u32,
    pub caps: HostCaps,
    /// Operating conditions negotiated with the card
    pub ocr: u32,
    pub mode: HostMode,
    pub ios: Ios,
}

/// Property keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ivar {
    BusMode,
    BusWidth,
    ChipSelect,
    Clock,
    FMin,
    FMax,
    HostOcr,
    Mode,
    Ocr,
    PowerMode,
    Vdd,
    Caps,
    MaxData,
}

impl Ivar {
    pub const ALL: [Ivar; 13] = [
        Ivar::BusMode,
        Ivar::BusWidth,
        Ivar::ChipSelect,
        Ivar::Clock,
        Ivar::FMin,
        Ivar::FMax,
        Ivar::HostOcr,
        Ivar::Mode,
        Ivar::Ocr,
        Ivar::PowerMode,
        Ivar::Vdd,
        Ivar::Caps,
        Ivar::MaxData,
    ];

    /// Properties fixed by the host; writes are refused
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            Ivar::Caps | Ivar::HostOcr | Ivar::FMin | Ivar::FMax | Ivar::MaxData
        )
    }
}

/// A property value tagged with its key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvarValue {
    BusMode(BusMode),
    BusWidth(BusWidth),
    ChipSelect(ChipSelect),
    Clock(u32),
    FMin(u32),
    FMax(u32),
    HostOcr(u32),
    Mode(HostMode),
    Ocr(u32),
    PowerMode(PowerMode),
    Vdd(u32),
    Caps(HostCaps),
    /// Largest transfer in blocks
    MaxData(u32),
}

impl IvarValue {
    pub fn ivar(&self) -> Ivar {
        match self {
            Self::BusMode(_) => Ivar::BusMode,
            Self::BusWidth(_) => Ivar::BusWidth,
            Self::ChipSelect(_) => Ivar::ChipSelect,
            Self::Clock(_) => Ivar::Clock,
            Self::FMin(_) => Ivar::FMin,
            Self::FMax(_) => Ivar::FMax,
            Self::HostOcr(_) => Ivar::HostOcr,
            Self::Mode(_) => Ivar::Mode,
            Self::Ocr(_) => Ivar::Ocr,
            Self::PowerMode(_) => Ivar::PowerMode,
            Self::Vdd(_) => Ivar::Vdd,
            Self::Caps(_) => Ivar::Caps,
            Self::MaxData(_) => Ivar::MaxData,
        }
    }
}

impl HostParams {
    /// Value of `ivar`; `max_data` is the bridge's fixed transfer limit
    pub(crate) fn get(&self, ivar: Ivar, max_data: u32) -> IvarValue {
        match ivar {
            Ivar::BusMode => IvarValue::BusMode(self.ios.bus_mode),
            Ivar::BusWidth => IvarValue::BusWidth(self.ios.bus_width),
            Ivar::ChipSelect => IvarValue::ChipSelect(self.ios.chip_select),
            Ivar::Clock => IvarValue::Clock(self.ios.clock),
            Ivar::FMin => IvarValue::FMin(self.f_min),
            Ivar::FMax => IvarValue::FMax(self.f_max),
            Ivar::HostOcr => IvarValue::HostOcr(self.host_ocr),
            Ivar::Mode => IvarValue::Mode(self.mode),
            Ivar::Ocr => IvarValue::Ocr(self.ocr),
            Ivar::PowerMode => IvarValue::PowerMode(self.ios.power_mode),
            Ivar::Vdd => IvarValue::Vdd(self.ios.vdd),
            Ivar::Caps => IvarValue::Caps(self.caps),
            Ivar::MaxData => IvarValue::MaxData(max_data),
        }
    }

    /// Store a writable property; returns false for read-only keys
    pub(crate) fn set(&mut self, value: IvarValue) -> bool {
        match value {
            IvarValue::BusMode(v) => self.ios.bus_mode = v,
            IvarValue::BusWidth(v) => self.ios.bus_width = v,
            IvarValue::ChipSelect(v) => self.ios.chip_select = v,
            IvarValue::Clock(v) => self.ios.clock = v,
            IvarValue::Mode(v) => self.mode = v,
            IvarValue::Ocr(v) => self.ocr = v,
            IvarValue::PowerMode(v) => self.ios.power_mode = v,
            IvarValue::Vdd(v) => self.ios.vdd = v,
            IvarValue::Caps(_)
            | IvarValue::HostOcr(_)
            | IvarValue::FMin(_)
            | IvarValue::FMax(_)
            | IvarValue::MaxData(_) => return false,
        }
        true
    }
}
