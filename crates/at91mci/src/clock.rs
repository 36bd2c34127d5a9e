//! Bus clock divider selection.
//!
//! The MCI derives its bus clock as `MCK / (2 * (CLKDIV + 1))`. The policy
//! here picks the fastest divider step that does not exceed the requested
//! rate, with one opt-in exception: a 25 MHz request on a board whose master
//! clock exceeds 50 MHz may run at `MCK / 2` instead of dropping to the next
//! step (historically "30 MHz" on 60 MHz RM9200 boards). That overclocks the
//! bus past SD default-speed limits but works with virtually every card.

use at91mci_hw::{mmio::mci::mr, specs};
use tracing::warn;

/// Largest value the CLKDIV field holds
pub const MAX_DIVIDER: u32 = mr::CLKDIV;

/// Divider choice for a non-zero request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockSetting {
    /// Value for the CLKDIV field
    pub divider: u32,
    /// Bus clock the divider actually produces, in Hz
    pub actual_hz: u32,
}

/// What to program for a requested bus clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockPlan {
    /// Requested clock was zero: disable the controller
    Disabled,
    Enabled(ClockSetting),
}

impl ClockPlan {
    /// CLKDIV field value; irrelevant (zero) when disabled
    pub fn divider(&self) -> u32 {
        match self {
            Self::Disabled => 0,
            Self::Enabled(setting) => setting.divider,
        }
    }

    /// Clock reported back upstream
    pub fn actual_hz(&self) -> u32 {
        match self {
            Self::Disabled => 0,
            Self::Enabled(setting) => setting.actual_hz,
        }
    }
}

/// Bus clock produced by `divider` from `master`
pub fn actual_clock(master: u32, divider: u32) -> u32 {
    (u64::from(master) / ((u64::from(divider) + 1) * 2)) as u32
}

/// Pick a divider for `requested` Hz given master clock `master`.
pub fn plan(requested: u32, master: u32, overclock: bool) -> ClockPlan {
    if requested == 0 {
        return ClockPlan::Disabled;
    }

    let divider = if overclock
        && requested == specs::clock::F_MAX_HZ
        && master > specs::clock::OVERCLOCK_MCK_THRESHOLD_HZ
    {
        0
    } else if u64::from(master) % (u64::from(requested) * 2) == 0 {
        // exact fit; the plain quotient would land one step too slow
        ((master / requested) / 2).saturating_sub(1)
    } else {
        (master / requested) / 2
    };
    let divider = divider.min(MAX_DIVIDER);
    let actual_hz = actual_clock(master, divider);
    if divider == MAX_DIVIDER && actual_hz > requested {
        warn!(
            "{} Hz is below the slowest divider step; running at {} Hz",
            requested, actual_hz
        );
    }

    ClockPlan::Enabled(ClockSetting { divider, actual_hz })
}
