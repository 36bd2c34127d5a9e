//! Runtime-tunable controller options.
//!
//! Each option resolves in three layers: a compiled-in default (cargo
//! feature), an environment hint for the unit (`AT91_MCI_<unit>_4WIRE`,
//! `AT91_MCI_<unit>_30MHZ`), and a live control that may be flipped at any
//! time while the controller is attached.

use crate::platform::Platform;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Hint suffix for the 4-wire bus option
pub const HINT_4WIRE: &str = "4WIRE";

/// Hint suffix for the 25 MHz → MCK / 2 overclock option
pub const HINT_30MHZ: &str = "30MHZ";

/// Live controller options shared between the bridge and its owner
#[derive(Debug)]
pub struct Tunables {
    four_wire: AtomicBool,
    use_30mhz: AtomicBool,
}

impl Default for Tunables {
    fn default() -> Self {
        Self::new(cfg!(feature = "four-wire"), cfg!(feature = "use-30mhz"))
    }
}

impl Tunables {
    pub fn new(four_wire: bool, use_30mhz: bool) -> Self {
        Self {
            four_wire: AtomicBool::new(four_wire),
            use_30mhz: AtomicBool::new(use_30mhz),
        }
    }

    /// Compiled-in defaults overridden by the process environment
    pub fn from_env(unit: u32) -> Self {
        Self::with_hints(unit, |name| std::env::var(name).ok())
    }

    /// Compiled-in defaults overridden by whatever `lookup` reports for the
    /// unit's hint names
    pub fn with_hints(unit: u32, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let tunables = Self::default();
        for (suffix, flag) in [
            (HINT_4WIRE, &tunables.four_wire),
            (HINT_30MHZ, &tunables.use_30mhz),
        ] {
            let name = hint_name(unit, suffix);
            let Some(raw) = lookup(&name) else {
                continue;
            };
            match parse_hint(&raw) {
                Some(value) => {
                    debug!("hint {} = {}", name, value);
                    flag.store(value, Ordering::Relaxed);
                }
                None => warn!("ignoring unparsable hint {}={:?}", name, raw),
            }
        }
        tunables
    }

    pub fn four_wire(&self) -> bool {
        self.four_wire.load(Ordering::Relaxed)
    }

    pub fn set_four_wire(&self, enabled: bool) {
        self.four_wire.store(enabled, Ordering::Relaxed);
    }

    pub fn use_30mhz(&self) -> bool {
        self.use_30mhz.load(Ordering::Relaxed)
    }

    pub fn set_use_30mhz(&self, enabled: bool) {
        self.use_30mhz.store(enabled, Ordering::Relaxed);
    }
}

/// Everything needed to attach one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeConfig {
    pub unit: u32,
    pub platform: Platform,
    /// Explicit 4-wire setting; `None` leaves the default and hints in charge
    pub four_wire: Option<bool>,
    /// Explicit overclock setting; `None` leaves the default and hints in charge
    pub use_30mhz: Option<bool>,
}

impl BridgeConfig {
    /// Resolve the unit's tunables: defaults, then hints, then explicit values
    pub fn tunables(&self) -> Tunables {
        self.tunables_with(|name| std::env::var(name).ok())
    }

    pub fn tunables_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Tunables {
        let tunables = Tunables::with_hints(self.unit, lookup);
        if let Some(enabled) = self.four_wire {
            tunables.set_four_wire(enabled);
        }
        if let Some(enabled) = self.use_30mhz {
            tunables.set_use_30mhz(enabled);
        }
        tunables
    }
}

/// Environment variable carrying hint `suffix` for `unit`
pub fn hint_name(unit: u32, suffix: &str) -> String {
    format!("AT91_MCI_{unit}_{suffix}")
}

/// Accepts the integer form device hints use as well as the usual words
pub fn parse_hint(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        other => other.parse::<i64>().ok().map(|v| v != 0),
    }
}
