pub mod args;
pub mod bridge;
pub mod clock;
pub mod config;
pub mod dma;
pub mod error;
pub mod host;
mod irq;
pub mod mmc;
pub mod platform;
pub mod regs;
mod sequencer;
pub mod session;
pub mod sim;

// Re-export commonly used types
pub use args::{Args, Operation, load_fat_file};
pub use bridge::{Completion, Controller};
pub use config::{BridgeConfig, Tunables};
pub use dma::{BusDma, DmaDirection, IdentityDma, SyncOp};
pub use error::{BridgeError, DmaError, MmcError, SessionError, SubmitError};
pub use host::{BusMode, BusWidth, HostCaps, HostMode, HostParams, Ios, Ivar, IvarValue};
pub use mmc::{Command, Data, DataFlags, Request, ResponseFlags};
pub use platform::{MciInstance, Platform, SocVariant};
pub use regs::{Mmio, RegisterBlock};
pub use session::{BLOCK_SIZE, BlockDevice, CardInfo, CardSession};
pub use sim::{Card, Simulator};
