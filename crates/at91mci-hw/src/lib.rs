//! Register map and platform constants for the Atmel AT91 MultiMedia Card
//! Interface (MCI) and its Peripheral DMA Controller channel pair.

#![no_std]

pub mod memory_map;
pub mod mmio;
pub mod specs;
