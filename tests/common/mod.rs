#![allow(dead_code)]

pub mod fixtures;
pub mod memory_bus;

pub use fixtures::*;
pub use memory_bus::MemoryBus;
