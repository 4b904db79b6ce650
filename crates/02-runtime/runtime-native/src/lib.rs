#![deny(missing_docs)]
//! Native process runtime shared by every module on the bus: configuration,
//! process memory, shutdown signalling and the cooperative control loop.

mod config;
mod control;
mod memory;
mod shutdown;

pub use config::{BusConfig, ConfigError};
pub use control::{ControlLoop, LoopExit, LoopStats, ModuleHandler};
pub use memory::{BackingBuffer, ProcessMemory};
pub use shutdown::ShutdownFlag;
