pub mod bus;
pub mod file;

pub use bus::{StatusBus, StatusBusConfig};
pub use file::JsonFileStore;
