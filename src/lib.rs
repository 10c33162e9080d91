pub mod bridge;
pub mod model;
pub mod simulator;

pub use bridge::{Bridge, BridgeConfig, BridgeError};
pub use simulator::Simulator;
