pub mod config;
pub mod sim;
#[allow(clippy::module_inception)]
pub mod simulator;
pub mod utils;
pub mod workload;

pub use simulator::Simulator;
pub use utils::log;
pub use workload::Workload;
