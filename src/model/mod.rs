//! Discrete-event models for the `sim` scheduler: the bridge itself, a
//! reference memory on the peer side and scripted upstream initiators.

pub mod bridge_model;
pub mod initiator;
pub mod memory;
pub mod msg;
pub mod topology;

pub use bridge_model::{BridgeModel, BridgePorts, CONTROL_RESET};
pub use initiator::{Initiator, InitiatorPorts, RESPONSE_RECORD};
pub use memory::{MemoryCommand, MemoryTarget, PeerConfig, ReferenceMemory};
pub use msg::AckMessage;
pub use topology::{create_simulation, initiator_id, Script, BRIDGE_ID, MEMORY_CONTROL, MEMORY_ID};
