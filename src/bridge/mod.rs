//! Bus-protocol bridge engine.
//!
//! Sans-IO: the engine never talks to its peers itself. Callers feed it
//! upstream requests, peer acknowledgements and responses, then call
//! [`Bridge::poll`] once per cycle to collect the transfers and responses it
//! wants to send.

pub mod admission;
pub mod arena;
pub mod config;
pub mod correlation;
pub mod engine;
pub mod error;
pub mod exclusive;
pub mod ordering;
pub mod port;
pub mod response;
pub mod splitter;
pub mod types;
pub mod validate;

pub use admission::{Admission, RejectReason};
pub use config::{AddressRange, BridgeConfig, BusProfile, DirectionConfig, DownstreamProfile, ExclusiveMode};
pub use engine::Bridge;
pub use error::{BridgeError, ConfigError};
pub use port::{BridgeOutput, PortStats};
pub use types::{
  BurstKind, Cycle, Direction, PeerOp, PeerResponse, PeerStatus, PeerTag, PortId, Response, ResponseStatus,
  SubTransaction, Tag, Transaction, TxnKind,
};
