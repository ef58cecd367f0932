//! Live tally broadcast
//!
//! The registry tracks anonymous observer connections; the hub serializes
//! tally updates once and fans them out to every open connection.

pub mod hub;
pub mod registry;

pub use hub::{BroadcastHub, Envelope};
pub use registry::{
    Connection, ConnectionHandle, ConnectionId, ConnectionRegistry, DeliveryError, Frame,
    FrameReceiver,
};
