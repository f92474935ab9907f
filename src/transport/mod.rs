//! Connection to the remote voice endpoint
//!
//! JSON text frames over a WebSocket, with a fixed reconnect budget.

pub mod client;
pub mod messages;
pub mod state;

pub use client::{
    Connection, Connector, FrameSink, FrameStream, Transport, TransportConfig,
    TungsteniteConnector,
};
pub use messages::{ClientMessage, ControlMessage, ReadyFeatures};
pub use state::{ConnectionMachine, ConnectionState, Effect, ReconnectPolicy, TransportEvent};
