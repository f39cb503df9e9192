//! Loopback TCP transport to the Agent.
//!
//! The Agent listens on a local TCP port; native applications reach it
//! through a single duplex stream. This is the lowest layer of the EMP
//! stack: framing and request correlation build on the [`EmpStream`]
//! provided here.
//!
//! [`AgentListener`] is the accepting side. Applications never need it; it
//! exists for test doubles and the `emp agent` mock.

pub mod error;
pub mod stream;
pub mod tcp;

pub use error::{Result, TransportError};
pub use stream::EmpStream;
pub use tcp::{connect, connect_timeout, AgentListener};
