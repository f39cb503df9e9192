//! Client side of the EMP protocol between native applications and the Agent.
//!
//! One TCP connection per [`EmpContext`] carries every request of every
//! consumer in the process:
//! - Requests are correlated by a 6-bit request id and answered with a
//!   status plus an optional body
//! - Unsolicited commands from the Agent run on their own threads and are
//!   answered with the handler's status
//! - A lost connection fails pending requests, is re-established in the
//!   background and then triggers the registered recovery callbacks
//!
//! ```no_run
//! use emp_client::{CommandTable, EmpContext, Status};
//!
//! # fn main() -> emp_client::Result<()> {
//! let context = EmpContext::from_env();
//! let client = context.init(
//!     CommandTable::new().on(0x21, |_| Status::OK),
//!     None,
//! )?;
//! let reply = client.send_and_wait(42, &b"ping"[..])?;
//! println!("{} byte reply", reply.len());
//! client.teardown()?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
mod reader;
pub mod registry;
pub mod status;
pub mod table;

pub use client::EmpClient;
pub use config::{EmpConfig, ReconnectPolicy};
pub use connection::LinkState;
pub use context::EmpContext;
pub use error::{EmpError, Result};
pub use registry::{CommandHandler, CommandTable, InboundCommand, RecoveryCallback, RecoveryId};
pub use status::Status;
pub use table::{RequestId, MAX_REQUESTS};
