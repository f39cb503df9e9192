//! Native client for the Agent's EMP protocol.
//!
//! # Crate Structure
//!
//! - [`transport`]: TCP stream to the Agent and the test listener
//! - [`frame`]: the 8-byte EMP header codec and blocking frame I/O
//! - [`client`]: request correlation, inbound commands and reconnection
//!   (behind the default `client` feature)

/// Re-export transport types.
pub mod transport {
    pub use emp_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use emp_frame::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use emp_client::*;
}

#[cfg(feature = "client")]
pub use emp_client::{CommandTable, EmpClient, EmpConfig, EmpContext, EmpError, Status};
