//! Agent return codes.
//!
//! Every response frame carries one of these as a big-endian `i16` in its
//! first two payload bytes, and inbound command handlers answer with one.

use std::fmt;

/// A return code in the Agent's status space. `0` is success; every failure
/// is negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Status(pub i16);

impl Status {
    pub const OK: Status = Status(0);
    pub const NOT_FOUND: Status = Status(-1);
    pub const OUT_OF_RANGE: Status = Status(-2);
    pub const NO_MEMORY: Status = Status(-3);
    pub const NOT_PERMITTED: Status = Status(-4);
    pub const UNSPECIFIED_ERROR: Status = Status(-5);
    pub const COMMUNICATION_ERROR: Status = Status(-6);
    pub const TIMEOUT: Status = Status(-7);
    pub const WOULD_BLOCK: Status = Status(-8);
    pub const DEADLOCK: Status = Status(-9);
    pub const BAD_FORMAT: Status = Status(-10);
    pub const DUPLICATE: Status = Status(-11);
    pub const BAD_PARAMETER: Status = Status(-12);
    pub const CLOSED: Status = Status(-13);
    pub const IO_ERROR: Status = Status(-14);
    pub const NOT_IMPLEMENTED: Status = Status(-15);
    pub const BUSY: Status = Status(-16);
    pub const NOT_INITIALIZED: Status = Status(-17);
    pub const END: Status = Status(-18);
    pub const NOT_AVAILABLE: Status = Status(-19);

    pub fn code(self) -> i16 {
        self.0
    }

    pub fn is_ok(self) -> bool {
        self.0 == 0
    }

    /// Symbolic name, or `None` for a code outside the known table.
    pub fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            0 => "OK",
            -1 => "NOT_FOUND",
            -2 => "OUT_OF_RANGE",
            -3 => "NO_MEMORY",
            -4 => "NOT_PERMITTED",
            -5 => "UNSPECIFIED_ERROR",
            -6 => "COMMUNICATION_ERROR",
            -7 => "TIMEOUT",
            -8 => "WOULD_BLOCK",
            -9 => "DEADLOCK",
            -10 => "BAD_FORMAT",
            -11 => "DUPLICATE",
            -12 => "BAD_PARAMETER",
            -13 => "CLOSED",
            -14 => "IO_ERROR",
            -15 => "NOT_IMPLEMENTED",
            -16 => "BUSY",
            -17 => "NOT_INITIALIZED",
            -18 => "END",
            -19 => "NOT_AVAILABLE",
            _ => return None,
        };
        Some(name)
    }

    /// Parse either a symbolic name (`"NOT_FOUND"`) or a numeric code (`"-1"`).
    pub fn parse(text: &str) -> Option<Status> {
        let text = text.trim();
        if let Ok(code) = text.parse::<i16>() {
            return Some(Status(code));
        }
        let upper = text.to_ascii_uppercase();
        let wanted = upper.strip_prefix("RC_").unwrap_or(&upper);
        (-19..=0)
            .map(Status)
            .find(|status| status.name() == Some(wanted))
    }
}

impl From<i16> for Status {
    fn from(code: i16) -> Self {
        Status(code)
    }
}

impl From<Status> for i16 {
    fn from(status: Status) -> Self {
        status.0
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "status {}", self.0),
        }
    }
}
