use clap::{Args, Subcommand};
use std::path::PathBuf;

use emp_client::EmpConfig;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod agent;
pub mod envinfo;
pub mod listen;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send one command to the Agent and print the reply.
    Send(SendArgs),
    /// Handle inbound commands from the Agent and print them.
    Listen(ListenArgs),
    /// Run a minimal mock Agent that echoes every command back.
    Agent(AgentArgs),
    /// Show version information.
    Version(VersionArgs),
    /// Print build, configuration and environment diagnostics.
    Envinfo(EnvinfoArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Agent(args) => agent::run(args, format),
        Command::Version(args) => version::run(args),
        Command::Envinfo(args) => envinfo::run(args, format),
    }
}

/// Where the Agent listens. Unset values fall back to the `SWI_EMP_*`
/// environment and then to the built-in defaults.
#[derive(Args, Debug, Default)]
pub struct AgentAddrArgs {
    /// Agent host.
    #[arg(long, env = "SWI_EMP_SERVER_ADDR")]
    pub host: Option<String>,
    /// Agent port.
    #[arg(long, short = 'p', env = "SWI_EMP_SERVER_PORT")]
    pub port: Option<u16>,
}

impl AgentAddrArgs {
    pub fn config(&self) -> EmpConfig {
        let mut config = EmpConfig::from_env();
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config
    }
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub addr: AgentAddrArgs,
    /// Command code to send.
    #[arg(long, short = 'c')]
    pub command: u16,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Maximum time to wait for the reply (e.g. 5s, 500ms). Defaults to
    /// SWI_EMP_CMD_TIMEOUT or 60s.
    #[arg(long)]
    pub timeout: Option<String>,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    #[command(flatten)]
    pub addr: AgentAddrArgs,
    /// Command codes to handle (comma-separated).
    #[arg(long, value_delimiter = ',', required = true)]
    pub commands: Vec<u16>,
    /// Status to answer with (name such as NOT_FOUND, or a number).
    #[arg(long, default_value = "OK", value_parser = parse_status)]
    pub status: emp_client::Status,
    /// Exit after handling N commands.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct AgentArgs {
    /// Address to bind.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Port to bind.
    #[arg(long, short = 'p', default_value_t = emp_client::config::DEFAULT_PORT)]
    pub port: u16,
    /// Status every reply carries (name or number).
    #[arg(long, default_value = "OK", value_parser = parse_status)]
    pub status: emp_client::Status,
    /// Exit after answering N commands.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[derive(Args, Debug, Default)]
pub struct EnvinfoArgs {
    #[command(flatten)]
    pub addr: AgentAddrArgs,
}

fn parse_status(input: &str) -> Result<emp_client::Status, String> {
    emp_client::Status::parse(input).ok_or_else(|| format!("unknown status: {input}"))
}

pub fn parse_duration(input: &str) -> CliResult<std::time::Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        std::time::Duration::from_millis(value)
    } else {
        std::time::Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn addr_args_override_config() {
        let args = AgentAddrArgs {
            host: Some("10.1.1.1".to_string()),
            port: Some(4000),
        };
        let config = args.config();
        assert_eq!(config.address(), "10.1.1.1:4000");
    }
}
