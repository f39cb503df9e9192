use std::collections::BTreeMap;

use emp_client::config::ENV_VARS;
use emp_client::EmpConfig;
use serde::Serialize;

use crate::cmd::EnvinfoArgs;
use crate::exit::{CliResult, SUCCESS};
use crate::output::OutputFormat;

#[derive(Serialize)]
struct PlatformInfo {
    os: String,
    arch: String,
}

/// The configuration a client started from this environment would use.
#[derive(Serialize)]
struct EffectiveConfig {
    address: String,
    /// `None` when requests wait indefinitely.
    request_timeout_secs: Option<u64>,
    reconnect_attempts: u32,
    reconnect_delay_secs: u64,
    budget_reset_after_secs: Option<u64>,
    max_payload_size: usize,
}

impl From<&EmpConfig> for EffectiveConfig {
    fn from(config: &EmpConfig) -> Self {
        Self {
            address: config.address(),
            request_timeout_secs: config.request_timeout.map(|t| t.as_secs()),
            reconnect_attempts: config.reconnect.attempts,
            reconnect_delay_secs: config.reconnect.delay.as_secs(),
            budget_reset_after_secs: config.reconnect.budget_reset_after.map(|t| t.as_secs()),
            max_payload_size: config.frame.max_payload_size,
        }
    }
}

#[derive(Serialize)]
struct EnvInfoOutput {
    version: String,
    target: String,
    platform: PlatformInfo,
    features: Vec<String>,
    config: EffectiveConfig,
    environment: BTreeMap<String, Option<String>>,
}

pub fn run(args: EnvinfoArgs, format: OutputFormat) -> CliResult<i32> {
    let mut env = BTreeMap::new();
    for var in ENV_VARS.iter().copied().chain(["RUST_LOG"]) {
        env.insert(var.to_string(), std::env::var(var).ok());
    }

    let output = EnvInfoOutput {
        version: env!("CARGO_PKG_VERSION").to_string(),
        target: target_triple(),
        platform: PlatformInfo {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
        },
        features: active_features(),
        config: EffectiveConfig::from(&args.addr.config()),
        environment: env,
    };

    print_envinfo(&output, format);
    Ok(SUCCESS)
}

fn target_triple() -> String {
    if let Some(target) = option_env!("EMP_BUILD_TARGET") {
        return target.to_string();
    }
    format!("{}-unknown-{}", std::env::consts::ARCH, std::env::consts::OS)
}

fn seconds(value: Option<u64>) -> String {
    value
        .map(|secs| format!("{secs}s"))
        .unwrap_or_else(|| "none".to_string())
}

fn print_envinfo(output: &EnvInfoOutput, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(output).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table | OutputFormat::Pretty => {
            let config = &output.config;
            println!("emp environment\n");
            println!("  Version:    {}", output.version);
            println!("  Target:     {}", output.target);
            println!(
                "  Platform:   {} ({})",
                output.platform.os, output.platform.arch
            );
            println!("  Features:   {}", output.features.join(", "));
            println!("\n  Agent connection:");
            println!("    {:<20} {}", "address", config.address);
            println!("    {:<20} {}", "request timeout", seconds(config.request_timeout_secs));
            println!("    {:<20} {}", "reconnect attempts", config.reconnect_attempts);
            println!("    {:<20} {}s", "reconnect delay", config.reconnect_delay_secs);
            println!("    {:<20} {}", "budget reset", seconds(config.budget_reset_after_secs));
            println!("    {:<20} {}", "max payload", config.max_payload_size);
            println!("\n  Environment:");
            for (k, v) in &output.environment {
                println!("    {:<28} {}", k, v.as_deref().unwrap_or("(not set)"));
            }
        }
        OutputFormat::Raw => println!("{}", output.config.address),
    }
}

fn active_features() -> Vec<String> {
    let mut features = Vec::new();
    if cfg!(feature = "client") {
        features.push("client".to_string());
    }
    if cfg!(feature = "async") {
        features.push("async".to_string());
    }
    if cfg!(feature = "cli") {
        features.push("cli".to_string());
    }
    features
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_config_reports_indefinite_timeout() {
        let config = EmpConfig {
            request_timeout: None,
            ..EmpConfig::default()
        };
        let effective = EffectiveConfig::from(&config);
        assert_eq!(effective.address, "127.0.0.1:9999");
        assert_eq!(effective.request_timeout_secs, None);
        assert_eq!(effective.reconnect_attempts, 10);
        assert_eq!(effective.reconnect_delay_secs, 3);

        let json = serde_json::to_string(&effective).expect("config should serialize");
        assert!(json.contains("\"request_timeout_secs\":null"));
    }

    #[test]
    fn target_looks_like_triple() {
        let target = target_triple();
        assert!(target.split('-').count() >= 3);
    }

    #[test]
    fn optional_seconds_render() {
        assert_eq!(seconds(Some(60)), "60s");
        assert_eq!(seconds(None), "none");
    }
}
