use std::fs;

use emp_client::{CommandTable, EmpContext, EmpError};

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{emp_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_exchange, Exchange, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.addr.config();
    let timeout = match &args.timeout {
        Some(timeout) => Some(parse_duration(timeout)?),
        None => config.request_timeout,
    };
    let payload = resolve_payload(&args)?;

    let context = EmpContext::new(config);
    let client = context
        .init(CommandTable::new(), None)
        .map_err(|err| emp_error("connect failed", err))?;

    tracing::debug!(command = args.command, len = payload.len(), "sending command");
    let reply = client.send_and_wait_timeout(args.command, payload, timeout);
    let _ = client.teardown();

    match reply {
        Ok(body) => {
            let exchange = Exchange::new("reply", args.command, None, emp_client::Status::OK, &body);
            print_exchange(&exchange, &body, format);
            Ok(SUCCESS)
        }
        Err(EmpError::Status(status)) => {
            let exchange = Exchange::new("reply", args.command, None, status, &[]);
            print_exchange(&exchange, &[], format);
            Err(emp_error("agent refused command", EmpError::Status(status)))
        }
        Err(err) => Err(emp_error("send failed", err)),
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.as_bytes().to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        });
    }
    Ok(Vec::new())
}
