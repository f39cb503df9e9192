use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use emp_client::Status;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One line of CLI output: a reply to `send` or an inbound command seen by
/// `listen`/`agent`.
#[derive(Serialize, Debug)]
pub struct Exchange<'a> {
    pub event: &'a str,
    pub command: u16,
    pub request_id: Option<u8>,
    pub status: i16,
    pub status_name: String,
    pub payload_size: usize,
    pub payload: String,
    pub timestamp: String,
}

impl<'a> Exchange<'a> {
    pub fn new(
        event: &'a str,
        command: u16,
        request_id: Option<u8>,
        status: Status,
        payload: &[u8],
    ) -> Self {
        Self {
            event,
            command,
            request_id,
            status: status.code(),
            status_name: status.to_string(),
            payload_size: payload.len(),
            payload: payload_preview(payload),
            timestamp: now_unix_seconds(),
        }
    }
}

pub fn print_exchange(exchange: &Exchange<'_>, raw_payload: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(exchange).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["EVENT", "COMMAND", "RID", "STATUS", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    exchange.event.to_string(),
                    exchange.command.to_string(),
                    exchange
                        .request_id
                        .map(|rid| rid.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    exchange.status_name.clone(),
                    exchange.payload_size.to_string(),
                    exchange.payload.clone(),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "{} command={} rid={} status={} size={} payload={}",
                exchange.event,
                exchange.command,
                exchange
                    .request_id
                    .map(|rid| rid.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                exchange.status_name,
                exchange.payload_size,
                exchange.payload
            );
        }
        OutputFormat::Raw => print_raw(raw_payload),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

pub fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
