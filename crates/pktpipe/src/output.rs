use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use pktpipe_packet::{type_name, Packet, StringPacket};
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

/// How a packet reached the handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    Whole,
    Reassembled,
    Fragment,
}

#[derive(Serialize)]
struct PacketOutput<'a> {
    channel: &'a str,
    type_id: i32,
    type_name: &'a str,
    delivery: Delivery,
    version: String,
    payload_size: usize,
    payload: String,
    metadata: String,
    timestamp: String,
}

pub fn print_packet(packet: &Packet, channel: &str, delivery: Delivery, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = PacketOutput {
                channel,
                type_id: packet.type_id(),
                type_name: type_name(packet.type_id()),
                delivery,
                version: packet.version().to_string(),
                payload_size: packet.payload_len(),
                payload: payload_preview(packet),
                metadata: hex(packet.metadata()),
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "TYPE", "SIZE", "DELIVERY", "PAYLOAD"])
                .add_row(vec![
                    channel.to_string(),
                    format!("{} ({})", type_name(packet.type_id()), packet.type_id()),
                    packet.payload_len().to_string(),
                    format!("{delivery:?}").to_lowercase(),
                    payload_preview(packet),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "channel={} type={} ({}) size={} delivery={:?} payload={}",
                channel,
                packet.type_id(),
                type_name(packet.type_id()),
                packet.payload_len(),
                delivery,
                payload_preview(packet)
            );
        }
        OutputFormat::Raw => {
            print_raw(packet.payload());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Text for string packets and UTF-8 payloads, a size marker otherwise.
fn payload_preview(packet: &Packet) -> String {
    if let Some(kind) = packet.kind::<StringPacket>() {
        if !packet.is_split() {
            return kind.text.clone();
        }
    }
    match std::str::from_utf8(packet.payload()) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", packet.payload_len()),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
