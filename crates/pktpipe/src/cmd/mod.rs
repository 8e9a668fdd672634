use clap::{Args, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use pktpipe_transport::PipeNamespace;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a server endpoint and print received packets.
    Serve(ServeArgs),
    /// Connect as a client and send one packet.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, namespace: PipeNamespace, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, namespace, format),
        Command::Send(args) => send::run(args, namespace, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Channel name; pipes are created as <ID>.IN and <ID>.OUT.
    pub id: String,
    /// Exit after printing N packets.
    #[arg(long)]
    pub count: Option<usize>,
    /// Send every received packet back to the client.
    #[arg(long)]
    pub echo: bool,
    /// Exit when the client disconnects instead of waiting for the next one.
    #[arg(long)]
    pub terminate_on_disconnect: bool,
    /// Deliver fragments individually instead of reassembling them.
    #[arg(long)]
    pub raw_fragments: bool,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Channel name of the server.
    pub id: String,
    /// Send a string packet.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub text: Option<String>,
    /// Send a data packet holding these bytes.
    #[arg(long, conflicts_with_all = ["text", "file"])]
    pub data: Option<String>,
    /// Send a data packet holding this file's contents.
    #[arg(long, conflicts_with_all = ["text", "data"])]
    pub file: Option<PathBuf>,
    /// Split the packet into fragments of at most N payload bytes.
    #[arg(long, value_name = "N")]
    pub split: Option<usize>,
    /// Wait for one packet back and print it.
    #[arg(long)]
    pub wait: bool,
    /// How long to wait for the server and for a reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, scale) = if let Some(num) = input.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, 1000)
    } else if let Some(num) = input.strip_suffix('m') {
        (num, 60_000)
    } else {
        (input, 1000)
    };

    let value: u64 = number
        .trim()
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    value
        .checked_mul(scale)
        .map(Duration::from_millis)
        .ok_or_else(|| CliError::new(USAGE, format!("duration out of range: {input}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_accept_common_units() {
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("3s").unwrap(), Duration::from_secs(3));
        assert_eq!(parse_duration("2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
    }

    #[test]
    fn durations_reject_garbage() {
        for bad in ["", "0s", "abc", "-1s", "1h"] {
            let err = parse_duration(bad).unwrap_err();
            assert_eq!(err.code, USAGE, "{bad:?} should be a usage error");
        }
    }
}
