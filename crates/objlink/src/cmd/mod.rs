use clap::{Args, Subcommand};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod call;
pub mod listen;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Host the demo root object and serve sessions.
    Listen(ListenArgs),
    /// Connect, invoke a method on the host's root object, print the result.
    Call(CallArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Listen(args) => listen::run(args, format),
        Command::Call(args) => call::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to bind, e.g. 127.0.0.1:9173.
    pub addr: String,
    /// Module ids to serve (comma-separated). Default: any.
    #[arg(long, value_delimiter = ',')]
    pub modules: Option<Vec<String>>,
    /// Exit after serving N sessions.
    #[arg(long)]
    pub sessions: Option<usize>,
}

#[derive(Args, Debug)]
pub struct CallArgs {
    /// Address to connect to.
    pub addr: String,
    /// Method name on the target object.
    pub method: String,
    /// Arguments, one JSON scalar each (e.g. 2 3.5 '"text"' true null).
    pub args: Vec<String>,
    /// Module id to request during the handshake.
    #[arg(long, default_value = "demo")]
    pub module: String,
    /// Invoke on a specific host handle instead of the root object.
    #[arg(long, value_name = "HANDLE")]
    pub target_handle: Option<u32>,
    /// Maximum time to wait for the reply (e.g. 5s, 500ms).
    #[arg(long, default_value = "60s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse humane durations of the shape `5s` / `500ms` / `2m`.
pub fn parse_duration(raw: &str) -> Option<std::time::Duration> {
    let raw = raw.trim();
    let (digits, unit) = raw.split_at(raw.find(|c: char| !c.is_ascii_digit())?);
    let amount: u64 = digits.parse().ok()?;
    match unit {
        "ms" => Some(std::time::Duration::from_millis(amount)),
        "s" => Some(std::time::Duration::from_secs(amount)),
        "m" => Some(std::time::Duration::from_secs(amount * 60)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_parse_with_units() {
        assert_eq!(
            parse_duration("500ms"),
            Some(std::time::Duration::from_millis(500))
        );
        assert_eq!(parse_duration("5s"), Some(std::time::Duration::from_secs(5)));
        assert_eq!(
            parse_duration("2m"),
            Some(std::time::Duration::from_secs(120))
        );
        assert_eq!(parse_duration("7"), None);
        assert_eq!(parse_duration("s"), None);
        assert_eq!(parse_duration("5h"), None);
    }
}
