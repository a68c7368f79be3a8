use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "scrawl",
    about = "Read and write the shared infinite text canvas",
    version
)]
pub struct Cli {
    #[arg(
        long,
        global = true,
        env = "SCRAWL_SERVER",
        help = "Base URL of the tile service (default http://127.0.0.1:8080)"
    )]
    pub server: Option<String>,

    #[arg(
        long = "config",
        global = true,
        value_name = "PATH",
        env = "SCRAWL_CONFIG",
        help = "Engine tuning file (TOML)"
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        global = true,
        help = "Run against an in-process tile service instead of the network"
    )]
    pub offline: bool,

    #[arg(
        long = "request-timeout",
        global = true,
        value_name = "SECS",
        default_value_t = 10,
        help = "HTTP request timeout in seconds (0 disables it)"
    )]
    pub request_timeout: u64,

    #[command(flatten)]
    pub logging: LoggingArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        global = true,
        env = "SCRAWL_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        global = true,
        env = "SCRAWL_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print a block of the canvas
    Dump(DumpArgs),
    /// Write text at a cell and wait for the server to confirm it
    Write(WriteArgs),
}

#[derive(Args, Debug)]
pub struct DumpArgs {
    #[arg(long, allow_negative_numbers = true, default_value_t = 0, help = "Left cell column")]
    pub x: i64,

    #[arg(long, allow_negative_numbers = true, default_value_t = 0, help = "Top cell row")]
    pub y: i64,

    #[arg(long, default_value_t = 64)]
    pub cols: u32,

    #[arg(long, default_value_t = 16)]
    pub rows: u32,
}

#[derive(Args, Debug)]
pub struct WriteArgs {
    #[arg(long, allow_negative_numbers = true, help = "Cell column of the first character")]
    pub x: i64,

    #[arg(long, allow_negative_numbers = true, help = "Cell row of the first character")]
    pub y: i64,

    #[arg(long, value_name = "RRGGBB", help = "Text color as six hex digits")]
    pub color: Option<String>,

    #[arg(value_name = "TEXT")]
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_negative_coordinates() {
        let cli = Cli::try_parse_from([
            "scrawl", "--offline", "write", "--x", "-40", "--y", "-3", "hello",
        ])
        .unwrap();
        assert!(cli.offline);
        match cli.command {
            Command::Write(args) => {
                assert_eq!((args.x, args.y), (-40, -3));
                assert_eq!(args.text, "hello");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn dump_has_defaults() {
        let cli = Cli::try_parse_from(["scrawl", "dump", "--log-level", "debug"]).unwrap();
        assert_eq!(cli.logging.level, LogLevel::Debug);
        match cli.command {
            Command::Dump(args) => assert_eq!((args.x, args.cols, args.rows), (0, 64, 16)),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
