use std::path::PathBuf;

use clap::{Parser, Subcommand};
use walrus_core::DeviceId;

#[derive(Parser, Debug)]
#[command(name = "walrus")]
#[command(about = "USB RFID card reader tool")]
#[command(version)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Use simulated readers instead of USB serial ports
    #[arg(long)]
    pub mock: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Scan once and list connected readers
    List,

    /// Follow readers being plugged in and out
    Watch,

    /// Read one card and print it as JSON
    Read {
        /// Device id as shown by `list` (defaults to the first reader)
        #[arg(short, long)]
        device: Option<DeviceId>,

        /// How long to wait for a card, in milliseconds
        #[arg(short, long, default_value_t = walrus_core::constants::DEFAULT_SCAN_TIMEOUT_MS)]
        timeout_ms: u64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["walrus", "list"]).unwrap();
        assert_eq!(args.command, Command::List);
        assert_eq!(args.log_level, "info");
        assert!(args.config.is_none());
        assert!(!args.mock);
    }

    #[rstest]
    #[case(&["walrus", "read"], None, 5000)]
    #[case(&["walrus", "read", "--device", "#2"], Some(2), 5000)]
    #[case(&["walrus", "read", "-d", "3", "-t", "250"], Some(3), 250)]
    fn test_read_args(#[case] argv: &[&str], #[case] device: Option<u32>, #[case] timeout: u64) {
        let args = Args::try_parse_from(argv).unwrap();
        assert_eq!(
            args.command,
            Command::Read {
                device: device.map(DeviceId::new),
                timeout_ms: timeout,
            }
        );
    }

    #[test]
    fn test_global_flags() {
        let args = Args::try_parse_from([
            "walrus",
            "--mock",
            "--config",
            "walrus.toml",
            "-l",
            "debug",
            "watch",
        ])
        .unwrap();
        assert!(args.mock);
        assert_eq!(args.config, Some(PathBuf::from("walrus.toml")));
        assert_eq!(args.log_level, "debug");
        assert_eq!(args.command, Command::Watch);
    }

    #[test]
    fn test_invalid_device_id() {
        assert!(Args::try_parse_from(["walrus", "read", "--device", "abc"]).is_err());
    }
}
