//! picboot CLI - Command-line uploader for the PIC16 serial bootloader.
//!
//! ## Features
//!
//! - Convert Intel HEX firmware to a flat `.bin` image
//! - Erase, write, verify and reset over a serial link
//! - Environment variable and config file fallbacks
//! - Progress bar and coloured status output on terminals

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, error::ErrorKind};
use console::style;
use env_logger::Env;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use log::debug;
use picboot::port::DEFAULT_IDLE_TIMEOUT;
use picboot::{NativePort, SerialConfig, Session};
use std::env;
use std::io::{self, Write as _};
use std::path::PathBuf;
use std::sync::LazyLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Progress bars shown while logging; log output is written around them.
static PROGRESS: LazyLock<MultiProgress> = LazyLock::new(MultiProgress::new);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// stderr sink for `env_logger` that hides active progress bars while a
/// record is written.
struct ProgressAwareStderr;

impl io::Write for ProgressAwareStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        PROGRESS.suspend(|| io::stderr().write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

mod config;

use config::Config;

/// Exit codes.
const EXIT_FAILURE: i32 = 1;
const EXIT_PORT_OPEN: i32 = 3;
const EXIT_DEVICE: i32 = 4;

/// picboot - Upload firmware to PIC16 devices running the serial bootloader.
///
/// Environment variables:
///   PICBOOT_FLASH_SIZE    - Default flash size in hex (e.g. 0x4000)
///   PICBOOT_PORT          - Default serial port
///   PICBOOT_BAUD          - Default baud rate
///   PICBOOT_IDLE_TIMEOUT  - Response idle window in milliseconds
#[derive(Parser)]
#[command(name = "picboot")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
#[command(
    after_help = "Example: picboot App.hex 0x4000 /dev/ttyUSB0 9600\n\nA HEX input is converted and saved as <name>.bin next to it before upload."
)]
struct Cli {
    /// Firmware file (Intel HEX, or a raw .bin placed at address 0).
    firmware: PathBuf,

    /// Flash size in bytes, hexadecimal (e.g. 0x4000).
    #[arg(env = "PICBOOT_FLASH_SIZE", value_parser = parse_hex_u32)]
    flash_size: Option<u32>,

    /// Serial port (e.g. /dev/ttyUSB0 or COM3).
    #[arg(env = "PICBOOT_PORT")]
    com_port: Option<String>,

    /// Baud rate.
    #[arg(env = "PICBOOT_BAUD")]
    baud_rate: Option<u32>,

    /// Verbose output level (-v for debug detail, -vv for everything).
    ///
    /// Packet dumps (Tx/Rx) are shown at the default level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", value_name = "PATH")]
    config_path: Option<PathBuf>,

    /// Silence that ends a response, in milliseconds [default: 1000].
    #[arg(long, value_name = "MS", env = "PICBOOT_IDLE_TIMEOUT")]
    idle_timeout: Option<u64>,
}

/// Parse hexadecimal value (supports 0x prefix and underscores).
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let s = s.trim_start_matches("0x").trim_start_matches("0X");
    // Support underscore separators like 0x00_40_00
    let s: String = s.chars().filter(|c| *c != '_').collect();
    u32::from_str_radix(&s, 16).map_err(|e| format!("Invalid hex value: {e}"))
}

/// Connection and target settings after applying all fallbacks.
#[derive(Debug, PartialEq, Eq)]
struct Settings {
    flash_size: u32,
    port: String,
    baud: u32,
    idle_timeout: Duration,
}

/// Fill in settings the command line left out from the config file.
///
/// Environment variables are already folded into `cli` by clap.
fn resolve_settings(cli: &Cli, config: &Config) -> Result<Settings, (ErrorKind, String)> {
    let flash_size = match (cli.flash_size, config.target.flash_size.as_deref()) {
        (Some(size), _) => size,
        (None, Some(text)) => parse_hex_u32(text).map_err(|e| {
            (
                ErrorKind::InvalidValue,
                format!("invalid flash_size '{text}' in config: {e}"),
            )
        })?,
        (None, None) => return Err(missing("<FLASH_SIZE>", "PICBOOT_FLASH_SIZE")),
    };

    let port = cli
        .com_port
        .clone()
        .or_else(|| config.connection.port.clone())
        .ok_or_else(|| missing("<COM_PORT>", "PICBOOT_PORT"))?;

    let baud = cli
        .baud_rate
        .or(config.connection.baud)
        .ok_or_else(|| missing("<BAUD_RATE>", "PICBOOT_BAUD"))?;

    let idle_timeout = cli
        .idle_timeout
        .or(config.connection.idle_timeout_ms)
        .map_or(DEFAULT_IDLE_TIMEOUT, Duration::from_millis);

    Ok(Settings {
        flash_size,
        port,
        baud,
        idle_timeout,
    })
}

fn missing(arg: &str, var: &str) -> (ErrorKind, String) {
    (
        ErrorKind::MissingRequiredArgument,
        format!("{arg} was not provided (argument, {var} or config file)"),
    )
}

/// Map a failure to the process exit code.
fn exit_code(err: &anyhow::Error) -> i32 {
    let lib_err = err
        .chain()
        .find_map(|e| e.downcast_ref::<picboot::Error>());

    match lib_err {
        Some(picboot::Error::Serial(_)) => EXIT_PORT_OPEN,
        Some(e) if e.is_device_error() => EXIT_DEVICE,
        _ => EXIT_FAILURE,
    }
}

fn main() {
    let cli = Cli::parse();

    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        // Disable all color output
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .target(env_logger::Target::Pipe(Box::new(ProgressAwareStderr)))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "picboot v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    let settings = match resolve_settings(&cli, &config) {
        Ok(settings) => settings,
        Err((kind, message)) => Cli::command().error(kind, message).exit(),
    };

    if let Err(err) = cmd_upload(&cli, &settings) {
        eprintln!("{} {err:#}", style("Error:").red().bold());
        std::process::exit(exit_code(&err));
    }
}

fn step(quiet: bool, icon: &str, message: &str) {
    if !quiet {
        if use_fancy_output() {
            eprintln!("{} {message}", style(icon).cyan());
        } else {
            eprintln!("{message}");
        }
    }
}

fn done(quiet: bool, message: &str) {
    if !quiet {
        eprintln!("{} {message}", style("✓").green());
    }
}

fn row_progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(0);
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rows {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    PROGRESS.add(pb)
}

/// Upload command implementation.
fn cmd_upload(cli: &Cli, settings: &Settings) -> Result<()> {
    let quiet = cli.quiet;

    step(
        quiet,
        "📦",
        &format!("Preparing firmware {}", cli.firmware.display()),
    );
    let image = picboot::prepare(&cli.firmware, settings.flash_size).with_context(|| {
        format!("Failed to prepare firmware {}", cli.firmware.display())
    })?;
    done(
        quiet,
        &format!(
            "Image 0x{:06X} - 0x{:06X} ({} bytes)",
            image.start_address(),
            image.end_address(),
            image.len()
        ),
    );

    step(
        quiet,
        "🔌",
        &format!("Using port {} at {} baud", settings.port, settings.baud),
    );
    let serial = SerialConfig::new(&settings.port, settings.baud).with_idle_timeout(settings.idle_timeout);
    let port = NativePort::open(&serial)
        .with_context(|| format!("Failed to open serial port {}", settings.port))?;

    let mut session = Session::new(port, settings.flash_size);

    step(quiet, "⏳", "Reading bootloader version");
    let info = session
        .read_version()
        .context("Failed to read bootloader version")?;
    done(quiet, &info.to_string());

    step(quiet, "🧹", "Erasing flash");
    let rows = session.erase(&image).context("Failed to erase flash")?;
    done(quiet, &format!("Erased {rows} rows"));

    step(quiet, "✏", "Writing flash");
    let pb = row_progress_bar(quiet);
    let summary = session
        .write(&image, |current, total| {
            pb.set_length(total as u64);
            pb.set_position(current as u64);
        })
        .context("Failed to write flash");
    pb.finish_and_clear();
    PROGRESS.remove(&pb);
    let summary = summary?;
    done(
        quiet,
        &format!(
            "Wrote {} rows, skipped {} blank rows",
            summary.rows_written, summary.rows_skipped
        ),
    );

    step(quiet, "🔍", "Verifying checksum");
    let checksum = session.verify(&image).context("Failed to verify flash")?;
    done(quiet, &format!("Checksum 0x{checksum:04X} matches"));

    step(quiet, "🔄", "Resetting device");
    session.reset().context("Failed to reset device")?;

    if !quiet {
        eprintln!(
            "\n{} Upload of {} complete",
            style("🎉").green().bold(),
            cli.firmware.display()
        );
    }

    Ok(())
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use crate::config::{ConnectionConfig, TargetConfig};

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_all_positionals() {
        let cli = parse(&["picboot", "App.hex", "0x4000", "/dev/ttyUSB0", "9600"]);
        assert_eq!(cli.firmware, PathBuf::from("App.hex"));
        assert_eq!(cli.flash_size, Some(0x4000));
        assert_eq!(cli.com_port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cli.baud_rate, Some(9600));
    }

    #[test]
    fn test_cli_global_options() {
        let cli = parse(&[
            "picboot",
            "-vv",
            "--config",
            "my.toml",
            "--idle-timeout",
            "250",
            "App.hex",
        ]);
        assert_eq!(cli.verbose, 2);
        assert!(!cli.quiet);
        assert_eq!(cli.config_path, Some(PathBuf::from("my.toml")));
        assert_eq!(cli.idle_timeout, Some(250));
    }

    #[test]
    fn test_cli_invalid_flash_size() {
        assert!(Cli::try_parse_from(["picboot", "App.hex", "zz"]).is_err());
    }

    #[test]
    fn test_cli_missing_firmware() {
        let err = Cli::try_parse_from(["picboot"]).err().unwrap();
        assert_eq!(
            err.kind(),
            ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );
    }

    #[test]
    fn test_parse_hex_u32_with_prefix() {
        assert_eq!(parse_hex_u32("0x4000"), Ok(0x4000));
        assert_eq!(parse_hex_u32("0X4000"), Ok(0x4000));
    }

    #[test]
    fn test_parse_hex_u32_without_prefix() {
        assert_eq!(parse_hex_u32("2000"), Ok(0x2000));
    }

    #[test]
    fn test_parse_hex_u32_with_underscores() {
        assert_eq!(parse_hex_u32("0x00_40_00"), Ok(0x4000));
    }

    #[test]
    fn test_parse_hex_u32_invalid() {
        assert!(parse_hex_u32("0xGG").is_err());
        assert!(parse_hex_u32("").is_err());
    }

    #[test]
    fn test_parse_hex_u32_overflow() {
        assert!(parse_hex_u32("0x1_0000_0000").is_err());
    }

    #[test]
    fn test_resolve_from_config() {
        let cli = parse(&["picboot", "App.hex"]);
        let config = Config {
            connection: ConnectionConfig {
                port: Some("COM3".to_string()),
                baud: Some(19200),
                idle_timeout_ms: Some(300),
            },
            target: TargetConfig {
                flash_size: Some("0x2000".to_string()),
            },
        };

        let settings = resolve_settings(&cli, &config).unwrap();
        assert_eq!(
            settings,
            Settings {
                flash_size: 0x2000,
                port: "COM3".to_string(),
                baud: 19200,
                idle_timeout: Duration::from_millis(300),
            }
        );
    }

    #[test]
    fn test_resolve_cli_overrides_config() {
        let cli = parse(&["picboot", "App.hex", "0x4000", "/dev/ttyACM0", "9600"]);
        let mut config = Config::default();
        config.connection.port = Some("COM3".to_string());
        config.connection.baud = Some(19200);
        config.target.flash_size = Some("0x2000".to_string());

        let settings = resolve_settings(&cli, &config).unwrap();
        assert_eq!(settings.flash_size, 0x4000);
        assert_eq!(settings.port, "/dev/ttyACM0");
        assert_eq!(settings.baud, 9600);
        assert_eq!(settings.idle_timeout, DEFAULT_IDLE_TIMEOUT);
    }

    #[test]
    fn test_resolve_missing_port() {
        let cli = parse(&["picboot", "App.hex", "0x4000"]);
        let (kind, message) = resolve_settings(&cli, &Config::default()).unwrap_err();
        assert_eq!(kind, ErrorKind::MissingRequiredArgument);
        assert!(message.contains("<COM_PORT>"));
    }

    #[test]
    fn test_resolve_invalid_config_flash_size() {
        let cli = parse(&["picboot", "App.hex"]);
        let mut config = Config::default();
        config.target.flash_size = Some("big".to_string());
        let (kind, _) = resolve_settings(&cli, &config).unwrap_err();
        assert_eq!(kind, ErrorKind::InvalidValue);
    }

    #[test]
    fn test_log_sink_passes_bytes_through() {
        let mut sink = ProgressAwareStderr;
        assert_eq!(sink.write(b"Tx -> 55 00\n").unwrap(), 12);
        sink.flush().unwrap();
    }

    #[test]
    fn test_exit_code_mapping() {
        let port_err = anyhow::Error::from(picboot::Error::Serial(serialport::Error::new(
            serialport::ErrorKind::NoDevice,
            "gone",
        )))
        .context("Failed to open serial port");
        assert_eq!(exit_code(&port_err), EXIT_PORT_OPEN);

        let device_err = anyhow::Error::from(picboot::Error::ChecksumMismatch {
            expected: 1,
            actual: 2,
        })
        .context("Failed to verify flash");
        assert_eq!(exit_code(&device_err), EXIT_DEVICE);

        let io_err = anyhow::Error::from(picboot::Error::Io(std::io::Error::other("disk")));
        assert_eq!(exit_code(&io_err), EXIT_FAILURE);

        let order_err = anyhow::Error::from(picboot::Error::SequenceViolation {
            expected: picboot::SessionState::Erased,
            actual: picboot::SessionState::NotStarted,
        });
        assert_eq!(exit_code(&order_err), EXIT_FAILURE);
    }
}
