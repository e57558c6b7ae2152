use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// Command line arguments for SerialMon
#[derive(Parser, Debug)]
#[command(
    name = "serialmon",
    version = env!("CARGO_PKG_VERSION"),
    about = "Serial port monitor with automatic reconnect",
    long_about = "Lists serial devices, monitors them line by line, sends text and reconnects automatically when a device drops off the bus."
)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress log output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// List available serial devices
    List,
    /// Connect to a device and print its lines; stdin lines are sent to it
    Monitor(MonitorArgs),
    /// Connect, send one line of text and disconnect
    Send(SendArgs),
    /// Run the JSON-lines device service on stdin/stdout
    Serve,
    /// Configuration management commands
    Config(ConfigArgs),
    /// Display version information
    Version,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text output
    #[default]
    Text,
    /// JSON output
    Json,
    /// Table output
    Table,
    /// CSV output
    Csv,
}

/// How received lines are printed by `monitor`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DisplayMode {
    #[default]
    Text,
    Hex,
    Base64,
}

/// Port selection shared by `monitor` and `send`
#[derive(ClapArgs, Debug, Clone)]
pub struct PortArgs {
    /// Serial port path
    #[arg(short, long, required_unless_present = "device", conflicts_with = "device")]
    pub port: Option<String>,

    /// Saved device profile name
    #[arg(short, long)]
    pub device: Option<String>,

    /// Baud rate (defaults to the configured default)
    #[arg(short, long)]
    pub baud: Option<u32>,

    /// Hardware location id used as the connection key
    #[arg(long)]
    pub location_id: Option<String>,

    /// Data bits
    #[arg(long, default_value = "8")]
    pub data_bits: u8,

    /// Stop bits
    #[arg(long, default_value = "1")]
    pub stop_bits: u8,

    /// Parity (none, even, odd)
    #[arg(long, value_enum, default_value = "none")]
    pub parity: ParityArg,

    /// Flow control (none, software, hardware)
    #[arg(long, value_enum, default_value = "none")]
    pub flow_control: FlowControlArg,
}

/// Monitor arguments
#[derive(ClapArgs, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub port: PortArgs,

    /// How received lines are displayed
    #[arg(long, value_enum, default_value = "text")]
    pub display: DisplayMode,
}

/// One-shot send arguments
#[derive(ClapArgs, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub port: PortArgs,

    /// Text to send; a newline is appended
    pub text: String,
}

/// Configuration management arguments
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    /// Configuration subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,
    /// Validate configuration
    Validate {
        /// Configuration file path
        file: Option<String>,
    },
    /// Create default configuration
    Init {
        /// Directory to create `.serialmon/config.toml` in
        #[arg(long)]
        dir: Option<String>,
        /// Write the global configuration instead
        #[arg(short, long)]
        global: bool,
    },
    /// List saved device profiles
    Devices,
}

/// Parity configuration argument
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ParityArg {
    None,
    Even,
    Odd,
}

/// Flow control configuration argument
#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum FlowControlArg {
    None,
    Software,
    Hardware,
}

impl From<ParityArg> for crate::domain::connection::ParityConfig {
    fn from(parity: ParityArg) -> Self {
        match parity {
            ParityArg::None => Self::None,
            ParityArg::Even => Self::Even,
            ParityArg::Odd => Self::Odd,
        }
    }
}

impl From<FlowControlArg> for crate::domain::connection::FlowControlConfig {
    fn from(flow_control: FlowControlArg) -> Self {
        match flow_control {
            FlowControlArg::None => Self::None,
            FlowControlArg::Software => Self::Software,
            FlowControlArg::Hardware => Self::Hardware,
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Table => write!(f, "table"),
            OutputFormat::Csv => write!(f, "csv"),
        }
    }
}
