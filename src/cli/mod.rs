// CLI module - Command line interface
pub mod args;
pub mod commands;
pub mod output;

pub use args::{Args, Command, DisplayMode, OutputFormat};
pub use commands::{execute_command, resolve_connection};
pub use output::{ConsoleWriter, OutputWriter};
