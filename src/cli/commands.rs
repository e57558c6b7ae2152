use crate::api::{self, DeviceService};
use crate::cli::args::{Args, Command, ConfigCommand, DisplayMode, MonitorArgs, PortArgs, SendArgs};
use crate::cli::output::{ConsoleWriter, OutputWriter};
use crate::core::connection::{ConnectionManager, ReconnectPolicy};
use crate::core::events::Subscription;
use crate::domain::config::AppConfig;
use crate::domain::connection::{ConnectionConfig, ConnectionKey};
use crate::domain::error::{SerialMonError, SerialMonResult};
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::serial::SerialPortDriver;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// How often `monitor` checks whether reconnecting has given up
const EXHAUSTION_POLL: Duration = Duration::from_secs(1);

/// Execute CLI command
pub async fn execute_command(args: Args) -> SerialMonResult<()> {
    let writer = ConsoleWriter::new(args.output);

    let config_manager = ConfigManager::new()?;
    let config = if let Some(config_path) = &args.config {
        config_manager.load_config_from_path(config_path.as_ref())?
    } else {
        config_manager.load_config()?
    };

    if !args.quiet {
        init_logging(&config.global.log_level, args.verbose)?;
    }

    match args.command {
        Command::Config(config_args) => {
            execute_config_command(config_args.command, &writer, &config, &config_manager)
        }
        Command::Version => {
            writer.write_message(&format!("serialmon {}", env!("CARGO_PKG_VERSION")))?;
            Ok(())
        }
        Command::List => {
            let manager = build_manager(&config);
            let ports = manager.list_devices().await?;
            writer.write_ports(&ports)?;
            Ok(())
        }
        Command::Monitor(monitor_args) => {
            execute_monitor(monitor_args, &writer, &config, build_manager(&config)).await
        }
        Command::Send(send_args) => {
            execute_send(send_args, &writer, &config, build_manager(&config)).await
        }
        Command::Serve => {
            let service = DeviceService::new(build_manager(&config));
            let reader = BufReader::new(tokio::io::stdin());
            api::serve(service, reader, tokio::io::stdout()).await
        }
    }
}

fn build_manager(config: &AppConfig) -> ConnectionManager {
    ConnectionManager::new(
        Arc::new(SerialPortDriver::new()),
        ReconnectPolicy::from(&config.global),
    )
}

/// Turn `--port`/`--device` selection into a connection config
pub fn resolve_connection(args: &PortArgs, config: &AppConfig) -> SerialMonResult<ConnectionConfig> {
    let mut connection = if let Some(name) = &args.device {
        let profile = config.find_device(name).ok_or_else(|| SerialMonError::Config {
            message: format!("Device '{}' not found in configuration", name),
        })?;
        profile.connection_config()
    } else if let Some(path) = &args.port {
        ConnectionConfig {
            key: ConnectionKey::from_parts(path, args.location_id.as_deref()),
            path: path.clone(),
            baud_rate: config.global.default_baud_rate,
            data_bits: args.data_bits,
            stop_bits: args.stop_bits,
            parity: args.parity.into(),
            flow_control: args.flow_control.into(),
        }
    } else {
        return Err(SerialMonError::InvalidInput("Either --port or --device is required".to_string()));
    };

    if let Some(baud) = args.baud {
        connection.baud_rate = baud;
    }
    if args.device.is_some() && args.location_id.is_some() {
        connection.key = ConnectionKey::from_parts(&connection.path, args.location_id.as_deref());
    }

    Ok(connection)
}

async fn execute_monitor(
    args: MonitorArgs,
    writer: &ConsoleWriter,
    config: &AppConfig,
    manager: ConnectionManager,
) -> SerialMonResult<()> {
    let connection = resolve_connection(&args.port, config)?;
    let key = connection.key.clone();
    let path = connection.path.clone();

    let mut events = manager.subscribe(&key);
    manager.connect(connection, false).await?;
    writer.write_message(&format!("Monitoring {} as '{}' (Press Ctrl+C to stop)", path, key))?;

    let result = monitor_loop(&manager, &key, args.display, writer, &mut events, tokio::signal::ctrl_c()).await;

    match manager.disconnect(&key).await {
        Ok(()) | Err(SerialMonError::NotFound { .. }) => {}
        Err(e) => writer.write_error(&e.to_string())?,
    }
    manager.shutdown().await;
    result
}

/// Relay events and stdin until `interrupt` resolves. The interrupt future
/// lives across loop passes so a signal raised mid-branch is not lost.
async fn monitor_loop<F>(
    manager: &ConnectionManager,
    key: &ConnectionKey,
    display: DisplayMode,
    writer: &ConsoleWriter,
    events: &mut Subscription,
    interrupt: F,
) -> SerialMonResult<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    let mut stdin = stdin_lines()?;
    let mut stdin_open = true;
    let mut poll = tokio::time::interval(EXHAUSTION_POLL);
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            _ = &mut interrupt => {
                info!("Interrupted, disconnecting '{}'", key);
                return Ok(());
            }
            Some(event) = events.recv() => {
                writer.write_event(&event, display)?;
            }
            line = stdin.recv(), if stdin_open => {
                match line {
                    Some(line) => {
                        if let Err(e) = manager.write(key, &line).await {
                            writer.write_error(&e.to_string())?;
                        }
                    }
                    None => {
                        debug!("stdin closed, monitoring only");
                        stdin_open = false;
                    }
                }
            }
            _ = poll.tick() => {
                if manager.status(key).await.map_or(false, |status| status.exhausted) {
                    return Err(SerialMonError::Open {
                        path: key.to_string(),
                        message: format!("gave up after {} reconnect attempts", manager.policy().max_retry),
                    });
                }
            }
        }
    }
}

/// Stdin lines read on a detached thread. A blocking read parked in the
/// runtime's pool would keep the process alive after Ctrl-C.
fn stdin_lines() -> SerialMonResult<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
        })?;
    Ok(rx)
}

async fn execute_send(
    args: SendArgs,
    writer: &ConsoleWriter,
    config: &AppConfig,
    manager: ConnectionManager,
) -> SerialMonResult<()> {
    let connection = resolve_connection(&args.port, config)?;
    let key = connection.key.clone();

    manager.connect(connection, false).await?;
    let sent = manager.write(&key, &args.text).await;
    manager.disconnect(&key).await?;
    manager.shutdown().await;
    sent?;

    writer.write_message(&format!("Sent {} bytes to '{}'", args.text.len() + 1, key))?;
    Ok(())
}

fn execute_config_command(
    command: ConfigCommand,
    writer: &ConsoleWriter,
    config: &AppConfig,
    config_manager: &ConfigManager,
) -> SerialMonResult<()> {
    match command {
        ConfigCommand::Show => {
            writer.write_config(config)?;
            Ok(())
        }
        ConfigCommand::Validate { file } => {
            if let Some(config_path) = file {
                match config_manager.load_config_from_path(config_path.as_ref()) {
                    Ok(_) => writer.write_message(&format!("Configuration file '{}' is valid", config_path))?,
                    Err(e) => writer.write_error(&format!("Configuration validation failed: {}", e))?,
                }
            } else {
                match config_manager.load_config() {
                    Ok(_) => writer.write_message("Current configuration is valid")?,
                    Err(e) => writer.write_error(&format!("Configuration validation failed: {}", e))?,
                }
            }
            Ok(())
        }
        ConfigCommand::Init { dir, global } => {
            if global {
                let global_path = config_manager.global_config_path();
                if global_path.exists() {
                    return Err(SerialMonError::Config {
                        message: format!("Global configuration already exists at '{}'", global_path.display()),
                    });
                }
                config_manager.save_config_to_path(global_path, &AppConfig::default())?;
                writer.write_message(&format!("Global configuration initialized at '{}'", global_path.display()))?;
            } else {
                let dir = match dir {
                    Some(dir) => Path::new(&dir).to_path_buf(),
                    None => std::env::current_dir().map_err(|e| SerialMonError::Config {
                        message: format!("Failed to get current directory: {}", e),
                    })?,
                };
                let created = config_manager.init_project_config(&dir)?;
                writer.write_message(&format!("Project configuration initialized at '{}'", created.display()))?;
            }
            Ok(())
        }
        ConfigCommand::Devices => {
            writer.write_devices(&config.devices)?;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::args::{FlowControlArg, OutputFormat, ParityArg};
    use crate::core::events::ConnectionEvent;
    use crate::domain::config::DeviceProfile;
    use crate::domain::connection::{FlowControlConfig, ParityConfig};

    fn port_args() -> PortArgs {
        PortArgs {
            port: None,
            device: None,
            baud: None,
            location_id: None,
            data_bits: 8,
            stop_bits: 1,
            parity: ParityArg::None,
            flow_control: FlowControlArg::None,
        }
    }

    fn config_with_profile() -> AppConfig {
        let mut config = AppConfig::default();
        config.devices.push(DeviceProfile {
            name: "gps".to_string(),
            description: String::new(),
            path: "/dev/ttyACM0".to_string(),
            location_id: Some("1-1.2".to_string()),
            baud_rate: 4800,
            data_bits: 8,
            stop_bits: 1,
            parity: ParityConfig::None,
            flow_control: FlowControlConfig::None,
        });
        config
    }

    #[test]
    fn test_resolve_port_uses_default_baud_and_location_key() {
        let mut args = port_args();
        args.port = Some("/dev/ttyUSB0".to_string());
        args.location_id = Some("20-1".to_string());
        args.parity = ParityArg::Even;

        let connection = resolve_connection(&args, &AppConfig::default()).unwrap();
        assert_eq!(connection.key.as_str(), "20-1");
        assert_eq!(connection.baud_rate, 9600);
        assert_eq!(connection.parity, ParityConfig::Even);
    }

    #[test]
    fn test_resolve_device_profile_with_baud_override() {
        let mut args = port_args();
        args.device = Some("gps".to_string());
        args.baud = Some(9600);

        let connection = resolve_connection(&args, &config_with_profile()).unwrap();
        assert_eq!(connection.path, "/dev/ttyACM0");
        assert_eq!(connection.key.as_str(), "1-1.2");
        assert_eq!(connection.baud_rate, 9600);
    }

    #[tokio::test]
    async fn test_monitor_stops_on_interrupt_while_events_stream() {
        let manager = build_manager(&AppConfig::default());
        let key = ConnectionKey::new("/dev/ttyUSB0");
        let mut events = manager.subscribe(&key);
        let writer = ConsoleWriter::new(OutputFormat::Json);

        let bus = manager.events().clone();
        let chatter_key = key.clone();
        let chatter = tokio::spawn(async move {
            loop {
                bus.publish(ConnectionEvent::Data { key: chatter_key.clone(), line: "tick".to_string() });
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        let interrupt = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(())
        };
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            monitor_loop(&manager, &key, DisplayMode::Text, &writer, &mut events, interrupt),
        )
        .await;
        chatter.abort();

        assert!(matches!(result, Ok(Ok(()))));
    }

    #[test]
    fn test_resolve_unknown_device_is_config_error() {
        let mut args = port_args();
        args.device = Some("missing".to_string());

        let result = resolve_connection(&args, &config_with_profile());
        assert!(matches!(result, Err(SerialMonError::Config { .. })));
    }
}
