use ble_gateway::config::{ConfigError, GatewayConfig};
use ble_gateway::gateway::{self, GatewayError, GatewaySettings, RealScanner};
use ble_gateway::mac_address::MacAddress;
use ble_gateway::mqtt::{MqttPublisher, PublishError};
use ble_gateway::scanner::{Backend, ScanConfig};
use clap::Parser;
use std::panic::{self, PanicHookInfo};
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

#[derive(Parser, Debug)]
#[command(author, about, version)]
struct Options {
    /// Path to the configuration JSON file.
    #[arg(short = 'c', long)]
    config: PathBuf,

    /// Log level filter; the RUST_LOG environment variable takes precedence.
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Override publish interval in seconds (0=immediate, >0=buffered).
    #[arg(long)]
    publish_interval: Option<f64>,

    /// Disable throttle control (keep all records instead of last per device).
    #[arg(long)]
    no_throttle: bool,

    /// Override maximum buffer size.
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    backend: Backend,
}

/// Errors that abort the gateway.
#[derive(Error, Debug)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Apply command-line overrides to the loaded configuration.
///
/// Runs before validation so that an override producing an invalid
/// combination still fails startup.
fn apply_overrides(config: &mut GatewayConfig, options: &Options) {
    if let Some(interval) = options.publish_interval {
        config.publish_interval_sec = interval;
    }
    if options.no_throttle {
        config.throttle_control = false;
    }
    if let Some(size) = options.buffer_size {
        config.max_buffer_size = size;
    }
}

/// Main application entry point that wires config, transport and the loop.
///
/// This function:
/// 1. Loads the JSON configuration and applies CLI overrides
/// 2. Validates the merged configuration
/// 3. Connects the MQTT publish sink
/// 4. Runs the gateway loop until Ctrl-C or scan-source loss
/// 5. Disconnects cleanly and logs the final counters
///
/// # Errors
/// Returns an `AppError` if configuration, transport setup or scanning fails.
async fn run(options: Options) -> Result<(), AppError> {
    info!("Loading configuration from {}", options.config.display());
    let mut config = GatewayConfig::from_file(&options.config)?;
    apply_overrides(&mut config, &options);
    config.validate()?;

    let gateway_mac = config.gateway_mac.unwrap_or_else(|| {
        let fallback = MacAddress::default();
        warn!("gateway_mac not configured, using {fallback}");
        fallback
    });

    let settings = GatewaySettings {
        policy: config.buffer_policy(),
        criteria: config.filter_criteria(),
        gateway_mac,
        topic: config.mqtt.topic.clone(),
        backend: options.backend,
        scan: ScanConfig {
            adapter: config.bluetooth_adapter.clone(),
            service_uuids: config.service_uuid_whitelist.clone(),
        },
    };

    let mut sink = MqttPublisher::connect(&config.mqtt).await?;

    let cancel = CancellationToken::new();
    let stop = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
            stop.cancel();
        }
    });

    let counters = gateway::run(settings, &RealScanner, &mut sink, cancel).await?;
    sink.disconnect().await;
    info!("Final stats: {counters}");

    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&options.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(options).await {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> GatewayConfig {
        GatewayConfig::from_json(r#"{"mqtt": {"broker": "b", "auth_type": "none"}}"#).unwrap()
    }

    fn options(args: &[&str]) -> Options {
        Options::parse_from(std::iter::once("ble-gateway").chain(args.iter().copied()))
    }

    #[test]
    fn test_overrides_change_effective_policy() {
        let mut config = minimal_config();
        let options = options(&[
            "--config",
            "gateway.json",
            "--publish-interval",
            "2.5",
            "--no-throttle",
            "--buffer-size",
            "7",
        ]);

        apply_overrides(&mut config, &options);

        let policy = config.buffer_policy();
        assert_eq!(policy.flush_interval, std::time::Duration::from_millis(2500));
        assert_eq!(policy.max_batch_size, 7);
        assert!(!policy.throttle);
    }

    #[test]
    fn test_no_overrides_keep_config_values() {
        let mut config = minimal_config();
        config.publish_interval_sec = 9.0;

        apply_overrides(&mut config, &options(&["--config", "gateway.json"]));

        assert_eq!(config.publish_interval_sec, 9.0);
        assert!(config.throttle_control);
        assert_eq!(config.max_buffer_size, 100);
    }

    #[test]
    fn test_zero_buffer_size_override_fails_validation() {
        let mut config = minimal_config();
        let options = options(&["--config", "gateway.json", "--buffer-size", "0"]);

        apply_overrides(&mut config, &options);

        assert!(config.validate().is_err());
    }
}
