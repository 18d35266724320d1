//! Turnstile simulator binary.
//!
//! # Usage
//!
//! ```bash
//! # Secure channel with the install-mode key, 20 cycles
//! turnstile-sim --address 5
//!
//! # Custom key, lossy bus, run until Ctrl-C
//! turnstile-sim --key 00112233445566778899aabbccddeeff --drop-every 4 --cycles 0
//!
//! # Plain device, no secure channel
//! turnstile-sim --plain --no-crc
//! ```

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use turnstile_core::DeviceConfig;
use turnstile_harness::PeripheralConfig;
use turnstile_sim::{SimConfig, offline_timeout, parse_key, run};

/// Turnstile OSDP device simulator
#[derive(Parser, Debug)]
#[command(name = "turnstile-sim")]
#[command(about = "Drive an OSDP device state machine against a simulated peripheral")]
#[command(version)]
struct Args {
    /// Device bus address
    #[arg(short, long, default_value = "0")]
    address: u8,

    /// Disable the secure channel
    #[arg(long)]
    plain: bool,

    /// Use a checksum instead of CRC-16
    #[arg(long)]
    no_crc: bool,

    /// Secure channel base key as 32 hex characters (install-mode key if
    /// omitted)
    #[arg(short, long)]
    key: Option<String>,

    /// Poll cycles to run (0 runs until Ctrl-C)
    #[arg(short, long, default_value = "20")]
    cycles: u64,

    /// Milliseconds between poll cycles
    #[arg(long, default_value = "200")]
    interval_ms: u64,

    /// Milliseconds without a valid reply before the device is offline
    #[arg(long, default_value = "5000")]
    offline_timeout_ms: u64,

    /// Make the peripheral reject every server cryptogram
    #[arg(long)]
    reject_cryptogram: bool,

    /// Drop every n-th reply (0 never drops)
    #[arg(long, default_value = "0")]
    drop_every: u64,

    /// Application commands queued at startup
    #[arg(long, default_value = "3")]
    commands: u8,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let key = args.key.as_deref().map(parse_key).transpose()?;
    if key.is_none() && !args.plain {
        tracing::warn!("No key provided - using install-mode key SCBK-D");
        tracing::warn!("This is NOT suitable for production use!");
    }

    let config = SimConfig {
        device: DeviceConfig {
            address: args.address,
            use_crc: !args.no_crc,
            use_secure_channel: !args.plain,
            secure_channel_key: key.clone(),
            offline_timeout: offline_timeout(args.offline_timeout_ms),
        },
        peripheral: PeripheralConfig {
            supports_secure_channel: !args.plain,
            reject_cryptogram: args.reject_cryptogram,
            key: key.unwrap_or_else(turnstile_core::SecureChannelKey::install_mode),
            ..Default::default()
        },
        cycles: args.cycles,
        interval: Duration::from_millis(args.interval_ms),
        drop_every: args.drop_every,
        commands: args.commands,
    };

    tracing::info!("Turnstile simulator starting");
    tracing::info!("Polling device {} every {}ms", args.address, args.interval_ms);

    let summary = run(config).await?;

    tracing::info!(
        cycles = summary.stats.cycles,
        dropped = summary.stats.replies_dropped,
        rejected = summary.stats.replies_rejected,
        resets = summary.stats.security_resets,
        established = summary.established,
        online = summary.online,
        delivered = summary.delivered,
        pending = summary.pending,
        "Simulation finished"
    );

    Ok(())
}
