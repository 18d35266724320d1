//! Polling loop.
//!
//! Drives one device against a simulated peripheral on a real clock: one
//! poll cycle per tick, faults injected on schedule, state transitions
//! logged as they happen.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use turnstile_core::{
    ApplicationCommand, DeviceConfig, SecureChannelKey, crypto::KEY_LEN,
    liveness::DEFAULT_OFFLINE_TIMEOUT,
};
use turnstile_harness::{BusStats, Fault, PeripheralConfig, SimBus};
use zeroize::Zeroizing;

use crate::{SimError, SystemEnv};

/// osdp_LED, used as the demo application command.
const CODE_LED: u8 = 0x69;

/// Polling loop configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Controller-side device settings
    pub device: DeviceConfig,
    /// Simulated peripheral behavior
    pub peripheral: PeripheralConfig,
    /// Poll cycles to run; 0 runs until interrupted
    pub cycles: u64,
    /// Time between poll cycles
    pub interval: Duration,
    /// Drop every n-th reply; 0 never drops
    pub drop_every: u64,
    /// Application commands queued at startup
    pub commands: u8,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            peripheral: PeripheralConfig::default(),
            cycles: 20,
            interval: Duration::from_millis(200),
            drop_every: 0,
            commands: 3,
        }
    }
}

impl SimConfig {
    /// Reject configurations the loop cannot run.
    pub fn validate(&self) -> Result<(), SimError> {
        if self.interval.is_zero() {
            return Err(SimError::Config("poll interval must be non-zero".to_string()));
        }
        if self.device.offline_timeout < self.interval {
            tracing::warn!(
                interval = ?self.interval,
                offline_timeout = ?self.device.offline_timeout,
                "offline timeout shorter than poll interval, device will flap"
            );
        }
        Ok(())
    }

    /// Fault for the given 1-based cycle number.
    pub fn fault_for(&self, cycle: u64) -> Fault {
        if self.drop_every != 0 && cycle % self.drop_every == 0 {
            Fault::DropReply
        } else {
            Fault::None
        }
    }
}

/// Final state after the loop stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Bus counters
    pub stats: BusStats,
    /// Whether the secure channel ended established
    pub established: bool,
    /// Whether the device ended online
    pub online: bool,
    /// Application commands the peripheral received
    pub delivered: usize,
    /// Application commands still queued
    pub pending: usize,
}

/// Parse a 16-byte secure channel base key from hex.
pub fn parse_key(hex_key: &str) -> Result<SecureChannelKey, SimError> {
    let bytes = Zeroizing::new(hex::decode(hex_key.trim())?);
    let key: [u8; KEY_LEN] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| SimError::KeyLength { expected: KEY_LEN, actual: bytes.len() })?;
    Ok(SecureChannelKey::new(key))
}

/// Offline timeout from milliseconds, falling back to the default for 0.
pub fn offline_timeout(millis: u64) -> Duration {
    if millis == 0 { DEFAULT_OFFLINE_TIMEOUT } else { Duration::from_millis(millis) }
}

/// Run the polling loop until `cycles` is reached or Ctrl-C.
pub async fn run(config: SimConfig) -> Result<RunSummary, SimError> {
    config.validate()?;

    let address = config.device.address;
    let mut bus = SimBus::new(SystemEnv::new(), config.device.clone(), config.peripheral.clone());
    for i in 0..config.commands {
        bus.device_mut().send_command(ApplicationCommand::new(address, CODE_LED, vec![i]));
    }

    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut was_online = true;
    let mut was_established = false;
    let mut cycle = 0u64;

    while config.cycles == 0 || cycle < config.cycles {
        tokio::select! {
            _ = ticker.tick() => {},
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping poll loop");
                break;
            },
        }

        cycle += 1;
        let outcome = bus.poll_cycle(config.fault_for(cycle));
        tracing::debug!(
            address,
            cycle,
            sequence = outcome.sequence,
            command = ?outcome.command.protocol_code(),
            reply = ?outcome.reply.as_ref().map(turnstile_core::Reply::code),
            "poll cycle"
        );

        if let Err(e) = &outcome.result {
            tracing::warn!(address, cycle, error = %e, reset = outcome.reset, "reply rejected");
        }

        let established = bus.device().is_security_established();
        if established != was_established {
            tracing::info!(address, cycle, established, "secure channel state changed");
            was_established = established;
        }

        let online = bus.device().is_online();
        if online != was_online {
            if online {
                tracing::info!(address, cycle, "device online");
            } else {
                tracing::warn!(address, cycle, "device offline");
            }
            was_online = online;
        }
    }

    let device = bus.device();
    Ok(RunSummary {
        stats: bus.stats(),
        established: device.is_security_established(),
        online: device.is_online(),
        delivered: bus.peripheral().received().len(),
        pending: device.pending_commands(),
    })
}
