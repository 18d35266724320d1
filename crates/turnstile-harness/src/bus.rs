//! One controller, one peripheral, one simulated bus.
//!
//! [`SimBus::poll_cycle`] performs a single poll opportunity: ask the device
//! for its next command, let the peripheral answer, optionally corrupt the
//! exchange, and feed the reply back. The bus plays the outer loop, so it
//! also resets the secure channel when an error demands it.

use turnstile_core::{
    ApplicationCommand, Command, Device, DeviceConfig, DeviceError, Environment, Reply,
    sequence::successor,
};

use crate::peripheral::{PeripheralConfig, SimPeripheral};

/// Fault applied to a single exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Fault {
    /// Deliver the reply untouched
    #[default]
    None,
    /// The peripheral answered but the reply never arrives
    DropReply,
    /// The reply arrives echoing the wrong sequence number
    WrongSequence,
}

/// What happened during one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    /// Command the device sent
    pub command: Command<ApplicationCommand>,
    /// Sequence stamped on the command
    pub sequence: u8,
    /// Reply as delivered, `None` if dropped
    pub reply: Option<Reply>,
    /// Result of feeding the reply to the device
    pub result: Result<(), DeviceError>,
    /// Whether the bus reset the secure channel afterwards
    pub reset: bool,
}

/// Running counters for a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BusStats {
    /// Poll cycles executed
    pub cycles: usize,
    /// Replies fed to the device
    pub replies_delivered: usize,
    /// Replies lost on the bus
    pub replies_dropped: usize,
    /// Replies the device rejected
    pub replies_rejected: usize,
    /// Secure channel resets triggered by errors
    pub security_resets: usize,
}

/// A device and its peripheral sharing one environment.
pub struct SimBus<E: Environment> {
    env: E,
    device: Device<E>,
    peripheral: SimPeripheral<E>,
    stats: BusStats,
}

impl<E: Environment> SimBus<E> {
    /// Wire a fresh device to a fresh peripheral.
    pub fn new(env: E, device: DeviceConfig, peripheral: PeripheralConfig) -> Self {
        Self {
            device: Device::new(env.clone(), device),
            peripheral: SimPeripheral::new(env.clone(), peripheral),
            env,
            stats: BusStats::default(),
        }
    }

    /// Controller-side device.
    pub fn device(&self) -> &Device<E> {
        &self.device
    }

    /// Mutable controller-side device, for queueing commands.
    pub fn device_mut(&mut self) -> &mut Device<E> {
        &mut self.device
    }

    /// Simulated peripheral.
    pub fn peripheral(&self) -> &SimPeripheral<E> {
        &self.peripheral
    }

    /// Mutable simulated peripheral.
    pub fn peripheral_mut(&mut self) -> &mut SimPeripheral<E> {
        &mut self.peripheral
    }

    /// Shared environment.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Counters so far.
    pub fn stats(&self) -> BusStats {
        self.stats
    }

    /// Run one poll cycle with the given fault.
    pub fn poll_cycle(&mut self, fault: Fault) -> CycleOutcome {
        self.stats.cycles += 1;

        let command = self.device.get_next_command();
        let sequence = self.device.outgoing_sequence();
        let reply = self.peripheral.respond(&command);

        let echoed = match fault {
            Fault::None => sequence,
            Fault::WrongSequence => successor(sequence),
            Fault::DropReply => {
                self.stats.replies_dropped += 1;
                tracing::debug!(address = self.device.address(), sequence, "reply dropped");
                return CycleOutcome { command, sequence, reply: None, result: Ok(()), reset: false };
            },
        };

        self.stats.replies_delivered += 1;
        let result = self.device.on_reply(&reply, echoed);

        let mut reset = false;
        if let Err(e) = &result {
            self.stats.replies_rejected += 1;
            if e.requires_reset() {
                self.device.reset_security();
                self.stats.security_resets += 1;
                reset = true;
            }
        }

        CycleOutcome { command, sequence, reply: Some(reply), result, reset }
    }
}

impl<E: Environment> std::fmt::Debug for SimBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimBus")
            .field("device", &self.device)
            .field("peripheral", &self.peripheral)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use turnstile_core::ChannelPhase;

    use super::*;
    use crate::SimEnv;

    fn bus(use_secure_channel: bool) -> SimBus<SimEnv> {
        let config = DeviceConfig { address: 5, use_secure_channel, ..Default::default() };
        SimBus::new(SimEnv::with_seed(11), config, PeripheralConfig::default())
    }

    #[test]
    fn four_cycles_establish_secure_channel() {
        let mut bus = bus(true);
        for _ in 0..4 {
            assert!(bus.poll_cycle(Fault::None).result.is_ok());
            bus.env().advance(Duration::from_millis(200));
        }

        assert!(bus.device().is_security_established());
        assert!(bus.peripheral().is_session_confirmed());
        assert_eq!(bus.stats().cycles, 4);
    }

    #[test]
    fn dropped_reply_does_not_advance_sequence() {
        let mut bus = bus(false);
        bus.poll_cycle(Fault::None);
        assert_eq!(bus.device().sequence(), 1);

        let outcome = bus.poll_cycle(Fault::DropReply);
        assert_eq!(outcome.reply, None);
        assert_eq!(bus.device().sequence(), 1);
        assert_eq!(bus.stats().replies_dropped, 1);
    }

    #[test]
    fn wrong_sequence_is_rejected() {
        let mut bus = bus(true);
        let outcome = bus.poll_cycle(Fault::WrongSequence);
        assert!(matches!(outcome.result, Err(DeviceError::Sequence(_))));
        assert!(!outcome.reset);
        assert_eq!(bus.device().sequence(), 0);
        assert_eq!(bus.device().secure_channel_phase(), Some(ChannelPhase::Uninitialized));
    }
}
