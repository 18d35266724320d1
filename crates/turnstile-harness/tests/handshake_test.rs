//! End-to-end secure channel tests.
//!
//! A controller-side `Device` and a `SimPeripheral` derive their session
//! independently from the same base key; every check here is that the two
//! sides agree on what went over the wire.

use std::time::Duration;

use turnstile_core::{
    ApplicationCommand, ChannelPhase, Command, CryptoError, DeviceConfig, DeviceError, Reply,
    SecureChannelKey,
};
use turnstile_harness::{Fault, PeripheralConfig, SimBus, SimEnv};

fn secure_bus(seed: u64) -> SimBus<SimEnv> {
    let config = DeviceConfig { address: 5, ..Default::default() };
    SimBus::new(SimEnv::with_seed(seed), config, PeripheralConfig::default())
}

fn establish(bus: &mut SimBus<SimEnv>) {
    for _ in 0..3 {
        let outcome = bus.poll_cycle(Fault::None);
        assert!(outcome.result.is_ok(), "handshake step failed: {outcome:?}");
    }
    assert!(bus.device().is_security_established());
}

#[test]
fn handshake_then_application_command() {
    let mut bus = secure_bus(42);
    let command = ApplicationCommand::new(5, 0x6A, vec![0x01, 0x02, 0x03]);
    bus.device_mut().send_command(command.clone());

    // Cycle 1: bootstrap poll, peer echoes sequence 1.
    let outcome = bus.poll_cycle(Fault::None);
    assert_eq!(outcome.command, Command::Poll { address: 5 });
    assert_eq!(outcome.sequence, 1);
    assert_eq!(outcome.reply, Some(Reply::Ack));
    assert_eq!(bus.device().sequence(), 1);

    // Cycle 2: challenge preempts the queued command.
    let outcome = bus.poll_cycle(Fault::None);
    let Command::SecurityInitializationRequest { address, default_key, .. } = outcome.command
    else {
        panic!("expected challenge, got {:?}", outcome.command);
    };
    assert_eq!(address, 5);
    assert!(default_key);
    assert_eq!(bus.device().secure_channel_phase(), Some(ChannelPhase::Initialized));
    assert_eq!(bus.device().pending_commands(), 1);

    // Cycle 3: server cryptogram, peer accepts and returns the initial R-MAC.
    let outcome = bus.poll_cycle(Fault::None);
    assert!(matches!(outcome.command, Command::ServerCryptogramConfirm { address: 5, .. }));
    assert!(matches!(outcome.reply, Some(Reply::InitialRMac { accepted: true, .. })));
    assert!(bus.device().is_security_established());

    // Cycle 4: the queued command finally goes out. Sequence wrapped 3 -> 1.
    let outcome = bus.poll_cycle(Fault::None);
    assert_eq!(outcome.command, Command::Application(command.clone()));
    assert_eq!(outcome.sequence, 1);
    assert_eq!(bus.peripheral().received(), &[command]);
    assert_eq!(bus.device().pending_commands(), 0);

    // Cycle 5: nothing left, keep-alive poll.
    let outcome = bus.poll_cycle(Fault::None);
    assert_eq!(outcome.command, Command::Poll { address: 5 });
    assert_eq!(outcome.sequence, 2);
}

#[test]
fn mac_chain_agrees_with_peripheral() {
    let mut bus = secure_bus(7);
    establish(&mut bus);

    for round in 0u8..4 {
        let command = [round; 21];
        let ours = bus.device_mut().generate_mac(&command, true).unwrap();
        let theirs = bus.peripheral_mut().mac(&command, true).unwrap();
        assert_eq!(ours, theirs, "command MAC diverged in round {round}");

        let reply = vec![round ^ 0xFF; usize::from(round) * 7];
        let theirs = bus.peripheral_mut().mac(&reply, false).unwrap();
        let ours = bus.device_mut().generate_mac(&reply, false).unwrap();
        assert_eq!(ours, theirs, "reply MAC diverged in round {round}");
    }
}

#[test]
fn encrypted_data_crosses_both_directions() {
    let mut bus = secure_bus(9);
    establish(&mut bus);

    bus.device_mut().generate_mac(b"command header", true).unwrap();
    bus.peripheral_mut().mac(b"command header", true).unwrap();
    bus.peripheral_mut().mac(b"reply header", false).unwrap();
    bus.device_mut().generate_mac(b"reply header", false).unwrap();

    let plaintext = b"open door 3 for 5 seconds";
    let ciphertext = bus.device().encrypt_data(plaintext).unwrap();
    assert_eq!(ciphertext.len() % 16, 0);
    assert_eq!(bus.peripheral_mut().decrypt_command(&ciphertext).unwrap(), plaintext);

    let reply = [0x10u8; 16];
    let ciphertext = bus.peripheral_mut().encrypt_reply(&reply).unwrap();
    assert_eq!(ciphertext.len(), 32, "block-aligned input gains a pad block");
    assert_eq!(bus.device().decrypt_data(&ciphertext).unwrap(), reply);
}

#[test]
fn custom_key_on_both_sides() {
    let key = SecureChannelKey::new(*b"0123456789abcdef");
    let device = DeviceConfig {
        address: 9,
        secure_channel_key: Some(key.clone()),
        ..Default::default()
    };
    let peripheral = PeripheralConfig { key, ..Default::default() };
    let mut bus = SimBus::new(SimEnv::with_seed(1), device, peripheral);

    bus.poll_cycle(Fault::None);
    let outcome = bus.poll_cycle(Fault::None);
    assert!(matches!(
        outcome.command,
        Command::SecurityInitializationRequest { default_key: false, .. }
    ));

    bus.poll_cycle(Fault::None);
    assert!(bus.device().is_security_established());
}

#[test]
fn mismatched_keys_never_establish() {
    let device = DeviceConfig { address: 2, ..Default::default() };
    let peripheral =
        PeripheralConfig { key: SecureChannelKey::new([0x42; 16]), ..Default::default() };
    let mut bus = SimBus::new(SimEnv::with_seed(3), device, peripheral);

    bus.poll_cycle(Fault::None);
    let outcome = bus.poll_cycle(Fault::None);
    assert_eq!(outcome.result, Err(DeviceError::Crypto(CryptoError::ClientCryptogramMismatch)));
    assert!(outcome.reset);

    for _ in 0..10 {
        let outcome = bus.poll_cycle(Fault::None);
        assert!(outcome.command.is_handshake());
        assert!(!bus.device().is_security_established());
    }
}

#[test]
fn rejected_cryptogram_resets_and_retries() {
    let device = DeviceConfig { address: 4, ..Default::default() };
    let peripheral = PeripheralConfig { reject_cryptogram: true, ..Default::default() };
    let mut bus = SimBus::new(SimEnv::with_seed(5), device, peripheral);

    bus.poll_cycle(Fault::None);
    bus.poll_cycle(Fault::None);
    let outcome = bus.poll_cycle(Fault::None);

    assert!(matches!(outcome.reply, Some(Reply::InitialRMac { accepted: false, .. })));
    assert_eq!(outcome.result, Err(DeviceError::Crypto(CryptoError::CryptogramRejected)));
    assert!(outcome.reset);
    assert_eq!(bus.device().secure_channel_phase(), Some(ChannelPhase::Uninitialized));

    // The next cycle starts over with a fresh challenge.
    let outcome = bus.poll_cycle(Fault::None);
    assert!(matches!(outcome.command, Command::SecurityInitializationRequest { .. }));
    assert_eq!(bus.stats().security_resets, 1);
}

#[test]
fn plain_peripheral_never_sees_a_challenge() {
    let device = DeviceConfig { address: 1, use_secure_channel: false, ..Default::default() };
    let peripheral = PeripheralConfig { supports_secure_channel: false, ..Default::default() };
    let mut bus = SimBus::new(SimEnv::with_seed(8), device, peripheral);

    for i in 0u8..6 {
        bus.device_mut().send_command(ApplicationCommand::new(1, 0x69, vec![i]));
    }

    for _ in 0..20 {
        let outcome = bus.poll_cycle(Fault::None);
        assert!(!outcome.command.is_handshake());
        assert!(outcome.result.is_ok());
        bus.env().advance(Duration::from_millis(100));
    }

    assert_eq!(bus.peripheral().received().len(), 6);
    assert!(bus.device().is_online());
    assert_eq!(bus.device().control_byte() & 0x08, 0);
}
