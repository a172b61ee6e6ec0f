use tonedevices::{EncodeError, ToneError, ToneManager, DEFAULT_SYS_CLK_HZ};
use tonedevicetraits::{PinMode, PinState, ToneDevice};
use tonesim::hardware::{ClockSim, GpioSim, PioSim, TimerSim};
use tonesim::ToneSim;

const PIN: u8 = 8;

#[test]
fn test_tone_plays_then_stops_itself() {
    let sim = ToneSim::new(DEFAULT_SYS_CLK_HZ);

    sim.tones.try_start_tone(PIN, 440.0, 100, 0.5).unwrap();
    assert!(sim.tones.is_playing(PIN));
    assert_eq!(1, sim.pio.claimed_count());
    assert_eq!(1, sim.clock.pending_once());
    assert_eq!(Some(PinMode::Output), sim.gpio.mode(PIN));

    let channel = sim.tones.channel(PIN).unwrap();
    assert_eq!(PIN, channel.pin());
    let machine = sim.pio.machine(channel.channel());
    assert!(machine.enabled);
    assert_eq!(Some(PIN), machine.pin);
    assert_eq!(Some(channel.clkdiv()), machine.clkdiv);

    let output = sim.output(PIN).unwrap();
    assert!((output.frequency(DEFAULT_SYS_CLK_HZ) - 440.0).abs() < 0.05);
    assert!((output.duty_cycle() - 0.5).abs() < 0.01);

    sim.advance_ms(99, &[]);
    assert!(sim.tones.is_playing(PIN));

    sim.advance_ms(1, &[]);
    assert!(!sim.tones.is_playing(PIN));
    assert!(!sim.pio.machine(channel.channel()).enabled);
    assert_eq!(0, sim.pio.claimed_count());
    assert_eq!(None, sim.output(PIN));
    assert_eq!(PinState::Low, sim.gpio.level(PIN));

    // stopping again is harmless
    assert_eq!(Err(ToneError::NotPlaying), sim.tones.try_stop_tone(PIN));
    sim.tones.no_tone(PIN);
    assert_eq!(0, sim.tones.active_count());
}

#[test]
fn test_stop_drives_pin_low() {
    let sim = ToneSim::new(DEFAULT_SYS_CLK_HZ);
    sim.gpio.force_level(PIN, PinState::High);

    sim.tones.tone(PIN, 1_000.0, 0, 0.5);
    sim.tones.no_tone(PIN);

    assert_eq!(Some(PinMode::Output), sim.gpio.mode(PIN));
    assert_eq!(PinState::Low, sim.gpio.level(PIN));
}

#[test]
fn test_no_free_channel() {
    let sim = ToneSim::with_pio(PioSim::with_capacity(2), DEFAULT_SYS_CLK_HZ);

    sim.tones.try_start_tone(2, 440.0, 0, 0.5).unwrap();
    sim.tones.try_start_tone(3, 880.0, 0, 0.5).unwrap();
    assert_eq!(
        Err(ToneError::NoFreeChannel),
        sim.tones.try_start_tone(4, 440.0, 0, 0.5)
    );
    assert!(!sim.tones.is_playing(4));

    // retuning a pin that already owns a channel still works
    sim.tones.try_start_tone(3, 1_000.0, 0, 0.5).unwrap();

    sim.tones.try_stop_tone(2).unwrap();
    sim.tones.try_start_tone(4, 440.0, 0, 0.5).unwrap();
    assert!(sim.tones.is_playing(4));
    assert_eq!(2, sim.pio.claimed_count());
}

#[test]
fn test_registry_full_releases_channel() {
    let clock = ClockSim::new();
    let pio = PioSim::new();
    let tones: ToneManager<PioSim, TimerSim, GpioSim, 2> =
        ToneManager::new(pio.clone(), clock.timer(0), GpioSim::new(), DEFAULT_SYS_CLK_HZ);

    tones.try_start_tone(1, 440.0, 0, 0.5).unwrap();
    tones.try_start_tone(2, 440.0, 0, 0.5).unwrap();
    assert_eq!(
        Err(ToneError::RegistryFull),
        tones.try_start_tone(3, 440.0, 0, 0.5)
    );
    assert_eq!(2, pio.claimed_count());
    assert_eq!(2, tones.active_count());
}

#[test]
fn test_divisor_only_written_on_change() {
    let sim = ToneSim::new(DEFAULT_SYS_CLK_HZ);

    sim.tones.try_start_tone(PIN, 440.0, 0, 0.5).unwrap();
    assert_eq!(1, sim.pio.divisor_writes());
    let divisor = sim.tones.channel(PIN).unwrap().clkdiv();

    // same frequency, new duty: only the word changes
    sim.tones.try_update_tone(PIN, 440.0, 0.25).unwrap();
    assert_eq!(1, sim.pio.divisor_writes());
    assert_eq!(2, sim.pio.pushed_words().len());
    assert_eq!(divisor, sim.tones.channel(PIN).unwrap().clkdiv());
    assert!((sim.output(PIN).unwrap().duty_cycle() - 0.25).abs() < 0.01);

    sim.tones.try_update_tone(PIN, 1_000.0, 0.5).unwrap();
    assert_eq!(2, sim.pio.divisor_writes());

    sim.tones.try_update_tone(PIN, 10_000.0, 0.5).unwrap();
    assert_eq!(3, sim.pio.divisor_writes());

    // restarting an enabled channel at the same divisor skips the write too
    sim.tones.try_start_tone(PIN, 12_000.0, 0, 0.5).unwrap();
    assert_eq!(3, sim.pio.divisor_writes());
    assert_eq!(1, sim.pio.claimed_count());
}

#[test]
fn test_update_unbound_pin_is_noop() {
    let sim = ToneSim::new(DEFAULT_SYS_CLK_HZ);

    assert_eq!(
        Err(ToneError::NotPlaying),
        sim.tones.try_update_tone(5, 440.0, 0.5)
    );
    sim.tones.update_tone(5, 440.0, 0.5);

    assert!(sim.pio.history().is_empty());
    assert!(!sim.tones.is_playing(5));
}

#[test]
fn test_zero_frequency_stops() {
    let sim = ToneSim::new(DEFAULT_SYS_CLK_HZ);

    sim.tones.try_start_tone(PIN, 440.0, 0, 0.5).unwrap();
    assert_eq!(Ok(()), sim.tones.try_start_tone(PIN, 0.0, 0, 0.5));
    assert!(!sim.tones.is_playing(PIN));

    assert_eq!(Ok(()), sim.tones.try_start_tone(PIN, -20.0, 0, 0.5));
    assert_eq!(0, sim.pio.claimed_count());
}

#[test]
fn test_restart_replaces_pending_alarm() {
    let sim = ToneSim::new(DEFAULT_SYS_CLK_HZ);

    sim.tones.try_start_tone(PIN, 440.0, 100, 0.5).unwrap();
    sim.advance_ms(50, &[]);

    sim.tones.try_start_tone(PIN, 880.0, 0, 0.5).unwrap();
    assert_eq!(0, sim.clock.pending_once());
    assert_eq!(None, sim.tones.channel(PIN).unwrap().alarm());

    sim.advance_ms(200, &[]);
    assert!(sim.tones.is_playing(PIN));

    // a new duration counts from the restart
    sim.tones.try_start_tone(PIN, 440.0, 100, 0.5).unwrap();
    assert_eq!(1, sim.clock.pending_once());
    sim.advance_ms(99, &[]);
    assert!(sim.tones.is_playing(PIN));
    sim.advance_ms(1, &[]);
    assert!(!sim.tones.is_playing(PIN));
}

#[test]
fn test_stop_cancels_alarm() {
    let sim = ToneSim::new(DEFAULT_SYS_CLK_HZ);

    sim.tones.try_start_tone(PIN, 440.0, 100, 0.5).unwrap();
    sim.tones.try_stop_tone(PIN).unwrap();
    assert_eq!(0, sim.clock.pending_once());

    sim.tones.try_start_tone(PIN, 440.0, 0, 0.5).unwrap();
    sim.advance_ms(500, &[]);
    assert!(sim.tones.is_playing(PIN));
}

#[test]
fn test_stale_alarm_is_ignored() {
    let sim = ToneSim::new(DEFAULT_SYS_CLK_HZ);

    sim.tones.try_start_tone(PIN, 440.0, 100, 0.5).unwrap();
    let stale = sim.tones.channel(PIN).unwrap().alarm().unwrap();

    sim.tones.try_stop_tone(PIN).unwrap();
    sim.tones.handle_alarm(PIN, stale);

    sim.tones.try_start_tone(PIN, 440.0, 0, 0.5).unwrap();
    sim.tones.handle_alarm(PIN, stale);
    assert!(sim.tones.is_playing(PIN));

    sim.tones.try_start_tone(PIN, 440.0, 100, 0.5).unwrap();
    sim.tones.handle_alarm(PIN, stale);
    assert!(sim.tones.is_playing(PIN));
}

#[test]
fn test_invalid_pin() {
    let sim = ToneSim::new(DEFAULT_SYS_CLK_HZ);

    assert_eq!(
        Err(ToneError::InvalidPin),
        sim.tones.try_start_tone(30, 440.0, 0, 0.5)
    );
    assert_eq!(Err(ToneError::InvalidPin), sim.tones.try_stop_tone(200));
    assert_eq!(
        Err(ToneError::InvalidPin),
        sim.tones.try_update_tone(255, 440.0, 0.5)
    );

    sim.tones.tone(30, 440.0, 0, 0.5);
    sim.tones.no_tone(30);
    assert!(sim.pio.history().is_empty());
}

#[test]
fn test_rejected_frequency_claims_nothing() {
    let sim = ToneSim::new(DEFAULT_SYS_CLK_HZ);

    assert_eq!(
        Err(ToneError::Rejected(EncodeError::FrequencyTooHigh)),
        sim.tones.try_start_tone(PIN, 20_000_000.0, 0, 0.5)
    );
    assert_eq!(
        Err(ToneError::Rejected(EncodeError::FrequencyTooLow)),
        sim.tones.try_start_tone(PIN, 0.001, 0, 0.5)
    );
    assert_eq!(0, sim.pio.claimed_count());

    // a bad retune leaves the running tone alone
    sim.tones.try_start_tone(PIN, 440.0, 0, 0.5).unwrap();
    let before = sim.output(PIN);
    assert!(sim.tones.try_update_tone(PIN, 20_000_000.0, 0.5).is_err());
    assert_eq!(before, sim.output(PIN));
}

#[test]
fn test_pins_are_independent() {
    let sim = ToneSim::new(DEFAULT_SYS_CLK_HZ);

    sim.tones.try_start_tone(8, 440.0, 0, 0.5).unwrap();
    sim.tones.try_start_tone(9, 2_000.0, 50, 0.25).unwrap();
    assert_eq!(2, sim.tones.active_count());

    sim.advance_ms(50, &[]);
    assert!(sim.tones.is_playing(8));
    assert!(!sim.tones.is_playing(9));

    let output = sim.output(8).unwrap();
    assert!((output.frequency(sim.tones.sys_clk_hz()) - 440.0).abs() < 0.05);
}
