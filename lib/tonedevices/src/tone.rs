use core::cell::RefCell;
use core::fmt;

use critical_section::Mutex;
use heapless::LinearMap;
use rtt_target::debug_rprintln;

use tonedevicetraits::{
    AlarmId, ClockDivisor, PinDevice, PinMode, PinState, PulseDevice, TimerDevice, ToneDevice,
    GPIO_COUNT,
};

use crate::frequency::{self, EncodeError, FrequencyConfig};

/// PIO blocks * state machines per block on the RP2040.
pub const MAX_TONE_CHANNELS: usize = 8;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ToneError {
    InvalidPin,
    Rejected(EncodeError),
    NoFreeChannel,
    RegistryFull,
    NotPlaying,
    /// an alarm fired after it was cancelled or replaced
    StaleAlarm,
}

impl From<EncodeError> for ToneError {
    fn from(err: EncodeError) -> Self {
        ToneError::Rejected(err)
    }
}

impl fmt::Display for ToneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToneError::InvalidPin => write!(f, "invalid pin"),
            ToneError::Rejected(err) => write!(f, "rejected: {}", err),
            ToneError::NoFreeChannel => write!(f, "no free pulse channel"),
            ToneError::RegistryFull => write!(f, "tone registry full"),
            ToneError::NotPlaying => write!(f, "pin is not playing"),
            ToneError::StaleAlarm => write!(f, "stale alarm"),
        }
    }
}

/// A claimed pulse channel bound to one pin.
#[derive(Copy, Clone, Debug)]
pub struct ToneChannel<C> {
    pin: u8,
    channel: C,
    clkdiv: ClockDivisor,
    alarm: Option<AlarmId>,
}

impl<C: Copy> ToneChannel<C> {
    pub fn pin(&self) -> u8 {
        self.pin
    }
    pub fn channel(&self) -> C {
        self.channel
    }
    pub fn clkdiv(&self) -> ClockDivisor {
        self.clkdiv
    }
    pub fn alarm(&self) -> Option<AlarmId> {
        self.alarm
    }
}

struct Registry<P: PulseDevice, T, G, const N: usize> {
    pulse: P,
    timer: T,
    pins: G,
    sys_clk_hz: u32,
    channels: LinearMap<u8, ToneChannel<P::Channel>, N>,
}

impl<P, T, G, const N: usize> Registry<P, T, G, N>
where
    P: PulseDevice,
    T: TimerDevice,
    G: PinDevice,
{
    fn start(
        &mut self,
        pin: u8,
        freq: f32,
        duration_ms: u32,
        duty_cycle: f32,
    ) -> Result<(), ToneError> {
        let config = frequency::encode(freq, duty_cycle, self.sys_clk_hz)?;

        if !self.channels.contains_key(&pin) {
            self.pins.set_pin_mode(pin, PinMode::Output);

            let channel = self
                .pulse
                .claim_channel(pin)
                .ok_or(ToneError::NoFreeChannel)?;
            self.pulse.set_enabled(channel, false);

            let tone = ToneChannel {
                pin,
                channel,
                clkdiv: ClockDivisor::ONE,
                alarm: None,
            };
            if self.channels.insert(pin, tone).is_err() {
                self.pulse.release_channel(channel);
                return Err(ToneError::RegistryFull);
            }
        }

        let Registry {
            pulse,
            timer,
            channels,
            ..
        } = self;
        let tone = channels.get_mut(&pin).ok_or(ToneError::NotPlaying)?;

        if let Some(alarm) = tone.alarm.take() {
            timer.cancel_once(alarm);
        }

        if !pulse.is_enabled(tone.channel) {
            tone.clkdiv = config.clkdiv;
            pulse.set_clock_divisor(tone.channel, config.clkdiv);
        } else if tone.clkdiv != config.clkdiv {
            tone.clkdiv = config.clkdiv;
            pulse.set_clock_divisor(tone.channel, config.clkdiv);
        }

        pulse.clear_buffer(tone.channel);
        pulse.push_word(tone.channel, config.packed_value);
        pulse.set_enabled(tone.channel, true);

        if duration_ms > 0 {
            tone.alarm = timer.schedule_once(duration_ms, pin);
        }

        Ok(())
    }

    fn update(&mut self, pin: u8, freq: f32, duty_cycle: f32) -> Result<(), ToneError> {
        let tone = self.channels.get_mut(&pin).ok_or(ToneError::NotPlaying)?;
        let config: FrequencyConfig = frequency::encode(freq, duty_cycle, self.sys_clk_hz)?;

        // skipping an unchanged divisor avoids an audible restart of the clock
        if tone.clkdiv != config.clkdiv {
            tone.clkdiv = config.clkdiv;
            self.pulse.set_clock_divisor(tone.channel, config.clkdiv);
        }

        self.pulse.clear_buffer(tone.channel);
        self.pulse.push_word(tone.channel, config.packed_value);

        Ok(())
    }

    fn stop(&mut self, pin: u8) -> Result<(), ToneError> {
        let tone = self.channels.remove(&pin).ok_or(ToneError::NotPlaying)?;

        // cancel before the channel can be handed to another pin
        if let Some(alarm) = tone.alarm {
            self.timer.cancel_once(alarm);
        }

        self.pulse.set_enabled(tone.channel, false);
        self.pulse.release_channel(tone.channel);

        self.pins.set_pin_mode(pin, PinMode::Output);
        self.pins.write_pin(pin, PinState::Low);

        Ok(())
    }

    fn expire(&mut self, pin: u8, alarm: AlarmId) -> Result<(), ToneError> {
        let tone = self.channels.get_mut(&pin).ok_or(ToneError::StaleAlarm)?;
        if tone.alarm != Some(alarm) {
            return Err(ToneError::StaleAlarm);
        }

        // already fired, nothing left to cancel
        tone.alarm = None;
        self.stop(pin)
    }
}

/// Square wave tones on any pin, one pulse channel per playing pin.
///
/// All operations on all pins are serialized by a single critical section,
/// so a `static` instance can be shared between thread mode, both cores and
/// timer interrupts. Every operation is short and never blocks.
pub struct ToneManager<P: PulseDevice, T, G, const N: usize = MAX_TONE_CHANNELS> {
    registry: Mutex<RefCell<Registry<P, T, G, N>>>,
}

impl<P, T, G, const N: usize> ToneManager<P, T, G, N>
where
    P: PulseDevice,
    T: TimerDevice,
    G: PinDevice,
{
    pub const fn new(pulse: P, timer: T, pins: G, sys_clk_hz: u32) -> Self {
        Self {
            registry: Mutex::new(RefCell::new(Registry {
                pulse,
                timer,
                pins,
                sys_clk_hz,
                channels: LinearMap::new(),
            })),
        }
    }

    pub fn try_start_tone(
        &self,
        pin: u8,
        freq: f32,
        duration_ms: u32,
        duty_cycle: f32,
    ) -> Result<(), ToneError> {
        if pin >= GPIO_COUNT {
            return Err(ToneError::InvalidPin);
        }

        if freq <= 0.0 {
            return match self.try_stop_tone(pin) {
                Err(ToneError::NotPlaying) => Ok(()),
                res => res,
            };
        }

        critical_section::with(|cs| {
            self.registry
                .borrow(cs)
                .borrow_mut()
                .start(pin, freq, duration_ms, duty_cycle)
        })
    }

    pub fn try_update_tone(&self, pin: u8, freq: f32, duty_cycle: f32) -> Result<(), ToneError> {
        if pin >= GPIO_COUNT {
            return Err(ToneError::InvalidPin);
        }

        critical_section::with(|cs| {
            self.registry
                .borrow(cs)
                .borrow_mut()
                .update(pin, freq, duty_cycle)
        })
    }

    pub fn try_stop_tone(&self, pin: u8) -> Result<(), ToneError> {
        if pin >= GPIO_COUNT {
            return Err(ToneError::InvalidPin);
        }

        critical_section::with(|cs| self.registry.borrow(cs).borrow_mut().stop(pin))
    }

    /// Called by the timer when the one-shot alarm scheduled for `pin` fires.
    pub fn handle_alarm(&self, pin: u8, alarm: AlarmId) {
        let res = critical_section::with(|cs| {
            self.registry.borrow(cs).borrow_mut().expire(pin, alarm)
        });

        if let Err(err) = res {
            debug_rprintln!("tone: alarm {:?} on pin {}: {}", alarm.0, pin, err);
        }
    }

    pub fn is_playing(&self, pin: u8) -> bool {
        critical_section::with(|cs| self.registry.borrow(cs).borrow().channels.contains_key(&pin))
    }

    pub fn channel(&self, pin: u8) -> Option<ToneChannel<P::Channel>> {
        critical_section::with(|cs| self.registry.borrow(cs).borrow().channels.get(&pin).copied())
    }

    pub fn active_count(&self) -> usize {
        critical_section::with(|cs| self.registry.borrow(cs).borrow().channels.len())
    }

    pub fn sys_clk_hz(&self) -> u32 {
        critical_section::with(|cs| self.registry.borrow(cs).borrow().sys_clk_hz)
    }
}

impl<P, T, G, const N: usize> ToneDevice for ToneManager<P, T, G, N>
where
    P: PulseDevice,
    T: TimerDevice,
    G: PinDevice,
{
    fn tone(&self, pin: u8, freq: f32, duration_ms: u32, duty_cycle: f32) {
        if let Err(err) = self.try_start_tone(pin, freq, duration_ms, duty_cycle) {
            debug_rprintln!("tone: start pin {} at {} Hz: {}", pin, freq, err);
        }
    }

    fn update_tone(&self, pin: u8, freq: f32, duty_cycle: f32) {
        // runs once per speaker step, stay quiet here
        let _ = self.try_update_tone(pin, freq, duty_cycle);
    }

    fn no_tone(&self, pin: u8) {
        match self.try_stop_tone(pin) {
            Ok(()) | Err(ToneError::NotPlaying) => {}
            Err(err) => debug_rprintln!("tone: stop pin {}: {}", pin, err),
        }
    }
}
