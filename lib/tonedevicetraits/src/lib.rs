#![no_std]

use core::fmt;

pub use embedded_hal::digital::v2::PinState;

/// Number of user GPIOs on the target (RP2040 bank 0).
pub const GPIO_COUNT: u8 = 30;

#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PinMode {
    Input = 0,
    Output = 1,
}

pub trait PinDevice {
    fn set_pin_mode(&mut self, pin: u8, mode: PinMode);
    fn write_pin(&mut self, pin: u8, level: PinState);
}

/// Clock divisor in the PIO's 16.8 fixed point format.
///
/// Stored as `divisor * 256`, so the valid range is `256..=65536 * 256`.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
pub struct ClockDivisor(u32);

impl ClockDivisor {
    pub const ONE: ClockDivisor = ClockDivisor(1 << 8);
    pub const MAX: ClockDivisor = ClockDivisor(65536 << 8);

    /// Builds a divisor from its raw `divisor * 256` value, `None` if out of range.
    pub const fn from_raw(raw: u32) -> Option<ClockDivisor> {
        if raw < Self::ONE.0 || raw > Self::MAX.0 {
            None
        } else {
            Some(ClockDivisor(raw))
        }
    }

    pub const fn raw(&self) -> u32 {
        self.0
    }

    pub const fn frac_bits(&self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

impl fmt::Display for ClockDivisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}/256", self.0 >> 8, self.frac_bits())
    }
}

/// A pulse generator peripheral (PIO state machines) that plays one packed
/// high/low phase word per period.
pub trait PulseDevice {
    type Channel: Copy + Eq + fmt::Debug;

    fn claim_channel(&mut self, pin: u8) -> Option<Self::Channel>;
    fn release_channel(&mut self, channel: Self::Channel);
    fn set_clock_divisor(&mut self, channel: Self::Channel, divisor: ClockDivisor);
    fn clear_buffer(&mut self, channel: Self::Channel);
    fn push_word(&mut self, channel: Self::Channel, word: u32);
    fn set_enabled(&mut self, channel: Self::Channel, enabled: bool);
    fn is_enabled(&self, channel: Self::Channel) -> bool;
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct AlarmId(pub u32);

#[repr(u8)]
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Core {
    Core0 = 0,
    Core1 = 1,
}

/// Returned by a repeating timer callback to tell the timer what to do next.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum TimerAction {
    Continue,
    /// keep firing, with a new interval in microseconds
    Reschedule(u32),
    Cancel,
}

pub trait TimerDevice {
    fn now_ms(&self) -> u32;

    /// One-shot alarm, reported back to the owner together with `pin`.
    fn schedule_once(&mut self, delay_ms: u32, pin: u8) -> Option<AlarmId>;
    fn cancel_once(&mut self, alarm: AlarmId);

    fn schedule_repeating(&mut self, interval_us: u32, core: Core) -> Option<AlarmId>;
    fn cancel_repeating(&mut self, alarm: AlarmId);
}

pub static TONE_NOTES: [u32; 80] = [
    55, 58, 62, 65, 69, 73, 78, 82, 87, 93, 98, 104, 110, 117, 123, 131, 139, 147, 156, 165, 175,
    185, 196, 208, 220, 233, 247, 262, 277, 294, 311, 330, 349, 370, 392, 415, 440, 466, 494, 523,
    554, 587, 622, 659, 698, 740, 784, 831, 880, 932, 988, 1047, 1109, 1175, 1245, 1319, 1397,
    1480, 1568, 1661, 1760, 1865, 1976, 2093, 2217, 2349, 2489, 2637, 2794, 2960, 3136, 3322, 3520,
    3729, 3951, 4186, 4435, 4699, 4978, 5274,
];

/// Raw square wave tones on a pin.
pub trait ToneDevice {
    /// Starts or retunes a tone. `duration_ms == 0` plays until `no_tone`.
    fn tone(&self, pin: u8, freq: f32, duration_ms: u32, duty_cycle: f32);
    /// Retunes a pin that is already playing, without touching channel setup.
    fn update_tone(&self, pin: u8, freq: f32, duty_cycle: f32);
    fn no_tone(&self, pin: u8);
}
