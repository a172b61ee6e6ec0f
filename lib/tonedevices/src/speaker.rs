use core::cell::RefCell;

use critical_section::Mutex;
use rtt_target::debug_rprintln;

use tonedevicetraits::{AlarmId, Core, TimerAction, TimerDevice, ToneDevice};

use crate::waveform::{self, Waveform};

/// Inaudible PWM carrier that the waveform modulates.
pub const CARRIER_FREQUENCY: f32 = 1_000_000.0;

pub const DEFAULT_FREQUENCY: f32 = 440.0;

/// Supply voltage seen by the speaker
const V_PEAK: f32 = 3.3;

/// Maps a linear volume to the duty cycle scale that yields the same RMS
/// voltage ratio, normalised so that full volume gives 1.0.
pub fn duty_scale_for_volume(volume: f32) -> f32 {
    if !(volume > 0.01) {
        return 0.0;
    }
    let volume = volume.min(1.0);

    let attenuation_db = 20.0 * libm::log10f(volume);
    let linear_ratio = libm::powf(10.0, attenuation_db / 20.0);

    let v_rms_max = V_PEAK * libm::sqrtf(0.5);
    let v_rms_target = v_rms_max * linear_ratio;
    let duty_cycle = (v_rms_target * v_rms_target) / (V_PEAK * V_PEAK);

    (duty_cycle * 2.0).clamp(0.0, 1.0)
}

fn lut_period_us(size: u16, freq: f32) -> u32 {
    let period = libm::roundf(1_000_000.0 / (size as f32 * freq));
    (period as u32).max(1)
}

/// `now` has reached `deadline`, tolerating wrap of the millisecond counter.
fn time_reached(now_ms: u32, deadline_ms: u32) -> bool {
    (now_ms.wrapping_sub(deadline_ms) as i32) >= 0
}

/// What the step timer should do after one lookup table step.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum StepAction {
    /// not playing, a stop raced the timer
    Idle,
    /// playback deadline has passed
    Expired,
    Retune {
        duty_cycle: f32,
        rearm_us: Option<u32>,
    },
}

/// Speaker state without any hardware attached.
#[derive(Clone, Debug)]
pub struct SpeakerState {
    waveform: Waveform,
    next_waveform: Option<Waveform>,

    audible_freq: f32,
    volume: f32,
    duty_scale: f32,
    lut_period_us: u32,

    playing: bool,
    playback_end_ms: Option<u32>,
    period_dirty: bool,
    waveform_index: u16,
}

impl SpeakerState {
    pub fn new(freq: f32, volume: f32) -> Self {
        let audible_freq = if freq > 0.0 { freq } else { DEFAULT_FREQUENCY };
        let volume = volume.clamp(0.0, 1.0);
        let waveform = waveform::SQUARE;

        Self {
            lut_period_us: lut_period_us(waveform.size(), audible_freq),
            waveform,
            next_waveform: None,
            audible_freq,
            volume,
            duty_scale: duty_scale_for_volume(volume),
            playing: false,
            playback_end_ms: None,
            period_dirty: false,
            waveform_index: 0,
        }
    }

    pub fn frequency(&self) -> f32 {
        self.audible_freq
    }
    pub fn volume(&self) -> f32 {
        self.volume
    }
    pub fn duty_scale(&self) -> f32 {
        self.duty_scale
    }
    pub fn lut_period_us(&self) -> u32 {
        self.lut_period_us
    }
    pub fn is_playing(&self) -> bool {
        self.playing
    }
    pub fn waveform(&self) -> &Waveform {
        &self.waveform
    }
    pub fn has_pending_waveform(&self) -> bool {
        self.next_waveform.is_some()
    }
    pub fn index(&self) -> u16 {
        self.waveform_index
    }
    pub fn playback_end_ms(&self) -> Option<u32> {
        self.playback_end_ms
    }

    fn refresh_lut_period(&mut self) {
        self.lut_period_us = lut_period_us(self.waveform.size(), self.audible_freq);
    }

    pub fn set_frequency(&mut self, freq: f32) {
        if !(freq > 0.0) || freq == self.audible_freq {
            return;
        }

        self.audible_freq = freq;
        self.refresh_lut_period();

        // the timer is only re-armed from its own callback
        if self.playing {
            self.period_dirty = true;
        }
    }

    pub fn set_volume(&mut self, volume: f32) {
        if volume.is_nan() || volume == self.volume {
            return;
        }

        self.volume = volume.clamp(0.0, 1.0);
        self.duty_scale = duty_scale_for_volume(self.volume);
    }

    pub fn set_waveform(&mut self, waveform: Waveform) {
        if self.playing {
            self.next_waveform = Some(waveform);
            return;
        }

        self.waveform = waveform;
        self.next_waveform = None;
        self.waveform_index &= self.waveform.mask();
        self.refresh_lut_period();
    }

    /// Sets the playback deadline, `0` plays until stopped.
    pub fn set_duration(&mut self, now_ms: u32, duration_ms: u32) {
        self.playback_end_ms = if duration_ms > 0 {
            Some(now_ms.wrapping_add(duration_ms))
        } else {
            None
        };
    }

    pub fn start(&mut self, now_ms: u32, duration_ms: u32) {
        self.playing = true;
        self.period_dirty = false;
        self.waveform_index = 0;
        self.set_duration(now_ms, duration_ms);
    }

    pub fn halt(&mut self) {
        self.playing = false;
        self.playback_end_ms = None;

        // stopped, so a pending swap has nothing left to wait for
        if let Some(next) = self.next_waveform.take() {
            self.waveform = next;
            self.waveform_index &= self.waveform.mask();
            self.refresh_lut_period();
        }
    }

    /// Advances one lookup table step.
    pub fn step(&mut self, now_ms: u32) -> StepAction {
        if !self.playing {
            return StepAction::Idle;
        }

        if let Some(end) = self.playback_end_ms {
            if time_reached(now_ms, end) {
                return StepAction::Expired;
            }
        }

        if self.waveform_index == 0 {
            if let Some(next) = self.next_waveform.take() {
                self.waveform = next;
                self.refresh_lut_period();
                self.period_dirty = true;
            }
        }

        let rearm_us = if self.period_dirty {
            self.period_dirty = false;
            Some(self.lut_period_us)
        } else {
            None
        };

        let sample = self.waveform.sample(self.waveform_index) as f32 / 255.0;
        let duty_cycle = sample.clamp(0.0, 1.0) * self.duty_scale;

        self.waveform_index = (self.waveform_index + 1) & self.waveform.mask();

        StepAction::Retune {
            duty_cycle,
            rearm_us,
        }
    }
}

struct SpeakerInner<T> {
    state: SpeakerState,
    timer: T,
    step_timer: Option<AlarmId>,
}

/// An audible tone on one pin, synthesized by modulating the duty cycle of
/// a 1 MHz carrier from a waveform table.
///
/// The step timer calls [`Speaker::on_tick`] with its alarm id once per table
/// entry, from interrupt context on the core chosen at construction.
pub struct Speaker<'a, D: ToneDevice, T: TimerDevice> {
    pin: u8,
    core: Core,
    tones: &'a D,
    inner: Mutex<RefCell<SpeakerInner<T>>>,
}

impl<'a, D: ToneDevice, T: TimerDevice> Speaker<'a, D, T> {
    pub fn new(pin: u8, core: Core, freq: f32, volume: f32, tones: &'a D, timer: T) -> Self {
        Self {
            pin,
            core,
            tones,
            inner: Mutex::new(RefCell::new(SpeakerInner {
                state: SpeakerState::new(freq, volume),
                timer,
                step_timer: None,
            })),
        }
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut SpeakerInner<T>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow(cs).borrow_mut()))
    }

    pub fn pin(&self) -> u8 {
        self.pin
    }

    pub fn core(&self) -> Core {
        self.core
    }

    pub fn frequency(&self) -> f32 {
        self.with_inner(|inner| inner.state.frequency())
    }

    pub fn volume(&self) -> f32 {
        self.with_inner(|inner| inner.state.volume())
    }

    pub fn is_playing(&self) -> bool {
        self.with_inner(|inner| inner.state.is_playing())
    }

    /// The repeating timer currently stepping this speaker.
    pub fn step_timer(&self) -> Option<AlarmId> {
        self.with_inner(|inner| inner.step_timer)
    }

    /// Copy of the current state, for inspection.
    pub fn state(&self) -> SpeakerState {
        self.with_inner(|inner| inner.state.clone())
    }

    pub fn set_frequency(&self, freq: f32) {
        self.with_inner(|inner| inner.state.set_frequency(freq));
    }

    pub fn set_volume(&self, volume: f32) {
        self.with_inner(|inner| inner.state.set_volume(volume));
    }

    /// Swaps immediately when stopped, otherwise at the end of the current cycle.
    pub fn set_waveform(&self, waveform: Waveform) {
        self.with_inner(|inner| inner.state.set_waveform(waveform));
    }

    /// Starts playing, or only moves the deadline if already playing.
    pub fn play(&self, duration_ms: u32) {
        self.with_inner(|inner| {
            let now = inner.timer.now_ms();

            if inner.state.is_playing() {
                inner.state.set_duration(now, duration_ms);
                return;
            }

            self.tones.tone(self.pin, CARRIER_FREQUENCY, 0, 0.0);

            let period = inner.state.lut_period_us();
            match inner.timer.schedule_repeating(period, self.core) {
                Some(alarm) => {
                    inner.step_timer = Some(alarm);
                    inner.state.start(now, duration_ms);
                }
                None => {
                    debug_rprintln!("speaker: no step timer for pin {}", self.pin);
                    self.tones.no_tone(self.pin);
                }
            }
        });
    }

    pub fn stop(&self) {
        self.with_inner(|inner| {
            if !inner.state.is_playing() {
                return;
            }

            inner.state.halt();

            if let Some(alarm) = inner.step_timer.take() {
                inner.timer.cancel_repeating(alarm);
            }

            self.tones.no_tone(self.pin);
        });
    }

    /// Step timer callback. Never blocks.
    pub fn on_tick(&self, alarm: AlarmId) -> TimerAction {
        self.with_inner(|inner| {
            // queued before a stop, must not drive a later play
            if inner.step_timer != Some(alarm) {
                return TimerAction::Cancel;
            }

            let now = inner.timer.now_ms();

            match inner.state.step(now) {
                StepAction::Idle => TimerAction::Cancel,
                StepAction::Expired => {
                    inner.state.halt();
                    // returning Cancel ends this timer
                    inner.step_timer = None;
                    self.tones.no_tone(self.pin);
                    TimerAction::Cancel
                }
                StepAction::Retune {
                    duty_cycle,
                    rearm_us,
                } => {
                    self.tones
                        .update_tone(self.pin, CARRIER_FREQUENCY, duty_cycle);
                    rearm_us.map_or(TimerAction::Continue, TimerAction::Reschedule)
                }
            }
        })
    }
}
