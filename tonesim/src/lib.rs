use tonedevices::{FrequencyConfig, Speaker, ToneManager};
use tonedevicetraits::{Core, TimerAction};

pub mod hardware;

use hardware::{ClockSim, GpioSim, PioSim, SimEvent, TimerSim};

pub type ToneManagerSim = ToneManager<PioSim, TimerSim, GpioSim>;
pub type SpeakerSim<'a> = Speaker<'a, ToneManagerSim, TimerSim>;

/// Owner tag for the tone manager's timer, which never registers ticks.
const TONE_MANAGER_OWNER: usize = usize::MAX;

/// Simulated board: PIO, alarms and GPIO behind one tone manager.
pub struct ToneSim {
    pub clock: ClockSim,
    pub pio: PioSim,
    pub gpio: GpioSim,
    pub tones: ToneManagerSim,
}

impl ToneSim {
    pub fn new(sys_clk_hz: u32) -> Self {
        Self::with_pio(PioSim::new(), sys_clk_hz)
    }

    pub fn with_pio(pio: PioSim, sys_clk_hz: u32) -> Self {
        let clock = ClockSim::new();
        let gpio = GpioSim::new();
        let tones = ToneManager::new(
            pio.clone(),
            clock.timer(TONE_MANAGER_OWNER),
            gpio.clone(),
            sys_clk_hz,
        );

        Self {
            clock,
            pio,
            gpio,
            tones,
        }
    }

    /// Builds a speaker whose step timer ticks are routed to `speakers[owner]`
    /// when running the clock.
    pub fn speaker(
        &self,
        owner: usize,
        pin: u8,
        core: Core,
        freq: f32,
        volume: f32,
    ) -> SpeakerSim<'_> {
        Speaker::new(pin, core, freq, volume, &self.tones, self.clock.timer(owner))
    }

    pub fn run_until(&self, until_us: u64, speakers: &[&SpeakerSim<'_>]) -> usize {
        self.clock.run_until(until_us, |event| match event {
            SimEvent::Alarm { pin, alarm } => {
                self.tones.handle_alarm(pin, alarm);
                TimerAction::Continue
            }
            SimEvent::Tick { owner, alarm, .. } => match speakers.get(owner) {
                Some(speaker) => speaker.on_tick(alarm),
                None => TimerAction::Cancel,
            },
        })
    }

    pub fn advance_us(&self, delta_us: u64, speakers: &[&SpeakerSim<'_>]) -> usize {
        self.run_until(self.clock.now_us() + delta_us, speakers)
    }

    pub fn advance_ms(&self, delta_ms: u32, speakers: &[&SpeakerSim<'_>]) -> usize {
        self.advance_us(delta_ms as u64 * 1_000, speakers)
    }

    /// What the state machine bound to `pin` is currently generating.
    pub fn output(&self, pin: u8) -> Option<FrequencyConfig> {
        let machine = self.pio.machine_for_pin(pin)?;
        if !machine.enabled {
            return None;
        }

        Some(FrequencyConfig {
            clkdiv: machine.clkdiv?,
            packed_value: machine.word?,
        })
    }
}
