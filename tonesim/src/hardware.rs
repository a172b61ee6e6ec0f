use std::cell::RefCell;
use std::rc::Rc;

use log::trace;

use tonedevicetraits::*;

pub const PIO_BLOCKS: u8 = 2;
pub const STATE_MACHINES_PER_BLOCK: u8 = 4;

///////////////////////////////////////////////////////////////

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct StateMachineId {
    pub block: u8,
    pub index: u8,
}

impl StateMachineId {
    fn slot(&self) -> usize {
        (self.block * STATE_MACHINES_PER_BLOCK + self.index) as usize
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PioEvent {
    Claimed { sm: StateMachineId, pin: u8 },
    Released { sm: StateMachineId },
    ClockDivisor { sm: StateMachineId, divisor: ClockDivisor },
    Cleared { sm: StateMachineId },
    Pushed { sm: StateMachineId, word: u32 },
    Enabled { sm: StateMachineId, enabled: bool },
}

#[derive(Copy, Clone, Debug, Default)]
pub struct StateMachineSim {
    pub pin: Option<u8>,
    pub enabled: bool,
    pub clkdiv: Option<ClockDivisor>,
    /// the word the program is currently looping on
    pub word: Option<u32>,
}

struct PioState {
    capacity: usize,
    machines: Vec<StateMachineSim>,
    history: Vec<PioEvent>,
}

/// PIO blocks whose state machines run the tone program.
#[derive(Clone)]
pub struct PioSim {
    state: Rc<RefCell<PioState>>,
}

impl PioSim {
    pub fn new() -> Self {
        Self::with_capacity((PIO_BLOCKS * STATE_MACHINES_PER_BLOCK) as usize)
    }

    /// Only the first `capacity` state machines can be claimed.
    pub fn with_capacity(capacity: usize) -> Self {
        let total = (PIO_BLOCKS * STATE_MACHINES_PER_BLOCK) as usize;
        Self {
            state: Rc::new(RefCell::new(PioState {
                capacity: capacity.min(total),
                machines: vec![StateMachineSim::default(); total],
                history: Vec::new(),
            })),
        }
    }

    fn record(&self, event: PioEvent) {
        trace!("pio: {:?}", event);
        self.state.borrow_mut().history.push(event);
    }

    pub fn history(&self) -> Vec<PioEvent> {
        self.state.borrow().history.clone()
    }

    pub fn clear_history(&self) {
        self.state.borrow_mut().history.clear();
    }

    pub fn machine(&self, sm: StateMachineId) -> StateMachineSim {
        self.state.borrow().machines[sm.slot()]
    }

    pub fn machine_for_pin(&self, pin: u8) -> Option<StateMachineSim> {
        self.state
            .borrow()
            .machines
            .iter()
            .find(|m| m.pin == Some(pin))
            .copied()
    }

    pub fn claimed_count(&self) -> usize {
        self.state
            .borrow()
            .machines
            .iter()
            .filter(|m| m.pin.is_some())
            .count()
    }

    pub fn pushed_words(&self) -> Vec<u32> {
        self.state
            .borrow()
            .history
            .iter()
            .filter_map(|e| match e {
                PioEvent::Pushed { word, .. } => Some(*word),
                _ => None,
            })
            .collect()
    }

    pub fn divisor_writes(&self) -> usize {
        self.state
            .borrow()
            .history
            .iter()
            .filter(|e| matches!(e, PioEvent::ClockDivisor { .. }))
            .count()
    }
}

impl Default for PioSim {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseDevice for PioSim {
    type Channel = StateMachineId;

    fn claim_channel(&mut self, pin: u8) -> Option<StateMachineId> {
        let sm = {
            let mut state = self.state.borrow_mut();
            let capacity = state.capacity;
            let slot = state.machines[..capacity]
                .iter()
                .position(|m| m.pin.is_none())?;

            state.machines[slot] = StateMachineSim {
                pin: Some(pin),
                ..Default::default()
            };
            StateMachineId {
                block: slot as u8 / STATE_MACHINES_PER_BLOCK,
                index: slot as u8 % STATE_MACHINES_PER_BLOCK,
            }
        };

        self.record(PioEvent::Claimed { sm, pin });
        Some(sm)
    }

    fn release_channel(&mut self, sm: StateMachineId) {
        self.state.borrow_mut().machines[sm.slot()] = StateMachineSim::default();
        self.record(PioEvent::Released { sm });
    }

    fn set_clock_divisor(&mut self, sm: StateMachineId, divisor: ClockDivisor) {
        self.state.borrow_mut().machines[sm.slot()].clkdiv = Some(divisor);
        self.record(PioEvent::ClockDivisor { sm, divisor });
    }

    fn clear_buffer(&mut self, sm: StateMachineId) {
        self.record(PioEvent::Cleared { sm });
    }

    fn push_word(&mut self, sm: StateMachineId, word: u32) {
        self.state.borrow_mut().machines[sm.slot()].word = Some(word);
        self.record(PioEvent::Pushed { sm, word });
    }

    fn set_enabled(&mut self, sm: StateMachineId, enabled: bool) {
        self.state.borrow_mut().machines[sm.slot()].enabled = enabled;
        self.record(PioEvent::Enabled { sm, enabled });
    }

    fn is_enabled(&self, sm: StateMachineId) -> bool {
        self.state.borrow().machines[sm.slot()].enabled
    }
}

///////////////////////////////////////////////////////////////

/// Fired by [`ClockSim::run_until`].
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SimEvent {
    Alarm { pin: u8, alarm: AlarmId },
    Tick { owner: usize, alarm: AlarmId, core: Core },
}

struct OnceAlarm {
    alarm: AlarmId,
    due_us: u64,
    pin: u8,
}

struct RepeatingAlarm {
    alarm: AlarmId,
    owner: usize,
    core: Core,
    due_us: u64,
    interval_us: u32,
}

struct Timeline {
    now_us: u64,
    next_id: u32,
    once: Vec<OnceAlarm>,
    repeating: Vec<RepeatingAlarm>,
}

impl Timeline {
    fn next_alarm(&mut self) -> AlarmId {
        self.next_id += 1;
        AlarmId(self.next_id)
    }

    /// Earliest alarm due at or before `until_us`, one-shots first on ties.
    fn pop_due(&mut self, until_us: u64) -> Option<(u64, SimEvent)> {
        let once = self
            .once
            .iter()
            .enumerate()
            .min_by_key(|(_, a)| (a.due_us, a.alarm.0))
            .map(|(i, a)| (i, a.due_us));
        let repeating = self
            .repeating
            .iter()
            .min_by_key(|r| (r.due_us, r.alarm.0))
            .map(|r| (r.due_us, r.alarm, r.owner, r.core));

        match (once, repeating) {
            (Some((i, due)), rep) if due <= until_us && rep.map_or(true, |r| due <= r.0) => {
                let alarm = self.once.remove(i);
                Some((
                    due,
                    SimEvent::Alarm {
                        pin: alarm.pin,
                        alarm: alarm.alarm,
                    },
                ))
            }
            (_, Some((due, alarm, owner, core))) if due <= until_us => {
                Some((due, SimEvent::Tick { owner, alarm, core }))
            }
            _ => None,
        }
    }

    fn apply(&mut self, alarm: AlarmId, action: TimerAction) {
        let Some(pos) = self.repeating.iter().position(|r| r.alarm == alarm) else {
            return;
        };

        match action {
            TimerAction::Continue => {
                let timer = &mut self.repeating[pos];
                timer.due_us += timer.interval_us as u64;
            }
            TimerAction::Reschedule(interval_us) => {
                let timer = &mut self.repeating[pos];
                timer.interval_us = interval_us.max(1);
                timer.due_us += timer.interval_us as u64;
            }
            TimerAction::Cancel => {
                self.repeating.remove(pos);
            }
        }
    }
}

/// Virtual microsecond clock that owns every scheduled alarm.
#[derive(Clone)]
pub struct ClockSim {
    timeline: Rc<RefCell<Timeline>>,
}

impl ClockSim {
    pub fn new() -> Self {
        Self {
            timeline: Rc::new(RefCell::new(Timeline {
                now_us: 0,
                next_id: 0,
                once: Vec::new(),
                repeating: Vec::new(),
            })),
        }
    }

    /// A timer handle whose repeating alarms are reported with `owner`.
    pub fn timer(&self, owner: usize) -> TimerSim {
        TimerSim {
            owner,
            timeline: self.timeline.clone(),
        }
    }

    pub fn now_us(&self) -> u64 {
        self.timeline.borrow().now_us
    }

    pub fn pending_once(&self) -> usize {
        self.timeline.borrow().once.len()
    }

    pub fn pending_repeating(&self) -> usize {
        self.timeline.borrow().repeating.len()
    }

    pub fn repeating_interval_us(&self, alarm: AlarmId) -> Option<u32> {
        self.timeline
            .borrow()
            .repeating
            .iter()
            .find(|r| r.alarm == alarm)
            .map(|r| r.interval_us)
    }

    pub fn repeating_core(&self, alarm: AlarmId) -> Option<Core> {
        self.timeline
            .borrow()
            .repeating
            .iter()
            .find(|r| r.alarm == alarm)
            .map(|r| r.core)
    }

    /// Fires every alarm due up to `until_us` in order, then parks the clock
    /// at `until_us`. Returns the number of events dispatched.
    ///
    /// `dispatch` runs without the timeline borrowed, so it may schedule or
    /// cancel alarms. Its result only matters for `SimEvent::Tick`.
    pub fn run_until<F>(&self, until_us: u64, mut dispatch: F) -> usize
    where
        F: FnMut(SimEvent) -> TimerAction,
    {
        let mut fired = 0;

        loop {
            let next = {
                let mut timeline = self.timeline.borrow_mut();
                let next = timeline.pop_due(until_us);
                if let Some((due, _)) = next {
                    timeline.now_us = timeline.now_us.max(due);
                }
                next
            };

            let Some((_, event)) = next else {
                break;
            };

            let action = dispatch(event);
            fired += 1;

            if let SimEvent::Tick { alarm, .. } = event {
                self.timeline.borrow_mut().apply(alarm, action);
            }
        }

        let mut timeline = self.timeline.borrow_mut();
        timeline.now_us = timeline.now_us.max(until_us);
        fired
    }

    pub fn advance_by<F>(&self, delta_us: u64, dispatch: F) -> usize
    where
        F: FnMut(SimEvent) -> TimerAction,
    {
        let until = self.now_us() + delta_us;
        self.run_until(until, dispatch)
    }
}

impl Default for ClockSim {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct TimerSim {
    owner: usize,
    timeline: Rc<RefCell<Timeline>>,
}

impl TimerDevice for TimerSim {
    fn now_ms(&self) -> u32 {
        (self.timeline.borrow().now_us / 1_000) as u32
    }

    fn schedule_once(&mut self, delay_ms: u32, pin: u8) -> Option<AlarmId> {
        let mut timeline = self.timeline.borrow_mut();
        let alarm = timeline.next_alarm();
        let due_us = timeline.now_us + delay_ms as u64 * 1_000;

        timeline.once.push(OnceAlarm { alarm, due_us, pin });
        Some(alarm)
    }

    fn cancel_once(&mut self, alarm: AlarmId) {
        self.timeline.borrow_mut().once.retain(|a| a.alarm != alarm);
    }

    fn schedule_repeating(&mut self, interval_us: u32, core: Core) -> Option<AlarmId> {
        let mut timeline = self.timeline.borrow_mut();
        let alarm = timeline.next_alarm();
        let interval_us = interval_us.max(1);
        let due_us = timeline.now_us + interval_us as u64;

        timeline.repeating.push(RepeatingAlarm {
            alarm,
            owner: self.owner,
            core,
            due_us,
            interval_us,
        });
        Some(alarm)
    }

    fn cancel_repeating(&mut self, alarm: AlarmId) {
        self.timeline
            .borrow_mut()
            .repeating
            .retain(|r| r.alarm != alarm);
    }
}

///////////////////////////////////////////////////////////////

#[derive(Clone)]
pub struct GpioSim {
    pins: Rc<RefCell<[(Option<PinMode>, PinState); GPIO_COUNT as usize]>>,
}

impl GpioSim {
    pub fn new() -> Self {
        Self {
            pins: Rc::new(RefCell::new([(None, PinState::Low); GPIO_COUNT as usize])),
        }
    }

    pub fn mode(&self, pin: u8) -> Option<PinMode> {
        self.pins.borrow()[pin as usize].0
    }

    pub fn level(&self, pin: u8) -> PinState {
        self.pins.borrow()[pin as usize].1
    }

    /// Drives a pin from outside, as a test fixture would.
    pub fn force_level(&self, pin: u8, level: PinState) {
        self.pins.borrow_mut()[pin as usize].1 = level;
    }
}

impl Default for GpioSim {
    fn default() -> Self {
        Self::new()
    }
}

impl PinDevice for GpioSim {
    fn set_pin_mode(&mut self, pin: u8, mode: PinMode) {
        self.pins.borrow_mut()[pin as usize].0 = Some(mode);
    }

    fn write_pin(&mut self, pin: u8, level: PinState) {
        self.pins.borrow_mut()[pin as usize].1 = level;
    }
}
