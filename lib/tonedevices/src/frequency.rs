use core::fmt;

use tonedevicetraits::ClockDivisor;

// pull, mov, out, mov, set, set, mov, mov (8 instructions) + 1 cycle at the
// closing jmp. The high and low loops add phase + 1 cycles each.
pub const PIO_INSTRUCTION_OVERHEAD: u32 = 9;
pub const MIN_PHASE_CYCLES: u32 = 1;
pub const MAX_PHASE_VALUE: u32 = 0xFFFF;
pub const MAX_REPRESENTABLE_CYCLES: u32 =
    PIO_INSTRUCTION_OVERHEAD + MAX_PHASE_VALUE + MIN_PHASE_CYCLES;

pub const DEFAULT_SYS_CLK_HZ: u32 = 125_000_000;

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum EncodeError {
    InvalidFrequency,
    /// the clock divisor would have to exceed 65536
    FrequencyTooLow,
    /// a period is no longer than the fixed instruction overhead
    FrequencyTooHigh,
    InsufficientCycles,
    PhaseOverflow,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::InvalidFrequency => write!(f, "frequency must be positive"),
            EncodeError::FrequencyTooLow => write!(f, "frequency too low"),
            EncodeError::FrequencyTooHigh => write!(f, "frequency too high"),
            EncodeError::InsufficientCycles => write!(f, "not enough cycles for both phases"),
            EncodeError::PhaseOverflow => write!(f, "phase does not fit in 16 bits"),
        }
    }
}

/// Clock divisor and the packed phase word for one frequency/duty request.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct FrequencyConfig {
    pub clkdiv: ClockDivisor,
    /// `(high - MIN_PHASE) << 16 | (low - MIN_PHASE)`
    pub packed_value: u32,
}

impl FrequencyConfig {
    pub fn high_cycles(&self) -> u32 {
        (self.packed_value >> 16) + MIN_PHASE_CYCLES
    }

    pub fn low_cycles(&self) -> u32 {
        (self.packed_value & 0xFFFF) + MIN_PHASE_CYCLES
    }

    /// Length of one output period in divided clock cycles.
    pub fn period_cycles(&self) -> u32 {
        self.high_cycles() + self.low_cycles() + PIO_INSTRUCTION_OVERHEAD
    }

    pub fn frequency(&self, sys_clk_hz: u32) -> f64 {
        sys_clk_hz as f64 * 256.0 / self.clkdiv.raw() as f64 / self.period_cycles() as f64
    }

    pub fn duty_cycle(&self) -> f32 {
        let high = self.high_cycles();
        high as f32 / (high + self.low_cycles()) as f32
    }
}

/// Maps a frequency and duty cycle onto the PIO tone program.
pub fn encode(
    frequency: f32,
    duty_cycle: f32,
    sys_clk_hz: u32,
) -> Result<FrequencyConfig, EncodeError> {
    if !(frequency > 0.0) {
        return Err(EncodeError::InvalidFrequency);
    }

    let duty_cycle: f64 = if duty_cycle.is_nan() {
        0.0
    } else {
        duty_cycle.clamp(0.0, 1.0).into()
    };
    let frequency = frequency as f64;

    let required_cycles = libm::round(sys_clk_hz as f64 / frequency);
    if required_cycles >= (1u64 << 52) as f64 {
        return Err(EncodeError::FrequencyTooLow);
    }
    let required_cycles = required_cycles as u64;

    let mut clkdiv = ClockDivisor::ONE;

    if required_cycles > MAX_REPRESENTABLE_CYCLES as u64 {
        // round up so the divided period always fits the phase counters
        let max = MAX_REPRESENTABLE_CYCLES as u64;
        let raw = (required_cycles * 256 + max - 1) / max;

        clkdiv = u32::try_from(raw)
            .ok()
            .and_then(ClockDivisor::from_raw)
            .ok_or(EncodeError::FrequencyTooLow)?;
    }

    let effective_clk = sys_clk_hz as f64 * 256.0 / clkdiv.raw() as f64;
    let total_cycles = libm::round(effective_clk / frequency) as u32;

    if total_cycles <= PIO_INSTRUCTION_OVERHEAD {
        return Err(EncodeError::FrequencyTooHigh);
    }

    let variable_cycles = total_cycles - PIO_INSTRUCTION_OVERHEAD;

    if variable_cycles < MIN_PHASE_CYCLES * 2 {
        return Err(EncodeError::InsufficientCycles);
    }

    let high_phase = (libm::round(variable_cycles as f64 * duty_cycle) as u32)
        .clamp(MIN_PHASE_CYCLES, variable_cycles - MIN_PHASE_CYCLES);
    let low_phase = variable_cycles - high_phase;

    let high_val = high_phase - MIN_PHASE_CYCLES;
    let low_val = low_phase - MIN_PHASE_CYCLES;

    if high_val > MAX_PHASE_VALUE || low_val > MAX_PHASE_VALUE {
        return Err(EncodeError::PhaseOverflow);
    }

    Ok(FrequencyConfig {
        clkdiv,
        packed_value: (high_val << 16) | low_val,
    })
}
