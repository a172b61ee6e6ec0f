use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};

pub const MAX_TABLE_SIZE: usize = 1 << 8;

/// One cycle of an 8-bit waveform, sampled by the speaker once per step.
#[derive(Clone, Debug)]
pub enum Waveform {
    Table { samples: &'static [u8], mask: u16 },
    /// white noise, a fresh random byte on every read
    Noise(SmallRng),
}

impl Waveform {
    /// Panics (at compile time for constants) unless the table length is a
    /// power of two no larger than 256.
    pub const fn from_table(samples: &'static [u8]) -> Waveform {
        let len = samples.len();
        assert!(len.is_power_of_two(), "waveform size must be a power of 2");
        assert!(len <= MAX_TABLE_SIZE, "waveform size exceeds 256 samples");

        Waveform::Table {
            samples,
            mask: (len - 1) as u16,
        }
    }

    pub fn noise(seed: u64) -> Waveform {
        Waveform::Noise(SmallRng::seed_from_u64(seed))
    }

    /// Samples per cycle. Noise reports 1 so it is always at its wrap point.
    #[inline]
    pub fn size(&self) -> u16 {
        match self {
            Waveform::Table { mask, .. } => mask + 1,
            Waveform::Noise(_) => 1,
        }
    }

    #[inline]
    pub fn mask(&self) -> u16 {
        self.size() - 1
    }

    #[inline]
    pub fn sample(&mut self, index: u16) -> u8 {
        match self {
            Waveform::Table { samples, mask } => samples[(index & *mask) as usize],
            Waveform::Noise(rng) => (rng.next_u32() & 0xFF) as u8,
        }
    }
}

// Tables are one cycle sampled at i / N, mapped to round(127.5 + v * 127.5).

const SQUARE_TABLE: [u8; 2] = [255, 0];

const SQUARE_25_TABLE: [u8; 4] = [255, 0, 0, 0];

const SQUARE_12_TABLE: [u8; 8] = [255, 0, 0, 0, 0, 0, 0, 0];

const TRIANGLE_TABLE: [u8; 16] = [
    128, 159, 191, 223, 255, 223, 191, 159, 128, 96, 64, 32, 0, 32, 64, 96,
];

const SAW_TABLE: [u8; 16] = [
    128, 143, 159, 175, 191, 207, 223, 239, 0, 16, 32, 48, 64, 80, 96, 112,
];

const SINE_TABLE: [u8; 16] = [
    128, 176, 218, 245, 255, 245, 218, 176, 128, 79, 37, 10, 0, 10, 37, 79,
];

pub const SQUARE: Waveform = Waveform::from_table(&SQUARE_TABLE);
pub const SQUARE_25: Waveform = Waveform::from_table(&SQUARE_25_TABLE);
pub const SQUARE_12: Waveform = Waveform::from_table(&SQUARE_12_TABLE);
pub const TRIANGLE: Waveform = Waveform::from_table(&TRIANGLE_TABLE);
pub const SAW: Waveform = Waveform::from_table(&SAW_TABLE);
pub const SINE: Waveform = Waveform::from_table(&SINE_TABLE);
