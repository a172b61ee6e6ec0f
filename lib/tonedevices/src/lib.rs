#![cfg_attr(not(test), no_std)]

pub mod frequency;
pub mod speaker;
pub mod tone;
pub mod waveform;

pub use frequency::{encode, EncodeError, FrequencyConfig, DEFAULT_SYS_CLK_HZ};
pub use speaker::{Speaker, SpeakerState, StepAction, CARRIER_FREQUENCY};
pub use tone::{ToneChannel, ToneError, ToneManager, MAX_TONE_CHANNELS};
pub use waveform::Waveform;
