use std::error::Error;

use argh::FromArgs;
use log::{debug, info, warn, LevelFilter};
use simplelog::TermLogger;

use tonedevices::{waveform, Waveform, DEFAULT_SYS_CLK_HZ};
use tonedevicetraits::{Core, ToneDevice, TONE_NOTES};
use tonesim::{SpeakerSim, ToneSim};

/// Runs the dynamic tone demo against simulated PIO and timer hardware.
#[derive(Debug, FromArgs)]
struct CLIOptions {
    /// verbose level: off, error, warn, info, debug, trace
    #[argh(option, default = "LevelFilter::Info")]
    verbose: LevelFilter,
    /// system clock in Hz
    #[argh(option, default = "DEFAULT_SYS_CLK_HZ")]
    sys_clk: u32,
    /// speaker pin
    #[argh(option, default = "8")]
    pin: u8,
    /// waveform: square, square25, square12, triangle, saw, sine, noise
    #[argh(option, default = "String::from(\"saw\")")]
    waveform: String,
    /// audible frequency in Hz
    #[argh(option, default = "110.0")]
    freq: f32,
    /// volume 0.0 - 1.0
    #[argh(option, default = "1.0")]
    volume: f32,
    /// seed for the noise waveform
    #[argh(option, default = "0x5eed")]
    seed: u64,
    /// run the speaker step timer on core 1
    #[argh(switch)]
    core1: bool,
}

fn parse_waveform(name: &str, seed: u64) -> Option<Waveform> {
    match name {
        "square" => Some(waveform::SQUARE),
        "square25" => Some(waveform::SQUARE_25),
        "square12" => Some(waveform::SQUARE_12),
        "triangle" => Some(waveform::TRIANGLE),
        "saw" => Some(waveform::SAW),
        "sine" => Some(waveform::SINE),
        "noise" => Some(Waveform::noise(seed)),
        _ => None,
    }
}

fn report_output(sim: &ToneSim, pin: u8) {
    match sim.output(pin) {
        Some(config) => info!(
            "pin {}: {:.2} Hz, duty {:.3}, clkdiv {}",
            pin,
            config.frequency(sim.tones.sys_clk_hz()),
            config.duty_cycle(),
            config.clkdiv
        ),
        None => info!("pin {}: idle", pin),
    }
}

fn raw_tone_demo(sim: &ToneSim, pin: u8) {
    info!("Raw tone 440 Hz for 100 ms");

    sim.tones.tone(pin, 440.0, 100, 0.5);
    report_output(sim, pin);

    sim.advance_ms(99, &[]);
    info!("after 99 ms playing: {}", sim.tones.is_playing(pin));

    sim.advance_ms(1, &[]);
    info!("after 100 ms playing: {}", sim.tones.is_playing(pin));

    info!("Note scale with update_tone");
    sim.tones.tone(pin, TONE_NOTES[24] as f32, 0, 0.5);
    for &note in TONE_NOTES[24..37].iter() {
        sim.tones.update_tone(pin, note as f32, 0.5);
        sim.advance_ms(50, &[]);
        debug!("note {} Hz", note);
    }
    report_output(sim, pin);
    sim.tones.no_tone(pin);
}

fn speaker_demo(sim: &ToneSim, speaker: &SpeakerSim<'_>, waveform: Waveform) {
    let pin = speaker.pin();
    let words_before = sim.pio.pushed_words().len();

    speaker.set_waveform(waveform);
    speaker.play(0);
    info!(
        "Speaker on pin {} ({:?}) at {} Hz, {}% volume",
        pin,
        speaker.core(),
        speaker.frequency(),
        speaker.volume() * 100.0
    );

    sim.advance_ms(1_000, &[speaker]);
    info!(
        "1 s of playback pushed {} words",
        sim.pio.pushed_words().len() - words_before
    );

    info!("Sweeping Volume: 100% -> 1%");
    let mut volume = 1.0f32;
    while volume >= 0.01 {
        speaker.set_volume(volume);
        sim.advance_ms(25, &[speaker]);
        volume -= 0.005;
    }
    debug!("volume {:.3}", speaker.volume());

    info!("Sweeping Volume: 1% -> 100%");
    let mut volume = 0.01f32;
    while volume <= 1.0 {
        speaker.set_volume(volume);
        sim.advance_ms(25, &[speaker]);
        volume += 0.005;
    }
    debug!("volume {:.3}", speaker.volume());

    info!("Sweeping Frequency: 100Hz -> 5kHz");
    for freq in (100..=5000).step_by(10) {
        speaker.set_frequency(freq as f32);
        sim.advance_ms(15, &[speaker]);
    }
    info!("step period now {} us", speaker.state().lut_period_us());

    info!("Swapping to sine while playing");
    speaker.set_frequency(110.0);
    speaker.set_waveform(waveform::SINE);
    sim.advance_ms(100, &[speaker]);
    info!(
        "waveform size {}, swap pending: {}",
        speaker.state().waveform().size(),
        speaker.state().has_pending_waveform()
    );

    info!("Playing for 250 ms more");
    speaker.play(250);
    sim.advance_ms(300, &[speaker]);
    info!("playing: {}", speaker.is_playing());
    report_output(sim, pin);
}

fn main() -> Result<(), Box<dyn Error>> {
    let options: CLIOptions = argh::from_env();

    TermLogger::init(
        options.verbose,
        simplelog::ConfigBuilder::default().build(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let waveform = match parse_waveform(&options.waveform, options.seed) {
        Some(waveform) => waveform,
        None => {
            warn!("unknown waveform '{}', using saw", options.waveform);
            waveform::SAW
        }
    };

    info!("PIO Dynamic Tone Generator (simulated)");
    info!("system clock {} Hz", options.sys_clk);

    let sim = ToneSim::new(options.sys_clk);
    raw_tone_demo(&sim, options.pin);

    let core = if options.core1 { Core::Core1 } else { Core::Core0 };
    let speaker = sim.speaker(0, options.pin, core, options.freq, options.volume);
    speaker_demo(&sim, &speaker, waveform);

    info!(
        "done at {} ms, {} divisor writes, {} channels claimed",
        sim.clock.now_us() / 1_000,
        sim.pio.divisor_writes(),
        sim.pio.claimed_count()
    );

    Ok(())
}
