// Copyright (c) 2026 Robert L. Snyder, Sierra Vista, AZ
// Licensed under the MIT License. See LICENSE file in the project root for details.

use anyhow::{Context, Result};
use mmsynth::audio::{default_device_name, list_devices};
use mmsynth::engine::Locator;
use mmsynth::tone::{self, ToneEvent};
use mmsynth::{EngineConfig, Manager, Player, PlayerEvent, PlayerState};
use std::env;
use std::fs;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::Level;

fn print_usage() {
    println!("mmsynth - MIDI and tone sequence player");
    println!();
    println!("Usage: mmsynth [--config <FILE>] [--verbose] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  --play <FILE> [--loop N]      Play a MIDI or tone file to the end");
    println!("  --tone <NOTE> <MS> [VOLUME]   Play a single tone (volume 0-100, default 100)");
    println!("  --decode <FILE>               Print the events of a tone sequence");
    println!("  --to-midi <IN> <OUT>          Convert a tone sequence to a MIDI file");
    println!("  --list-devices                List available audio output devices");
    println!("  --help                        Show this help message");
    println!();
    println!("Options:");
    println!("  --config <FILE>               Load engine settings from a YAML file");
    println!("  --verbose                     Log engine activity to stderr");
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&str>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path),
        None => Ok(EngineConfig::default()),
    }
}

fn play_file(config: EngineConfig, path: &str, loops: i32) -> Result<()> {
    let manager = Manager::new(config)?;
    let player = manager.create_player(Locator::parse(path))?;
    player.set_loop_count(loops)?;
    player.realize()?;
    player.prefetch()?;

    if let Some(duration) = player.duration()? {
        println!("Playing {} ({:.1}s)", path, duration as f64 / 1_000_000.0);
    } else {
        println!("Playing {}", path);
    }

    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    player.add_listener(Arc::new(move |player: &Player, event: &PlayerEvent| {
        let finished = match event {
            PlayerEvent::EndOfMedia { .. } => player.state() < PlayerState::Started,
            PlayerEvent::Error { .. } | PlayerEvent::Closed => true,
            _ => false,
        };
        if finished {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(event.clone());
            }
        }
    }))?;

    player.start()?;
    match rx.recv() {
        Ok(PlayerEvent::Error { message }) => {
            player.close();
            anyhow::bail!("Playback failed: {}", message);
        }
        Ok(_) => println!("Done"),
        Err(_) => println!("Player went away"),
    }
    player.close();
    Ok(())
}

fn play_tone(config: EngineConfig, note: i32, duration_ms: i32, volume: i32) -> Result<()> {
    let manager = Manager::new(config)?;
    manager.play_tone(note, duration_ms, volume)?;

    let deadline = Instant::now() + Duration::from_millis(duration_ms.max(0) as u64 + 2000);
    while manager.active_tones() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}

fn decode_file(path: &str) -> Result<()> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read {}", path))?;
    let sequence = tone::decode(&bytes)?;

    println!(
        "Version {}, tempo {} ({} bpm), resolution {}",
        sequence.version,
        sequence.tempo,
        sequence.bpm(),
        sequence.resolution
    );
    for event in &sequence.events {
        match event {
            ToneEvent::Note { pitch, duration_ms } => {
                println!("  note {:3} for {} ms", pitch, duration_ms)
            }
            ToneEvent::Silence { duration_ms } => println!("  silence for {} ms", duration_ms),
            ToneEvent::BlockStart(id) => println!("  block {} {{", id),
            ToneEvent::BlockEnd(id) => println!("  }} block {}", id),
            ToneEvent::PlayBlock(id) => println!("  play block {}", id),
            ToneEvent::SetVolume(volume) => println!("  volume {}", volume),
            ToneEvent::Repeat(count) => println!("  repeat x{}", count),
            ToneEvent::SequenceEnd => {}
        }
    }
    println!("Total {} ms", sequence.duration_ms());
    Ok(())
}

fn convert_to_midi(config: &EngineConfig, input: &str, output: &str) -> Result<()> {
    let bytes = fs::read(input).with_context(|| format!("Failed to read {}", input))?;
    let sequence = tone::decode(&bytes)?;
    let smf = tone::to_midi(&sequence, config.tone.channel, config.tone.program);
    fs::write(output, &smf).with_context(|| format!("Failed to write {}", output))?;
    println!("Wrote {} ({} bytes)", output, smf.len());
    Ok(())
}

fn print_devices() {
    let default = default_device_name();
    let devices = list_devices();
    if devices.is_empty() {
        println!("No audio output devices found");
        return;
    }
    println!("Audio output devices:");
    for (i, name) in devices.iter().enumerate() {
        let marker = if Some(name) == default.as_ref() { " (default)" } else { "" };
        println!("  {}: {}{}", i, name, marker);
    }
}

fn parse_number(value: Option<&String>, what: &str) -> Result<i32> {
    let value = value.ok_or_else(|| anyhow::anyhow!("Missing {}", what))?;
    value
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid {}: {}", what, value))
}

fn main() -> Result<()> {
    let mut verbose = false;
    let mut config_path = None;
    let mut args: Vec<String> = Vec::new();

    let mut raw = env::args().skip(1);
    while let Some(arg) = raw.next() {
        match arg.as_str() {
            "--verbose" | "-v" => verbose = true,
            "--config" => match raw.next() {
                Some(path) => config_path = Some(path),
                None => {
                    eprintln!("Error: --config requires a file");
                    std::process::exit(1);
                }
            },
            _ => args.push(arg),
        }
    }

    init_logging(verbose);

    if args.is_empty() {
        println!("mmsynth - MIDI and tone sequence player");
        println!("Run with --help for usage information");
        return Ok(());
    }

    match args[0].as_str() {
        "--play" => {
            if args.len() < 2 {
                eprintln!("Error: --play requires a file");
                std::process::exit(1);
            }
            let loops = match args.iter().position(|a| a == "--loop") {
                Some(i) => parse_number(args.get(i + 1), "loop count")?,
                None => 1,
            };
            let config = load_config(config_path.as_deref())?;
            play_file(config, &args[1], loops)?;
        }
        "--tone" => {
            if args.len() < 3 {
                eprintln!("Error: --tone requires a note and a duration");
                std::process::exit(1);
            }
            let note = parse_number(args.get(1), "note")?;
            let duration = parse_number(args.get(2), "duration")?;
            let volume = match args.get(3) {
                Some(_) => parse_number(args.get(3), "volume")?,
                None => 100,
            };
            let config = load_config(config_path.as_deref())?;
            play_tone(config, note, duration, volume)?;
        }
        "--decode" => {
            if args.len() < 2 {
                eprintln!("Error: --decode requires a file");
                std::process::exit(1);
            }
            decode_file(&args[1])?;
        }
        "--to-midi" => {
            if args.len() < 3 {
                eprintln!("Error: --to-midi requires an input and an output file");
                std::process::exit(1);
            }
            let config = load_config(config_path.as_deref())?;
            convert_to_midi(&config, &args[1], &args[2])?;
        }
        "--list-devices" => {
            print_devices();
        }
        "--help" | "-h" => {
            print_usage();
        }
        _ => {
            eprintln!("Unknown option: {}", args[0]);
            print_usage();
            std::process::exit(1);
        }
    }

    Ok(())
}
