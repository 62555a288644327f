//! midimodctl - translates a MIDI file authored for one tone generator to
//! whichever module is actually on hand.
//!
//! # Usage
//!
//! ```bash
//! midimodctl song.mid --catalog ./catalog --target SC-88Pro
//! midimodctl song.mid --catalog ./catalog --dry-run
//! ```

use midimodctl::bank::load_catalog_dir;
use midimodctl::engine::{Engine, PlaybackOptions, PlaybackState};
use midimodctl::module_type::ModuleType;
use midimodctl::port::PortFanout;
use midimodctl::sink::NullSink;
use midimodctl::{scan, Bank, MidiFile, ScanContext};

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line options for the CLI front-end.
struct CliOptions {
    /// Path to the source MIDI file.
    midi_path: PathBuf,
    /// Directory of `.ins`-style catalog files (§6).
    catalog_dir: Option<PathBuf>,
    /// Requested target module name (e.g. `SC-88Pro`, `MU100`, `GM`); falls
    /// back to the bank-scan's optimal recommendation when unset.
    target: Option<String>,
    /// Parse and scan only; don't drive playback.
    dry_run: bool,
    /// How many times to loop the song (default: play once).
    loop_count: Option<u32>,
}

impl CliOptions {
    fn parse() -> Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut midi_path: Option<PathBuf> = None;
        let mut catalog_dir: Option<PathBuf> = None;
        let mut target: Option<String> = None;
        let mut dry_run = false;
        let mut loop_count: Option<u32> = None;
        let mut i = 1;

        while i < args.len() {
            match args[i].as_str() {
                "--catalog" | "-c" => {
                    i += 1;
                    if i >= args.len() {
                        eprintln!("Error: --catalog requires a directory argument");
                        std::process::exit(1);
                    }
                    catalog_dir = Some(PathBuf::from(&args[i]));
                }
                "--target" | "-t" => {
                    i += 1;
                    if i >= args.len() {
                        eprintln!("Error: --target requires a module name argument");
                        std::process::exit(1);
                    }
                    target = Some(args[i].clone());
                }
                "--loop" => {
                    i += 1;
                    if i >= args.len() {
                        eprintln!("Error: --loop requires a count argument");
                        std::process::exit(1);
                    }
                    loop_count = args[i].parse().ok();
                }
                "--dry-run" => dry_run = true,
                "--help" | "-h" => {
                    eprintln!("midimodctl - retarget a MIDI file to the module you actually have");
                    eprintln!();
                    eprintln!(
                        "Usage: {} <song.mid> [OPTIONS]",
                        args.first().map(String::as_str).unwrap_or("midimodctl")
                    );
                    eprintln!();
                    eprintln!("Options:");
                    eprintln!("  -c, --catalog DIR   Directory of instrument catalog files");
                    eprintln!("  -t, --target NAME   Target module (SC-55, SC-88Pro, MU100, GM, ...)");
                    eprintln!("      --loop N        Loop the song N times");
                    eprintln!("      --dry-run       Scan and report only; don't play");
                    eprintln!("  -h, --help          Print this help message");
                    std::process::exit(0);
                }
                other => {
                    if midi_path.is_none() {
                        midi_path = Some(PathBuf::from(other));
                    } else {
                        eprintln!("Unknown option: {}", other);
                        eprintln!("Use --help for usage information");
                        std::process::exit(1);
                    }
                }
            }
            i += 1;
        }

        let midi_path = midi_path.ok_or_else(|| anyhow::anyhow!("a MIDI file path is required"))?;

        Ok(Self {
            midi_path,
            catalog_dir,
            target,
            dry_run,
            loop_count,
        })
    }
}

fn parse_target(name: &str) -> Option<ModuleType> {
    match name.to_ascii_uppercase().as_str() {
        "GM" | "GM1" => Some(ModuleType::Gm1),
        "GM2" => Some(ModuleType::Gm2),
        "SC-55" | "SC55" => Some(ModuleType::Sc55),
        "SC-88" | "SC88" => Some(ModuleType::Sc88),
        "SC-88PRO" | "SC88PRO" => Some(ModuleType::Sc88Pro),
        "SC-8850" | "SC8850" => Some(ModuleType::Sc8850),
        "TG300B" => Some(ModuleType::Tg300B),
        "MU50" => Some(ModuleType::Mu50),
        "MU80" => Some(ModuleType::Mu80),
        "MU90" => Some(ModuleType::Mu90),
        "MU100" => Some(ModuleType::Mu100),
        "MU128" => Some(ModuleType::Mu128),
        "MU1000" => Some(ModuleType::Mu1000),
        "MT-32" | "MT32" => Some(ModuleType::Mt32),
        "CM-64" | "CM64" => Some(ModuleType::Cm64),
        _ => None,
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = CliOptions::parse()?;

    let midi_bytes = std::fs::read(&cli.midi_path)
        .with_context(|| format!("failed to read {}", cli.midi_path.display()))?;
    let midi = MidiFile::from_bytes(&midi_bytes).map_err(|e| anyhow::anyhow!(e))?;

    let mut catalog = Bank::new();
    if let Some(dir) = &cli.catalog_dir {
        catalog = load_catalog_dir(dir).with_context(|| format!("failed to load catalog from {}", dir.display()))?;
    }

    let scan_ctx = ScanContext {
        gm2_bank: None,
        gs_bank: Some(&catalog),
        xg_bank: Some(&catalog),
    };
    let result = scan::scan(&midi, false, &scan_ctx);

    tracing::info!(
        detected = ?result.mod_type,
        gs_min = ?result.gs_min,
        gs_opt = ?result.gs_opt,
        xg_opt = ?result.xg_opt,
        ports = result.num_ports,
        "bank scan complete"
    );
    println!("Detected source module: {:?}", result.mod_type);
    println!("GS model range needed: {} .. {}", result.gs_min, result.gs_opt);
    println!("XG model needed: {}", result.xg_opt);
    println!("Output ports used: {}", result.num_ports);

    if cli.dry_run {
        return Ok(());
    }

    let dest_module = cli
        .target
        .as_deref()
        .and_then(parse_target)
        .unwrap_or(result.mod_type);
    println!("Rendering for: {:?}", dest_module);

    let options = PlaybackOptions {
        ignore_empty_chns: false,
        loop_limit: cli.loop_count,
    };

    let mut engine = Engine::new(
        midi,
        catalog.clone(),
        catalog,
        result.mod_type,
        dest_module,
        result.num_ports as usize,
        options,
    )?;

    let mut fanout = PortFanout::new();
    for _ in 0..result.num_ports.max(1) {
        fanout.add_port(Box::new(NullSink), 0);
    }
    engine.set_output_ports(fanout)?;
    engine.start()?;

    const TICK_MS: u64 = 10;
    while engine.get_state() != PlaybackState::Stopped {
        if !engine.tick_once(TICK_MS) {
            break;
        }
        std::thread::sleep(Duration::from_millis(TICK_MS));
    }

    Ok(())
}
