//! railtwin demo
//!
//! Builds a three-platform station and runs one arrival through the
//! interlock, printing each verdict and the final station state.

use std::path::PathBuf;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use railtwin::{CommandMode, EventLog, Interlock, SafetyRules, TrainSnapshot};

/// Demo configuration
#[derive(Default)]
struct Config {
    /// Safety rules file (JSON)
    rules: Option<PathBuf>,
    /// JSON-lines event file
    events: Option<PathBuf>,
}

fn parse_args() -> Config {
    let args: Vec<String> = std::env::args().collect();
    let mut config = Config::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--rules" | "-r" => {
                if i + 1 < args.len() {
                    config.rules = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("error: --rules requires a value");
                    std::process::exit(1);
                }
            }
            "--events" | "-e" => {
                if i + 1 < args.len() {
                    config.events = Some(PathBuf::from(&args[i + 1]));
                    i += 2;
                } else {
                    eprintln!("error: --events requires a value");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                println!("railtwin-demo - station interlock walkthrough");
                println!();
                println!("USAGE:");
                println!("    railtwin-demo [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -r, --rules <FILE>        Safety rules (JSON) [default: built-in]");
                println!("    -e, --events <FILE>       Append events as JSON lines to FILE");
                println!("    -h, --help                Print help information");
                println!();
                println!("Set RUST_LOG=railtwin=debug to see every verification.");
                std::process::exit(0);
            }
            arg => {
                eprintln!("error: unknown argument: {arg}");
                std::process::exit(1);
            }
        }
    }

    config
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = parse_args();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let rules = match &config.rules {
        Some(path) => SafetyRules::from_json_file(path)?,
        None => SafetyRules::default(),
    };
    let events = match &config.events {
        Some(path) => EventLog::with_file(path)?,
        None => EventLog::new(),
    };

    println!("railtwin demo v{}", env!("CARGO_PKG_VERSION"));
    let mut interlock = Interlock::with_event_log(rules, events)?;

    for (track, signal) in [("P1", "S1"), ("P2", "S2"), ("P3", "S3")] {
        interlock.add_track(track)?;
        interlock.add_signal(signal, track)?;
    }
    interlock.add_gate("G1")?;

    interlock.upsert_train(TrainSnapshot::new("T001", 3.0, 60.0).with_eta(180.0));
    interlock.upsert_train(TrainSnapshot::new("T002", 5.0, 80.0));

    match interlock.allocate_track("T001", 180.0) {
        Some(track) => println!("T001 allocated to {track}"),
        None => println!("T001 could not be allocated"),
    }
    match interlock.allocate_track("T002", 230.0) {
        Some(track) => println!("T002 allocated to {track}"),
        None => println!("T002 held back: arrival too close to T001"),
    }

    let outcome = interlock.change_signal("S1", "GREEN", CommandMode::Verified);
    println!("S1 -> GREEN: {} ({})", outcome.status, outcome.message);

    interlock.update_train_proximity("G1", "T001", 1800.0);
    let outcome = interlock.change_gate("G1", "OPEN", CommandMode::Verified);
    println!("G1 -> OPEN: {} ({})", outcome.status, outcome.message);

    interlock.update_train_proximity("G1", "T001", 420.0);
    let outcome = interlock.auto_close_gate("G1");
    println!("G1 auto-close: {} ({})", outcome.status, outcome.message);

    interlock.occupy_track("T001");
    let outcome = interlock.change_signal("S1", "GREEN", CommandMode::Verified);
    println!("S1 -> GREEN after arrival: {} ({})", outcome.status, outcome.message);
    let outcome = interlock.change_signal("S1", "RED", CommandMode::Verified);
    println!("S1 -> RED: {} ({})", outcome.status, outcome.message);

    let conflicts = interlock.monitor();
    println!("Live conflicts: {}", conflicts.len());

    let stats = interlock.get_verification_stats();
    println!(
        "Verifications: {} ({} safe, {} unsafe, {:.1}% safe)",
        stats.total_verifications, stats.safe, stats.unsafe_count, stats.safety_rate
    );
    println!("Free tracks: {}", interlock.get_free_track_count());
    println!("{}", serde_json::to_string_pretty(&interlock.get_all_states())?);

    Ok(())
}
