//! Replays a canonical NDJSON event log and prints the final match snapshot.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tile_bridge_core::protocol::EventLog;
use tile_bridge_core::state::{MatchState, replay};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tile-bridge-replay", version, about = "Replay a canonical event log")]
struct Args {
    /// NDJSON event log, `-` for stdin.
    log: PathBuf,
    /// Stop after this sequence number.
    #[arg(long)]
    until: Option<u64>,
    /// Compare the result with a snapshot JSON file instead of printing it.
    #[arg(long, value_name = "SNAPSHOT")]
    check: Option<PathBuf>,
    /// Single-line JSON output.
    #[arg(long, default_value_t = false)]
    compact: bool,
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("read stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

fn replay_text(text: &str, until: Option<u64>) -> anyhow::Result<MatchState> {
    let log = EventLog::from_ndjson(text)?;
    let events = log
        .events()
        .iter()
        .take_while(|e| until.is_none_or(|until| e.seq <= until))
        .map(|e| &e.event);
    let state = replay(events).context("log does not replay")?;
    info!(
        "replay.done events={} phase={}",
        until.map_or(log.len() as u64, |u| u.min(log.last_seq())),
        state.phase.name()
    );
    Ok(state)
}

fn run(args: &Args, mut out: impl Write) -> anyhow::Result<()> {
    let state = replay_text(&read_input(&args.log)?, args.until)?;

    if let Some(path) = &args.check {
        let expected: MatchState = serde_json::from_str(&read_input(path)?)
            .with_context(|| format!("parse snapshot {}", path.display()))?;
        if expected != state {
            anyhow::bail!("replayed state differs from {}", path.display());
        }
        writeln!(out, "ok")?;
        return Ok(());
    }

    let json = if args.compact {
        serde_json::to_string(&state)?
    } else {
        serde_json::to_string_pretty(&state)?
    };
    writeln!(out, "{json}")?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(tracing::metadata::LevelFilter::WARN.into())
                .with_env_var("TILE_BRIDGE_LOG")
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    run(&args, std::io::stdout().lock())
}

#[cfg(test)]
mod tests {
    use tile_bridge_core::protocol::Emitter;
    use tile_bridge_core::sim::simulate;
    use tile_bridge_core::state::{Phase, Tracker, TrackerConfig};

    use super::*;

    fn tracked(seed: u64) -> (MatchState, EventLog) {
        let mut tracker = Tracker::new(TrackerConfig::default());
        let mut emitter = Emitter::new();
        for env in simulate(seed) {
            emitter.emit(tracker.ingest(env).unwrap());
        }
        (tracker.state().clone(), emitter.log().clone())
    }

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("tile-bridge-replay-{}-{name}", std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn replayed_log_matches_the_live_snapshot() {
        let (live, log) = tracked(17);
        let state = replay_text(&log.to_ndjson().unwrap(), None).unwrap();
        assert_eq!(state, live);
        assert_eq!(state.phase, Phase::MatchEnd);
    }

    #[test]
    fn until_stops_early() {
        let (_, log) = tracked(17);
        let state = replay_text(&log.to_ndjson().unwrap(), Some(1)).unwrap();
        assert_eq!(state.seat_count, 4);
        assert_ne!(state.phase, Phase::MatchEnd);
    }

    #[test]
    fn check_compares_against_a_snapshot_file() {
        let (live, log) = tracked(23);
        let log_path = temp_file("check.ndjson", &log.to_ndjson().unwrap());
        let snap_path = temp_file("check.json", &serde_json::to_string(&live).unwrap());
        let args = Args::parse_from([
            "tile-bridge-replay",
            log_path.to_str().unwrap(),
            "--check",
            snap_path.to_str().unwrap(),
        ]);
        let mut out = Vec::new();
        run(&args, &mut out).unwrap();
        assert_eq!(out, b"ok\n");

        let other = MatchState::default();
        std::fs::write(&snap_path, serde_json::to_string(&other).unwrap()).unwrap();
        assert!(run(&args, Vec::new()).is_err());
    }

    #[test]
    fn gaps_in_the_log_are_rejected() {
        let (_, log) = tracked(5);
        let text = log.to_ndjson().unwrap();
        let gapped: Vec<&str> = text.lines().enumerate().filter(|(i, _)| *i != 3).map(|(_, l)| l).collect();
        let err = replay_text(&gapped.join("\n"), None).unwrap_err();
        assert!(err.to_string().contains("expected seq 4"));
    }
}
