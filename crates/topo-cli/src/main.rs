//! Mesh Topology Command-Line Interface
//!
//! This CLI drives the topology core without a radio:
//! - Printing the default configuration
//! - Replaying a script of attach, radio and routing events against a
//!   manager and reporting the resulting tables
//!
//! A script is a JSON array of steps. Each step has an `op`, the operation's
//! fields and an optional `at_ms` logical time:
//!
//! ```text
//! [
//!   { "at_ms": 0,    "op": "parent_request",   "ext": "00000000000000c1", "challenge": [1, 2, 3] },
//!   { "at_ms": 10,   "op": "child_id_request", "ext": "00000000000000c1",
//!     "counters": { "link_frame_counter": 0, "mle_frame_counter": 0, "short_address": 1 } },
//!   { "at_ms": 20,   "op": "attach",           "ext": "00000000000000c1" },
//!   { "at_ms": 30,   "op": "enqueue",          "ext": "00000000000000c1", "payload": "hello" },
//!   { "at_ms": 4000, "op": "poll",             "ext": "00000000000000c1" },
//!   { "at_ms": 4005, "op": "complete",         "ext": "00000000000000c1", "success": true },
//!   { "at_ms": 9000, "op": "tick" }
//! ]
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use topo_core::{
    Challenge, ExtAddress, FrameCounters, LinkCounters, LinkQuality, NeighborEvent, NeighborInfo,
    PersistedNeighbor, RouterId, Timestamp, TopologyConfig, TopologyManager,
};
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "topo")]
#[command(author, version, about = "Mesh topology core driver", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the default configuration as JSON
    Config,

    /// Replay a script of events against a topology manager
    Replay {
        /// Configuration file (JSON); defaults are used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Persisted neighbors to restore before the script runs (JSON array)
        #[arg(short, long)]
        restore: Option<PathBuf>,

        /// Script of steps (JSON array)
        #[arg(short, long)]
        script: PathBuf,

        /// Write the neighbors worth persisting to this file afterwards
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Stop at the first step that fails
        #[arg(long)]
        strict: bool,
    },
}

/// One scripted step
#[derive(Debug, Deserialize)]
struct Step {
    /// Logical time of the step
    #[serde(default)]
    at_ms: u64,
    #[serde(flatten)]
    action: Action,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Action {
    ParentRequest {
        ext: ExtAddress,
        challenge: Vec<u8>,
    },
    ChildIdRequest {
        ext: ExtAddress,
        counters: LinkCounters,
    },
    Attach {
        ext: ExtAddress,
    },
    ChildUpdateRequest {
        ext: ExtAddress,
    },
    Remove {
        ext: ExtAddress,
    },
    RouterLink {
        router_id: RouterId,
        ext: ExtAddress,
        counters: LinkCounters,
    },
    RouterUnlink {
        router_id: RouterId,
        ext: ExtAddress,
    },
    Frame {
        ext: ExtAddress,
        rss: i8,
        #[serde(default)]
        counters: FrameCounters,
    },
    Poll {
        ext: ExtAddress,
    },
    Complete {
        ext: ExtAddress,
        success: bool,
    },
    Enqueue {
        ext: ExtAddress,
        payload: String,
    },
    RegisterAddress {
        ext: ExtAddress,
        address: Ipv6Addr,
    },
    SetTimeout {
        ext: ExtAddress,
        timeout: u32,
    },
    AllocateRouter {
        router_id: RouterId,
    },
    ReleaseRouter {
        router_id: RouterId,
    },
    UpdateRoute {
        router_id: RouterId,
        next_hop: RouterId,
        cost: u8,
        #[serde(default)]
        link_quality_out: u8,
    },
    StartReclaim {
        router_id: RouterId,
    },
    Tick,
}

#[derive(Debug, Serialize)]
struct ChildSummary {
    ext_address: ExtAddress,
    state: String,
    short_address: Option<u16>,
    timeout: u32,
    queued: usize,
    link_failures: u8,
    link_quality: u8,
    addresses: Vec<Ipv6Addr>,
}

#[derive(Debug, Serialize)]
struct RouterSummary {
    router_id: RouterId,
    next_hop: Option<RouterId>,
    cost: u8,
    link_cost: u8,
    link_state: String,
    reclaim_pending: bool,
}

#[derive(Debug, Serialize)]
struct ReplaySummary {
    steps: usize,
    failed_steps: usize,
    events: usize,
    children: Vec<ChildSummary>,
    routers: Vec<RouterSummary>,
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn cmd_config() -> Result<()> {
    let json = serde_json::to_string_pretty(&TopologyConfig::default())
        .context("Failed to serialize configuration")?;
    println!("{}", json);
    Ok(())
}

fn apply_step(topology: &mut TopologyManager, action: Action, now: Timestamp) -> topo_core::Result<()> {
    match action {
        Action::ParentRequest { ext, challenge } => {
            let challenge = Challenge::new(&challenge)?;
            topology.transition(ext, NeighborEvent::ParentRequest(challenge), now)?;
        }
        Action::ChildIdRequest { ext, counters } => {
            topology.transition(ext, NeighborEvent::ChildIdRequest(counters), now)?;
        }
        Action::Attach { ext } => {
            topology.transition(ext, NeighborEvent::Attach, now)?;
        }
        Action::ChildUpdateRequest { ext } => {
            topology.transition(ext, NeighborEvent::SendChildUpdateRequest, now)?;
        }
        Action::Remove { ext } => {
            topology.transition(ext, NeighborEvent::Remove, now)?;
        }
        Action::RouterLink { router_id, ext, counters } => {
            topology.transition_router(router_id, ext, NeighborEvent::LinkAccept(counters), now)?;
        }
        Action::RouterUnlink { router_id, ext } => {
            topology.transition_router(router_id, ext, NeighborEvent::Remove, now)?;
        }
        Action::Frame { ext, rss, counters } => {
            topology.record_frame_heard(ext, rss, &counters, now)?;
        }
        Action::Poll { ext } => match topology.poll_received(ext, now)? {
            Some(frame) => info!(
                %ext,
                sequence = frame.sequence,
                frame_counter = frame.frame_counter,
                attempt = frame.attempt,
                len = frame.payload.len(),
                "transmit indirect frame"
            ),
            None => info!(%ext, "nothing to send"),
        },
        Action::Complete { ext, success } => {
            let outcome = topology.send_completed(ext, success)?;
            info!(%ext, ?outcome, "transmission completed");
        }
        Action::Enqueue { ext, payload } => {
            topology.enqueue_indirect(ext, payload.into_bytes())?;
        }
        Action::RegisterAddress { ext, address } => {
            topology.register_address(ext, address)?;
        }
        Action::SetTimeout { ext, timeout } => {
            topology.set_child_timeout(ext, timeout)?;
        }
        Action::AllocateRouter { router_id } => {
            topology.allocate_router(router_id)?;
        }
        Action::ReleaseRouter { router_id } => {
            topology.release_router(router_id)?;
        }
        Action::UpdateRoute {
            router_id,
            next_hop,
            cost,
            link_quality_out,
        } => {
            let taken = topology.update_route(
                router_id,
                next_hop,
                cost,
                LinkQuality::from_u8(link_quality_out),
                now,
            )?;
            debug!(%router_id, %next_hop, cost, taken, "route update");
        }
        Action::StartReclaim { router_id } => {
            topology.start_reclaim(router_id, now)?;
        }
        Action::Tick => topology.tick(now),
    }
    Ok(())
}

fn summarize(topology: &TopologyManager, steps: usize, failed_steps: usize, events: usize) -> ReplaySummary {
    let children = topology
        .children()
        .iter()
        .map(|(_, child)| ChildSummary {
            ext_address: child.ext_address(),
            state: format!("{:?}", child.state()),
            short_address: child.short_address().map(|s| s.0),
            timeout: child.timeout,
            queued: child.indirect().queued_count(),
            link_failures: child.neighbor().link_failures,
            link_quality: child.link_info().link_quality().as_u8(),
            addresses: child.addresses().to_vec(),
        })
        .collect();

    let own_id = topology.routers().own_id();
    let routers = topology
        .routers()
        .iter()
        .filter(|r| r.id() != own_id)
        .map(|r| RouterSummary {
            router_id: r.id(),
            next_hop: r.next_hop(),
            cost: r.cost(),
            link_cost: topology.link_cost(r.id()),
            link_state: format!("{:?}", r.state()),
            reclaim_pending: r.is_reclaim_pending(),
        })
        .collect();

    ReplaySummary {
        steps,
        failed_steps,
        events,
        children,
        routers,
    }
}

fn cmd_replay(
    config: Option<PathBuf>,
    restore: Option<PathBuf>,
    script: PathBuf,
    snapshot: Option<PathBuf>,
    strict: bool,
) -> Result<()> {
    let config: TopologyConfig = match config {
        Some(path) => read_json(&path)?,
        None => TopologyConfig::default(),
    };
    let mut topology = TopologyManager::new(config).context("Invalid configuration")?;

    if let Some(path) = restore {
        let records: Vec<PersistedNeighbor> = read_json(&path)?;
        let restored = topology
            .restore(records, Timestamp::ZERO)
            .context("Failed to restore neighbors")?;
        info!(restored, "restored persisted neighbors");
    }

    let steps: Vec<Step> = read_json(&script)?;
    let total = steps.len();
    let mut failed = 0;
    let mut event_count = 0;

    for (n, step) in steps.into_iter().enumerate() {
        let now = Timestamp::from_millis(step.at_ms);
        debug!(step = n, at_ms = step.at_ms, action = ?step.action, "applying step");
        if let Err(e) = apply_step(&mut topology, step.action, now) {
            if strict {
                return Err(e).with_context(|| format!("Step {} failed", n));
            }
            warn!(step = n, error = %e, "step failed");
            failed += 1;
        }
        for event in topology.drain_events() {
            event_count += 1;
            info!(?event, "topology event");
        }
    }

    if let Some(path) = snapshot {
        let records = topology.snapshot();
        let file = File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, &records)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(records = records.len(), path = %path.display(), "snapshot written");
    }

    let summary = summarize(&topology, total, failed, event_count);
    let json = serde_json::to_string_pretty(&summary).context("Failed to serialize summary")?;
    println!("{}", json);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Config => cmd_config(),

        Commands::Replay {
            config,
            restore,
            script,
            snapshot,
            strict,
        } => cmd_replay(config, restore, script, snapshot, strict),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_replay() {
        let cli = Cli::try_parse_from(["topo", "-vv", "replay", "--script", "s.json", "--strict"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Replay { script, strict, config, .. } => {
                assert_eq!(script, PathBuf::from("s.json"));
                assert!(strict);
                assert!(config.is_none());
            }
            Commands::Config => panic!("expected replay"),
        }
    }

    #[test]
    fn test_script_replays_attach_and_delivery() {
        let script = r#"[
            { "op": "parent_request", "ext": "00000000000000c1", "challenge": [1, 2, 3] },
            { "op": "child_id_request", "ext": "00000000000000c1",
              "counters": { "link_frame_counter": 0, "mle_frame_counter": 0, "short_address": 1 } },
            { "op": "attach", "ext": "00000000000000c1" },
            { "op": "enqueue", "ext": "00000000000000c1", "payload": "hi" },
            { "at_ms": 100, "op": "poll", "ext": "00000000000000c1" },
            { "at_ms": 101, "op": "complete", "ext": "00000000000000c1", "success": true },
            { "at_ms": 200, "op": "tick" }
        ]"#;
        let steps: Vec<Step> = serde_json::from_str(script).unwrap();
        let mut topology = TopologyManager::new(TopologyConfig::default()).unwrap();
        for step in steps {
            apply_step(&mut topology, step.action, Timestamp::from_millis(step.at_ms)).unwrap();
        }

        let summary = summarize(&topology, 7, 0, 0);
        assert_eq!(summary.children.len(), 1);
        assert_eq!(summary.children[0].state, "Valid");
        assert_eq!(summary.children[0].queued, 0);
        assert_eq!(summary.children[0].short_address, Some(1));
    }

    #[test]
    fn test_router_steps_parse() {
        let script = r#"[
            { "op": "allocate_router", "router_id": 3 },
            { "op": "update_route", "router_id": 3, "next_hop": 3, "cost": 2 },
            { "at_ms": 5000, "op": "start_reclaim", "router_id": 3 }
        ]"#;
        let steps: Vec<Step> = serde_json::from_str(script).unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[2].at_ms, 5000);

        let mut topology = TopologyManager::new(TopologyConfig::default()).unwrap();
        for step in steps {
            apply_step(&mut topology, step.action, Timestamp::from_millis(step.at_ms)).unwrap();
        }
        let summary = summarize(&topology, 3, 0, 0);
        assert_eq!(summary.routers.len(), 1);
        assert!(summary.routers[0].reclaim_pending);
    }
}
