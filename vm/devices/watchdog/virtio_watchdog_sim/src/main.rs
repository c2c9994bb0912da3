// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Host-side harness for the virtio watchdog.
//!
//! Realizes the PCI-bound device from command line options, then plays a
//! guest script against it on a virtual clock and reports what the watchdog
//! did. Example:
//!
//! ```text
//! virtio_watchdog_sim --timeout 10 enable advance:9 heartbeat advance:20 expect:1
//! ```

mod script;
mod sim;

use crate::script::Step;
use crate::sim::SimConfig;
use crate::sim::Simulation;
use anyhow::Context as _;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use virtio_watchdog::WatchdogDeviceConfig;
use virtio_watchdog::action::WatchdogAction;
use virtio_watchdog::pci::PciProxyConfig;
use virtio_watchdog_protocol::CONFIG_SPACE_SIZE;
use virtio_watchdog_protocol::DEFAULT_MSIX_VECTORS;
use virtio_watchdog_protocol::TIMEOUT_DEFAULT_SECS;

#[derive(Parser, Debug)]
#[clap(
    name = "virtio_watchdog_sim",
    about = "Plays a guest script against a simulated virtio watchdog."
)]
struct CmdArgs {
    /// Enable verbose logging (trace level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Watchdog timeout in seconds (10 to 2048)
    #[arg(long, default_value_t = TIMEOUT_DEFAULT_SECS)]
    timeout: u32,

    /// Recovery action performed on expiry
    #[arg(long, default_value_t = WatchdogAction::Reset)]
    action: WatchdogAction,

    /// Number of MSI-X vectors on the PCI function
    #[arg(long, default_value_t = DEFAULT_MSIX_VECTORS)]
    vectors: u32,

    /// Deliver queue notifications by trapped MMIO instead of an event fd
    #[arg(long)]
    no_ioeventfd: bool,

    /// Let the guest change the timeout through the config region
    #[arg(long)]
    guest_writable_timeout: bool,

    /// Disable the watchdog after the first expiry instead of re-arming
    #[arg(long)]
    one_shot: bool,

    /// Width of the device config region in bytes
    #[arg(long, default_value_t = CONFIG_SPACE_SIZE)]
    config_size: usize,

    /// Event loop granularity while advancing time, in milliseconds
    #[arg(long, default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    tick_ms: u64,

    /// File used by the `save` and `restore` steps
    #[arg(long, value_name = "path")]
    state_file: Option<PathBuf>,

    /// Read steps from a script file
    #[arg(long, value_name = "path", conflicts_with = "steps")]
    script: Option<PathBuf>,

    /// Inline steps: enable, heartbeat, disable, raw:<hex>, advance:<N>[s|ms],
    /// save, restore, reset, config, write-config:<offset>:<hex>, expect:<N>
    steps: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let args = CmdArgs::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .log_internal_errors(true)
        .with_max_level(if args.verbose {
            tracing::Level::TRACE
        } else {
            tracing::Level::INFO
        })
        .init();

    let steps = match &args.script {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read script {}", path.display()))?;
            script::parse_script(&text)?
        }
        None => args
            .steps
            .iter()
            .enumerate()
            .map(|(i, token)| script::parse_step(i + 1, token))
            .collect::<Result<Vec<Step>, _>>()?,
    };

    let mut sim = Simulation::new(SimConfig {
        device: WatchdogDeviceConfig {
            timeout_secs: args.timeout,
            config_size: args.config_size,
            guest_writable_timeout: args.guest_writable_timeout,
        },
        proxy: PciProxyConfig {
            ioeventfd: !args.no_ioeventfd,
            vectors: args.vectors,
        },
        action: args.action,
        one_shot: args.one_shot,
        tick: Duration::from_millis(args.tick_ms),
        state_file: args.state_file,
    })?;
    tracing::info!(steps = steps.len(), "running guest script");
    sim.run(&steps)?;

    let summary = sim.summary();
    println!("state: {:?}", summary.state);
    println!("timed out: {}", summary.timed_out);
    println!("timeout: {}s", summary.timeout_secs);
    println!("recoveries: {}", summary.recoveries.len());
    for action in &summary.recoveries {
        println!("  {action}");
    }
    println!("{:#?}", summary.stats);
    Ok(())
}
