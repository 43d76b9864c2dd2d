//! rmcfg: runtime configuration of the NVIDIA Resource Manager
//!
//! Holds an RM client open, applies the requested settings, waits for
//! SIGINT/SIGTERM and puts the debug filter back before exiting.

use anyhow::Context;
use clap::{ArgAction, ArgGroup, Parser};
use log::{info, LevelFilter};
use rmscope::prelude::*;
use rmscope::rm::RmDriver;
use rmscope::ShutdownSignal;
use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rmcfg")]
#[command(version = rmscope::VERSION)]
#[command(about = "Configure NVIDIA RM debug output and telemetry polling", long_about = None)]
#[command(arg_required_else_help = true)]
#[command(group(ArgGroup::new("action").required(true).multiple(true).args(["rmmsg", "rusd", "show_offsets"])))]
struct Cli {
    /// Replace the RmMsg debug filter until exit
    #[arg(long, value_name = "FILTER")]
    rmmsg: Option<String>,

    /// Enable RUSD polling for MASK (decimal, 0x hex, 0o or leading-0 octal, 0b binary)
    #[arg(long, value_name = "MASK", value_parser = parse_mask)]
    rusd: Option<u64>,

    /// Print the compiled-in offset table as JSON and exit
    #[arg(long, conflicts_with_all = ["rmmsg", "rusd"])]
    show_offsets: bool,

    /// RM control node
    #[arg(long, env = "RMCFG_CONTROL_NODE", default_value = "/dev/nvidiactl")]
    control_node: String,

    /// Accelerator node (defaults to /dev/nvidia<INSTANCE>)
    #[arg(long, env = "RMCFG_DEVICE_NODE")]
    device_node: Option<String>,

    /// Device instance to allocate
    #[arg(long, value_name = "INSTANCE", default_value_t = 0)]
    device_instance: u32,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::for_instance(self.device_instance);
        config.control_path = self.control_node.clone();
        if let Some(node) = &self.device_node {
            config.device_path = node.clone();
        }
        config
    }
}

/// Integer with C-style radix prefix
fn parse_mask(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let (digits, radix) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(bin) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
        (bin, 2)
    } else if let Some(oct) = s.strip_prefix("0o").or_else(|| s.strip_prefix("0O")) {
        (oct, 8)
    } else if s.len() > 1 && s.starts_with('0') {
        (&s[1..], 8)
    } else {
        (s, 10)
    };
    u64::from_str_radix(digits, radix).map_err(|e| format!("invalid mask '{}': {}", s, e))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_env("RUST_LOG")
        .init();
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    if cli.show_offsets {
        println!("{}", OffsetTable::active().to_json()?);
        return Ok(());
    }

    let filter = cli
        .rmmsg
        .as_deref()
        .map(str::parse::<FilterString>)
        .transpose()?;

    // Before the first driver call, so a signal at any later point still
    // ends in the restore below
    let signal = ShutdownSignal::new();
    signal.install()?;

    let config = cli.session_config();
    let mut session = RmSession::open(&config)?;
    info!(
        "client {} device {} subdevice {} (driver {})",
        session.client(),
        session.device(),
        session.subdevice(),
        driver_version()
    );

    let mut controller = DebugFilter::new();
    let stdout = io::stdout();
    serve(
        &mut session,
        &mut controller,
        filter.as_ref(),
        cli.rusd.map(PollMask),
        &signal,
        &mut stdout.lock(),
    )
}

/// Apply the settings, wait for termination, then restore the filter
fn serve<D: RmDriver, W: Write>(
    session: &mut RmSession<D>,
    controller: &mut DebugFilter,
    filter: Option<&FilterString>,
    rusd: Option<PollMask>,
    signal: &ShutdownSignal,
    out: &mut W,
) -> anyhow::Result<()> {
    let outcome = configure(session, controller, filter, rusd, signal, out);

    // Put the filter back even when a later step failed
    let restored = controller.restore(session);
    if let Ok(Some(previous)) = &restored {
        writeln!(out, "rmcfg: Restored RmMsg '{}'", previous)?;
    }
    outcome?;
    restored.context("restoring RmMsg filter")?;
    Ok(())
}

fn configure<D: RmDriver, W: Write>(
    session: &mut RmSession<D>,
    controller: &mut DebugFilter,
    filter: Option<&FilterString>,
    rusd: Option<PollMask>,
    signal: &ShutdownSignal,
    out: &mut W,
) -> anyhow::Result<()> {
    if let Some(filter) = filter {
        let change = controller.replace(session, filter)?;
        writeln!(
            out,
            "rmcfg: Changed RmMsg '{}' -> '{}'",
            change.previous, change.applied
        )?;
    }

    if let Some(mask) = rusd {
        enable_telemetry(session, DEFAULT_RUSD_HANDLE, mask)?;
        writeln!(out, "rmcfg: Changed RUSD polling mask to {}", mask)?;
    }
    out.flush()?;

    info!("waiting for SIGINT/SIGTERM");
    signal.wait(Duration::from_millis(100));
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("rmcfg: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
