//! glprobe - drive the GL context core against the headless driver.

mod probe;

use anyhow::{Context as _, Result};
use clap::{Parser, ValueEnum};
use common::{GlConfig, ThreadingStrategy};
use glcontext::{ContextRegistry, ContextRequest, DeviceKey, GlVersion, HeadlessConfig, HeadlessDriver, ProfileRequest};
use std::sync::Arc;
use threading::{Threading, WorkerThread};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use probe::Probe;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Profile {
    Any,
    Core,
    Compatibility,
}

impl From<Profile> for ProfileRequest {
    fn from(profile: Profile) -> Self {
        match profile {
            Profile::Any => ProfileRequest::Any,
            Profile::Core => ProfileRequest::Core,
            Profile::Compatibility => ProfileRequest::Compatibility,
        }
    }
}

/// glprobe - exercise context creation, sharing and buffer tracking
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Device connections to probe
    #[arg(long = "device", default_value = "headless:0")]
    devices: Vec<String>,

    /// Requested profile
    #[arg(long, value_enum, default_value = "any")]
    profile: Profile,

    /// Highest core profile version the headless driver offers, e.g. 4.1
    #[arg(long, value_parser = parse_version)]
    max_core: Option<GlVersion>,

    /// Highest version to request
    #[arg(long, value_parser = parse_version)]
    max_version: Option<GlVersion>,

    /// Fail on lock contention instead of blocking
    #[arg(long)]
    fail_fast: bool,

    /// Funnel GPU work through the worker thread
    #[arg(long)]
    single_thread: bool,

    /// Threads taking part in the lock hand-off
    #[arg(long, default_value = "4")]
    threads: usize,

    /// make-current rounds per hand-off thread
    #[arg(long, default_value = "100")]
    rounds: usize,

    /// JSON configuration file
    #[arg(long)]
    config: Option<String>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn parse_version(value: &str) -> Result<GlVersion, String> {
    GlVersion::parse(value)
        .filter(|version| version.is_valid())
        .ok_or_else(|| format!("not a GL version: {value}"))
}

fn load_config(args: &Args) -> Result<GlConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let json = std::fs::read_to_string(path).with_context(|| format!("reading {path}"))?;
            GlConfig::from_json(&json)?
        }
        None => GlConfig::from_env()?,
    };
    if args.fail_fast {
        config = config.with_fail_fast(true);
    }
    if args.single_thread {
        config = config.with_single_thread(ThreadingStrategy::Worker);
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;
    info!(
        fail_fast = config.fail_fast_locking,
        single_threaded = config.threading.single_threaded,
        "glprobe v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut headless = HeadlessConfig::default();
    if let Some(max_core) = args.max_core {
        headless = headless.with_max_core(Some(max_core));
    }
    let request = ContextRequest {
        profile: args.profile.into(),
        max_version: args.max_version,
        debug: config.debug,
    };

    let probe = Probe {
        registry: Arc::new(ContextRegistry::new(&config)),
        driver: Arc::new(HeadlessDriver::new(headless)),
        request,
        threading: Threading::new(config.threading.clone(), WorkerThread::global()),
        threads: args.threads,
        rounds: args.rounds,
    };
    let devices: Vec<DeviceKey> = args.devices.iter().map(|device| DeviceKey::new(device.as_str())).collect();
    let reports = probe.run(&devices)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            println!("{}", report.device);
            println!("  version:             {}", report.version.as_deref().unwrap_or("unavailable"));
            println!("  family:              {}", report.family.as_deref().unwrap_or("-"));
            println!("  hardware:            {}", report.hardware);
            println!("  gl extensions:       {}", report.gl_extensions);
            println!("  platform extensions: {}", report.platform_extensions);
            if let Some(buffers) = &report.buffers {
                println!(
                    "  buffers:             allocated {} tracked {} mapped {} unmapped {}",
                    buffers.allocated, buffers.tracked_size, buffers.mapped, buffers.unmapped
                );
            }
            if let Some(hand_off) = &report.hand_off {
                println!(
                    "  hand-off:            {} threads, {} acquired, {} contended",
                    hand_off.threads, hand_off.acquired, hand_off.contended
                );
            }
        }
    }

    probe.threading.worker().stop()?;
    info!("glprobe finished");
    Ok(())
}
