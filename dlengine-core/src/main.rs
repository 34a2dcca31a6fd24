//! dlengine - resolve and print the engine topology for this process.
//!
//! Reads the same environment and submission properties the engine sees at
//! startup, initializes it, and reports the node/core topology and the
//! resulting thread-pool sizes.

use anyhow::{bail, Context, Result};
use dlengine_core::{
    init_tracing, ConfigVerifier, Engine, EngineConfig, EngineSnapshot, PropertiesVerifier,
    SessionConfig, SubmissionProperties,
};
use serde::Serialize;
use tracing::info;

fn print_help() {
    println!("dlengine - DL engine topology resolver v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("USAGE:");
    println!("  dlengine [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("  --conf KEY=VALUE         Set a submission property (repeatable)");
    println!("  --properties-file PATH   Load submission properties from a file");
    println!("  --verify                 Check the properties against the required session config");
    println!("  --json                   Print the report as JSON");
    println!("  -h, --help               Print this help message");
    println!("  -v, --version            Print version information");
    println!();
    println!("ENVIRONMENT:");
    println!("  DL_CORE_NUMBER           Override physical core detection");
    println!("  DL_ENGINE_TYPE           Compute backend (mklblas)");
    println!("  DL_DEFAULT_POOL_SIZE     Override the default thread pool size");
    println!("  ON_SPARK                 Start with the on-spark flag set");
}

#[derive(Serialize)]
struct Report {
    #[serde(flatten)]
    snapshot: EngineSnapshot,
    session_config: Option<SessionConfig>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let mut props = SubmissionProperties::new();
    let mut json = false;
    let mut verify = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(());
            }
            "-v" | "--version" => {
                println!("dlengine {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--json" => json = true,
            "--verify" => verify = true,
            "--conf" => {
                let pair = args.next().context("--conf requires KEY=VALUE")?;
                let (key, value) = pair
                    .split_once('=')
                    .with_context(|| format!("--conf expects KEY=VALUE, got '{pair}'"))?;
                props.set(key.trim(), value.trim());
            }
            "--properties-file" => {
                let path = args.next().context("--properties-file requires a path")?;
                for (key, value) in SubmissionProperties::load(&path)?.iter() {
                    props.set(key, value);
                }
            }
            _ => {
                eprintln!("error: unrecognized argument '{}'", arg);
                eprintln!("Run 'dlengine --help' for usage information.");
                std::process::exit(1);
            }
        }
    }

    init_tracing();

    let config = EngineConfig::from_env().context("Invalid engine environment")?;
    let engine = Engine::new(config);
    if !engine.check_singleton() {
        bail!("engine bootstrapped twice in one process");
    }

    let verifier = PropertiesVerifier::new(props.clone());
    let verifier = verify.then_some(&verifier as &dyn ConfigVerifier);
    let session_config = engine
        .init_auto(&props, verifier)
        .await
        .context("Engine initialization failed")?;

    let report = Report {
        snapshot: engine.snapshot()?,
        session_config,
    };
    info!(topology = %report.snapshot.topology, "Engine ready");

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let snap = &report.snapshot;
        println!("nodes:         {}", snap.topology.node_count);
        println!("cores/node:    {}", snap.topology.cores_per_node);
        println!("on spark:      {}", snap.on_spark);
        println!("engine type:   {}", snap.engine_type);
        println!("default pool:  {}", snap.pools.default_pool);
        println!("compute pool:  {}", snap.pools.compute_pool);
        if let Some(conf) = &report.session_config {
            println!("session config:");
            for (key, value) in conf.entries() {
                println!("  {key} {value}");
            }
        }
    }

    Ok(())
}
