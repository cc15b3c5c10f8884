//! Cassette proxy CLI

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use cassette_proxy::cassette::{CassetteOptions, CassetteStore};
use cassette_proxy::config::Config;
use cassette_proxy::network::ProxyServer;
use cassette_proxy::proxy::CassetteProxy;

fn main() {
    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!("cassette-proxy v{}", env!("CARGO_PKG_VERSION"));
        eprintln!();
        eprintln!("Usage: cassette-proxy <command> <argument>");
        eprintln!();
        eprintln!("Commands:");
        eprintln!("  serve <config.toml>       Start the record-replay proxy");
        eprintln!("  cassettes <cassette-dir>  List recorded cassettes");
        process::exit(1);
    }

    let command = &args[1];
    let target = PathBuf::from(&args[2]);

    let result = match command.as_str() {
        "serve" => serve(&target),
        "cassettes" => list_cassettes(&target),
        _ => {
            eprintln!("Unknown command: {command}");
            eprintln!("Run 'cassette-proxy' for usage information.");
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn serve(config_path: &Path) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;

    runtime.block_on(async {
        let proxy = Arc::new(CassetteProxy::from_config(&config)?);
        tracing::info!(
            "Proxying to {} with cassettes in {} (stored default mode: {}, transaction mode: {})",
            config.upstream,
            config.cassette_dir.display(),
            config.cassettes.record_mode,
            proxy.record_mode()
        );
        ProxyServer::new(proxy, &config).run().await?;
        Ok::<(), anyhow::Error>(())
    })
}

fn list_cassettes(dir: &Path) -> anyhow::Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("Directory not found: {}", dir.display());
    }

    let store = CassetteStore::new(dir.to_path_buf(), CassetteOptions::default());
    let names = store.list()?;

    println!("Cassette directory: {}", dir.display());
    println!("{} cassettes", names.len());
    println!();

    for name in names {
        match store.open(&name) {
            Ok(cassette) => {
                let first = cassette.interactions.first();
                let method = first.map_or("-", |i| i.request.method.as_str());
                let path = first.map_or("-", |i| i.request.path.as_str());
                println!(
                    "{name}  {method} {path}  mode={} repeats={} interactions={}",
                    cassette.options.record_mode,
                    cassette.options.allow_playback_repeats,
                    cassette.len()
                );
            }
            Err(e) => println!("{name}  unreadable: {e}"),
        }
    }

    Ok(())
}
