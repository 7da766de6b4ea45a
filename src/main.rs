// clustersh - line-oriented driver for the cluster command engine

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use clustersh_lib::cluster::{ChangeSignal, CommandEngine, Host};
use clustersh_lib::config::{list_cluster_specs, ClusterSpec};
use clustersh_lib::ssh::SshTransport;

#[derive(Parser, Debug)]
#[command(name = "clustersh", about = "Run shell commands on a cluster of SSH hosts")]
struct Args {
    /// Cluster file to load. Without one, the known clusters are listed.
    cluster: Option<PathBuf>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, env = "CLUSTERSH_LOG", default_value = "warn")]
    log_level: String,

    /// List cluster files under ~/.clustersh/clusters and exit
    #[arg(long, default_value_t = false)]
    list: bool,

    /// Seconds to keep collecting output after stdin closes
    #[arg(long, default_value_t = 2)]
    linger_secs: u64,
}

/// Per-host offsets into the output buffers, so each byte is printed once
#[derive(Default)]
struct PrintCursor {
    offsets: HashMap<usize, usize>,
}

impl PrintCursor {
    fn reset(&mut self) {
        self.offsets.clear();
    }

    fn flush(&mut self, hosts: &[Arc<Host>]) {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();

        for host in hosts {
            if host.is_hidden() {
                continue;
            }
            let offset = self.offsets.entry(host.index()).or_default();
            let tail = match host.output_since(*offset) {
                Some(tail) => tail,
                // cleared since the last flush
                None => {
                    *offset = 0;
                    host.output_bytes()
                }
            };
            if tail.is_empty() {
                continue;
            }
            *offset += tail.len();

            let text = String::from_utf8_lossy(&tail);
            for line in text.lines() {
                let _ = writeln!(out, "[{} {}] {}", host.index(), host.address(), line);
            }
        }
        let _ = out.flush();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    clustersh_lib::init_logging(Some(&args.log_level));

    let path = match (&args.cluster, args.list) {
        (Some(path), false) => path.clone(),
        _ => {
            let specs = list_cluster_specs()
                .await
                .context("failed to list cluster files")?;
            if specs.is_empty() {
                println!("No cluster files found");
            }
            for spec in specs {
                println!("{}", spec.display());
            }
            return Ok(());
        }
    };

    let spec = ClusterSpec::load(&path)
        .await
        .with_context(|| format!("failed to load cluster file {}", path.display()))?;
    info!("Cluster {} ready, {} hosts", spec.name, spec.hosts.len());

    let signal = Arc::new(ChangeSignal::new());
    let transport = Arc::new(SshTransport::new(spec.settings.clone()));
    let engine = Arc::new(CommandEngine::new(
        spec.hosts.clone(),
        transport,
        signal.clone(),
        &spec.settings,
    ));
    let cursor = Arc::new(Mutex::new(PrintCursor::default()));

    let command_loop = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_command_loop().await })
    };

    let printer = {
        let engine = engine.clone();
        let cursor = cursor.clone();
        tokio::spawn(async move {
            loop {
                signal.changed().await;
                cursor.lock().flush(engine.hosts());
            }
        })
    };

    let diagnostics = {
        let mut rx = engine.subscribe_diagnostics();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(diagnostic) => {
                        eprintln!("clustersh: {}: {}", diagnostic.command, diagnostic.error)
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Dropped {} diagnostics", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut drain = false;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    drain = true;
                    break;
                };
                engine.reset_buffers();
                cursor.lock().reset();
                engine.submit(line)?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    if drain {
        let linger = async {
            engine.wait_idle().await;
            tokio::time::sleep(Duration::from_secs(args.linger_secs)).await;
        };
        tokio::select! {
            _ = linger => {}
            _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        }
    }

    engine.shutdown();
    if let Err(e) = command_loop.await? {
        warn!("Command loop ended with error: {}", e);
    }
    engine.close_sessions().await;
    printer.abort();
    diagnostics.abort();

    cursor.lock().flush(engine.hosts());
    Ok(())
}
