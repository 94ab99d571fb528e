//! nudge-daemon - serves the sync engine over stdio
//!
//! Reads one JSON request per line on stdin and writes one JSON response per
//! line on stdout. Snapshot refreshes are pushed on the same stream as
//! `{"event":"snapshot",...}` lines.

use anyhow::{Context, Result};
use clap::Parser;
use nudge::login_item::platform_registrar;
use nudge::storage::config_store::APP_NAME;
use nudge::storage::{FileConfigStore, KeyringTokenStore, MemoryTokenStore};
use nudge::{dispatch, RpcRequest, SnapshotEvent, SyncEngine};
use nudge_api::{ConfigStore, TokenStore};
use nudge_notion::NotionClient;
use serde_json::json;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Subscriber};
use tracing_subscriber::fmt::{self, MakeWriter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps Notion tasks and habits in sync for a tray or menu-bar frontend
#[derive(Parser)]
#[command(name = "nudge-daemon", version, about)]
struct Cli {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, env = "NUDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log file (defaults to the platform data directory)
    #[arg(long, env = "NUDGE_LOG_FILE")]
    log_file: Option<PathBuf>,

    /// Do not start background polling
    #[arg(long)]
    no_poll: bool,

    /// Keep the Notion token in memory instead of the OS keychain
    #[arg(long)]
    ephemeral: bool,
}

fn default_log_path() -> Option<PathBuf> {
    let mut path = dirs::data_local_dir()?;
    path.push(APP_NAME);
    std::fs::create_dir_all(&path).ok()?;
    path.push("nudge.log");
    Some(path)
}

fn open_log_file(path: &Path) -> Option<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| {
            eprintln!(
                "Warning: Could not open log file {:?} ({}), logging to stderr only",
                path, e
            )
        })
        .ok()
}

/// Log file layer (when open, ANSI off) plus a console layer.
fn subscriber<W>(filter: EnvFilter, file: Option<File>, console: W) -> impl Subscriber + Send + Sync
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::registry()
        .with(filter)
        .with(file.map(|file| fmt::layer().with_writer(file).with_ansi(false)))
        .with(fmt::layer().with_writer(console))
}

/// stdout carries the protocol, so logs go to a file and to stderr; stderr
/// alone when the file cannot be opened. Defaults to INFO, override with
/// RUST_LOG.
fn init_logging(log_file: Option<PathBuf>) {
    let file = log_file
        .or_else(default_log_path)
        .and_then(|path| open_log_file(&path));
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    subscriber(filter, file, std::io::stderr).init();
}

fn snapshot_line(event: &SnapshotEvent) -> Option<String> {
    serde_json::to_string(&json!({
        "event": "snapshot",
        "kind": event.kind,
        "key": event.key,
        "records": event.records,
    }))
    .ok()
}

async fn write_line(stdout: &mut tokio::io::Stdout, line: &str) -> std::io::Result<()> {
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_file.clone());

    let config_store: Arc<dyn ConfigStore> = Arc::new(match cli.config {
        Some(path) => FileConfigStore::new(path),
        None => FileConfigStore::default_location().context("locate settings file")?,
    });
    if let Ok(path) = config_store.path() {
        info!("[daemon] Settings file: {}", path.display());
    }
    let token_store: Arc<dyn TokenStore> = if cli.ephemeral {
        Arc::new(MemoryTokenStore::new())
    } else {
        Arc::new(KeyringTokenStore::default())
    };
    let notion = Arc::new(NotionClient::new(token_store.clone()));

    let shutdown = CancellationToken::new();
    let engine = Arc::new(
        SyncEngine::new(config_store, token_store, notion)
            .with_login_item_registrar(platform_registrar())
            .with_cancellation(shutdown.clone()),
    );

    if let Err(e) = engine.load_config().await {
        error!("[daemon] Failed to load config, using defaults: {}", e);
    }
    if !cli.no_poll {
        engine.start_polling().await;
    }

    // Single writer so response and event lines never interleave.
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = out_rx.recv().await {
            if let Err(e) = write_line(&mut stdout, &line).await {
                error!("[daemon] stdout closed: {}", e);
                break;
            }
        }
    });

    let events = {
        let mut stream = engine.snapshot_stream();
        let out_tx = out_tx.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    next = stream.next() => match next {
                        Some(Ok(event)) => {
                            if let Some(line) = snapshot_line(&event) {
                                if out_tx.send(line).is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                            warn!("[daemon] Dropped {} snapshot event(s)", skipped);
                        }
                        None => break,
                    }
                }
            }
        })
    };

    info!("[daemon] Ready");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("[daemon] Interrupted");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let request: RpcRequest = match serde_json::from_str(line) {
                        Ok(request) => request,
                        Err(e) => {
                            warn!("[daemon] Ignoring malformed request: {}", e);
                            continue;
                        }
                    };
                    let engine = engine.clone();
                    let out_tx = out_tx.clone();
                    tokio::spawn(async move {
                        let Some(response) = dispatch(&engine, request).await else {
                            return;
                        };
                        match serde_json::to_string(&response) {
                            Ok(line) => {
                                let _ = out_tx.send(line);
                            }
                            Err(e) => {
                                error!("[daemon] Failed to encode response {}: {}", response.id, e)
                            }
                        }
                    });
                }
                Ok(None) => {
                    info!("[daemon] stdin closed");
                    break;
                }
                Err(e) => {
                    error!("[daemon] Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    }

    engine.shutdown();
    drop(out_tx);
    let _ = events.await;
    if tokio::time::timeout(Duration::from_secs(5), writer).await.is_err() {
        warn!("[daemon] Gave up waiting for pending responses");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_logs_go_to_file_and_console() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nudge.log");
        let file = open_log_file(&path);
        assert!(file.is_some());

        let console = Captured::default();
        let sink = console.clone();
        let subscriber = subscriber(EnvFilter::new("info"), file, move || sink.clone());
        tracing::subscriber::with_default(subscriber, || {
            info!("[daemon] Settings file: /tmp/config.json");
        });

        let logged = std::fs::read_to_string(&path).unwrap();
        assert!(logged.contains("Settings file: /tmp/config.json"));
        assert!(!logged.contains('\u{1b}'));
        assert!(console.text().contains("Settings file: /tmp/config.json"));
    }

    #[test]
    fn test_unopenable_log_file_leaves_console_only() {
        let dir = tempfile::tempdir().unwrap();
        let file = open_log_file(&dir.path().join("missing").join("nudge.log"));
        assert!(file.is_none());

        let console = Captured::default();
        let sink = console.clone();
        let subscriber = subscriber(EnvFilter::new("info"), file, move || sink.clone());
        tracing::subscriber::with_default(subscriber, || warn!("[daemon] stdin closed"));

        assert!(console.text().contains("stdin closed"));
    }
}
