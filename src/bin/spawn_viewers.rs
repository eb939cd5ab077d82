//! Load generator: opens many viewer connections that all subscribe to the
//! same match, then holds them until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Parser, Debug, Clone)]
#[command(name = "spawn-viewers", version, about)]
struct Args {
    /// Relay WebSocket endpoint
    #[arg(long, env = "SERVER_URL", default_value = "ws://localhost:5000/ws")]
    server: String,

    /// Number of viewer connections to open
    #[arg(long, default_value = "60")]
    clients: usize,

    /// Match every viewer subscribes to
    #[arg(long, default_value = "match-1")]
    match_id: String,

    /// Sport sent with the subscribe request
    #[arg(long, default_value = "cricket", value_parser = ["football", "cricket"])]
    sport: String,

    /// Pause between connection attempts, in milliseconds
    #[arg(long, default_value = "50")]
    stagger_ms: u64,

    /// Extra random pause added to each stagger, up to this many milliseconds
    #[arg(long, default_value = "20")]
    jitter_ms: u64,

    /// Only the first N viewers log each update they receive
    #[arg(long, default_value = "2")]
    verbose_clients: usize,
}

#[derive(Default)]
struct Counters {
    connected: AtomicUsize,
    failed: AtomicUsize,
    updates: AtomicUsize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let url = url::Url::parse(&args.server).context("Invalid --server URL")?;
    if !matches!(url.scheme(), "ws" | "wss") {
        anyhow::bail!("--server must be a ws:// or wss:// URL, got {}", url);
    }

    let counters = Arc::new(Counters::default());
    let cancel = CancellationToken::new();
    let mut tasks = Vec::with_capacity(args.clients);

    for i in 0..args.clients {
        let task = tokio::spawn(run_viewer(
            i,
            url.to_string(),
            args.clone(),
            Arc::clone(&counters),
            cancel.child_token(),
        ));
        tasks.push(task);

        let jitter = if args.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=args.jitter_ms)
        } else {
            0
        };
        tokio::time::sleep(Duration::from_millis(args.stagger_ms + jitter)).await;
    }

    info!(
        "Spawned ~{} viewers on {} ({}). Press Ctrl+C to stop.",
        args.clients, args.match_id, args.sport
    );

    let mut report = tokio::time::interval(Duration::from_secs(10));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = report.tick() => {
                info!(
                    "connected={} failed={} updates={}",
                    counters.connected.load(Ordering::Relaxed),
                    counters.failed.load(Ordering::Relaxed),
                    counters.updates.load(Ordering::Relaxed),
                );
            }
        }
    }

    info!("Disconnecting viewers...");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    info!(
        "Done: {} updates received across {} connections",
        counters.updates.load(Ordering::Relaxed),
        counters.connected.load(Ordering::Relaxed)
    );
    Ok(())
}

async fn run_viewer(
    index: usize,
    url: String,
    args: Args,
    counters: Arc<Counters>,
    cancel: CancellationToken,
) {
    let (ws, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("Failed to connect viewer {}: {}", index, e);
            counters.failed.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };
    counters.connected.fetch_add(1, Ordering::Relaxed);
    let (mut write, mut read) = ws.split();

    let subscribe = json!({
        "event": "match:subscribe",
        "data": { "match_id": args.match_id, "sport": args.sport },
    });
    if let Err(e) = write.send(Message::Text(subscribe.to_string())).await {
        warn!("Viewer {} failed to subscribe: {}", index, e);
        return;
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => on_frame(index, &text, &args, &counters),
                Some(Ok(Message::Ping(data))) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Viewer {} closed by server", index);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("Viewer {} read error: {}", index, e);
                    break;
                }
            }
        }
    }
}

fn on_frame(index: usize, text: &str, args: &Args, counters: &Counters) {
    let frame: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("Viewer {} got unparseable frame: {}", index, e);
            return;
        }
    };
    match frame["event"].as_str() {
        Some("match:update") => {
            counters.updates.fetch_add(1, Ordering::Relaxed);
            if index < args.verbose_clients {
                let data = &frame["data"];
                match data["info"].as_str() {
                    Some(info) => info!("[viewer {}] {}: {}", index, data["id"], info),
                    None => info!("[viewer {}] update for {}", index, data["id"]),
                }
            }
        }
        Some("error") => warn!("[viewer {}] server error: {}", index, frame["data"]["message"]),
        _ => debug!("[viewer {}] ignoring frame {}", index, text),
    }
}
