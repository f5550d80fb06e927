use std::sync::Arc;

use anyhow::Context;
use request_alloc_tracer::{
    metrics::AllocationStats, server, AllocTracerService, AppState, EventHub, TickingAllocator,
    TracerOptions,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: TickingAllocator = TickingAllocator::system();

/// Stats endpoints are polled constantly; tracing them only adds noise.
const STATS_PREFIX: &str = "/api/alloc/";

const DEFAULT_ADDR: &str = "0.0.0.0:3000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!();
    println!("╔══════════════════════════════════════════════════╗");
    println!("║   🔬  PER-REQUEST ALLOCATION TRACER              ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();

    // ── 1. Load options ──────────────────────────────────────────
    let mut options = TracerOptions::from_env().context("loading tracer options")?;
    if !options.ignored_path_prefixes.iter().any(|p| p == STATS_PREFIX) {
        options.ignored_path_prefixes.push(STATS_PREFIX.to_owned());
    }

    // ── 2. Start the tracer ──────────────────────────────────────
    let hub = EventHub::global();
    let tracer = Arc::new(AllocTracerService::new(hub, options));
    tracer.start().context("starting allocation tracer")?;

    let stats = Arc::new(AllocationStats::new());
    let _stats_handle = tracer.bus().subscribe(stats.clone());

    // ── 3. Build shared state & router ───────────────────────────
    let state = Arc::new(AppState {
        hub,
        tracer: Arc::clone(&tracer),
        stats,
    });
    let app = server::create_router(state);

    // ── 4. Bind & serve ──────────────────────────────────────────
    let addr = std::env::var("ALLOC_TRACER_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_owned());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, "server listening");
    println!("Demo            → http://{addr}/api/test/alloc");
    println!("Stats SSE       → http://{addr}/api/alloc/stream");
    println!("Stats JSON      → http://{addr}/api/alloc/stats");
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server exited with error")?;

    tracer.stop();
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(error) => {
            warn!(%error, "cannot listen for ctrl-c; running until killed");
            std::future::pending::<()>().await;
        }
    }
}
