use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use order_desk::api::desk_routes;
use order_desk::config::DeskConfig;
use order_desk::desk::Desk;
use order_desk::escalation::spawn_scan_task;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Console always, plus a daily-rolling file when a log dir is configured.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "order-desk.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(env_filter())
                .with(tracing_subscriber::fmt::layer().with_target(false))
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_target(false)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The global subscriber depends on the parsed log dir, so config
    // warnings go through a console-only subscriber scoped to the parse.
    let config = tracing::subscriber::with_default(
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_target(false)
            .finish(),
        DeskConfig::from_env,
    );
    let _file_guard = init_tracing(config.log_dir.as_deref());

    let port = config.port;
    let scan_interval = config.scan_interval;

    eprintln!("📦 Order Desk v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{}/api", port);
    eprintln!("   Escalation feed: ws://0.0.0.0:{}/ws", port);
    eprintln!("   SLA scan every {}s\n", scan_interval.as_secs());

    let desk = Desk::new(config);
    let scanner = spawn_scan_task(desk.monitor.clone(), scan_interval);

    let app = desk_routes(desk);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;
    tracing::info!(port, "Order desk listening");

    let served = axum::serve(listener, app).await.context("HTTP server failed");
    scanner.abort();
    served
}
