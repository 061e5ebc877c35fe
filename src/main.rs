//! ==============================================================================
//! main.rs - sensor dashboard entry point
//! ==============================================================================
//!
//! purpose:
//!     wires configuration, the telemetry source, the dashboard driver and
//!     the web server together, then waits for ctrl-c.
//!
//! responsibilities:
//!     - load dashboard.toml (or defaults)
//!     - set up tracing
//!     - build the configured telemetry source (rest, realtime or mock)
//!     - start the dashboard for the configured user
//!     - serve the dashboard until shutdown, then stop it cleanly
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                       main (this file)                        │
//!     │  ┌──────────────────┐          ┌─────────────────────────┐    │
//!     │  │ dashboard driver │─ view ──▶│ web server (/, /api)    │    │
//!     │  │ (dashboard.rs)   │◀─ cmds ──│ (server.rs)             │    │
//!     │  └────────┬─────────┘          └─────────────────────────┘    │
//!     └───────────┼──────────────────────────────────────────────────┘
//!                 │ poll / subscribe
//!        ┌────────┴─────────┐
//!        ▼                  ▼
//!   rest collector    realtime store
//!   (GET /sensors/)   (devices node)
//!
//! ==============================================================================

use sensor_dashboard::config::DashboardConfig;
use sensor_dashboard::dashboard::Dashboard;
use sensor_dashboard::server::run_server;
use sensor_dashboard::session::Session;
use sensor_dashboard::source::TelemetrySource;

use anyhow::Result;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  IoT Sensor Dashboard");
    println!("===========================================================");

    // step 1: load configuration
    let config = DashboardConfig::load_or_default()?;
    config.print_summary();

    // step 2: logging (RUST_LOG wins over the config file)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .init();

    let zone = config.display.zone()?;
    let session = match &config.session.user_display_name {
        Some(name) => Session::signed_in(name.clone()),
        None => Session::anonymous(),
    };

    // step 3: telemetry source
    println!("\n[STARTUP] Connecting telemetry source...");
    let source = TelemetrySource::from_config(&config.source, &config.polling)?;
    println!("[STARTUP] ✓ Source ready: {}", source.name());

    // step 4: dashboard driver
    let interval = Duration::from_secs(config.polling.interval_seconds);
    let mut dashboard = match Dashboard::start(source, session, interval) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("[ERROR] Fatal: {} (set [session] user_display_name)", e);
            return Err(e.into());
        }
    };

    // step 5: web server in background
    let handle = dashboard.handle();
    let bind = config.server.bind.clone();
    let server = tokio::spawn(async move { run_server(&bind, handle, zone).await });
    println!("[STARTUP] ✓ Dashboard live at http://{}", config.server.bind);
    println!("────────────────────────────────────────────────────────────");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!("\n[RUNTIME] Shutting down...");
        }
        joined = server => match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => eprintln!("[ERROR] Web server error: {}", e),
            Err(e) => eprintln!("[ERROR] Web server task failed: {}", e),
        },
    }

    dashboard.stop().await;
    Ok(())
}
