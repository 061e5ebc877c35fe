//! ==============================================================================
//! render.rs - card projection and html dashboard
//! ==============================================================================
//!
//! purpose:
//!     pure formatting. turns readings and stats into display strings and the
//!     dashboard page served at `/`. nothing here holds state.
//!
//! relationships:
//!     - used by: server.rs (html + json views)
//!     - reads: dashboard.rs (DashboardView), domain.rs, stats.rs
//!
//! ==============================================================================

use crate::dashboard::DashboardView;
use crate::domain::{SensorReading, SignalTier};
use crate::presenter::{NotificationLevel, Phase};
use crate::stats::AggregateStats;

use chrono::{DateTime, FixedOffset, Local, Utc};
use serde::Serialize;
use std::fmt::Write;

pub const UNAVAILABLE: &str = "unavailable";

const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// timezone used for human-readable timestamps
#[derive(Debug, Clone, Copy)]
pub enum DisplayZone {
    Local,
    Fixed(FixedOffset),
}

impl DisplayZone {
    pub fn format(&self, ts: &DateTime<Utc>) -> String {
        match self {
            DisplayZone::Local => ts.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string(),
            DisplayZone::Fixed(offset) => ts.with_timezone(offset).format(TIMESTAMP_FORMAT).to_string(),
        }
    }

    pub fn format_time(&self, ts: &DateTime<Utc>) -> String {
        match self {
            DisplayZone::Local => ts.with_timezone(&Local).format("%H:%M:%S").to_string(),
            DisplayZone::Fixed(offset) => ts.with_timezone(offset).format("%H:%M:%S").to_string(),
        }
    }
}

// ==============================================================================
// card projection
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CardView {
    pub id: String,
    pub temperature: String,
    pub humidity: String,
    /// omitted from the card when the device doesn't report it
    pub pressure: Option<String>,
    pub uptime: Option<String>,
    pub rssi: String,
    pub signal: String,
    pub signal_colour: &'static str,
    pub last_updated: String,
}

impl CardView {
    pub fn project(reading: &SensorReading, zone: &DisplayZone) -> Self {
        let tier = reading.signal_tier();
        Self {
            id: reading.id.clone(),
            temperature: format_or_unavailable(reading.temperature, |t| format!("{:.1}°C", t)),
            humidity: format_or_unavailable(reading.humidity, |h| format!("{:.1}%", h)),
            pressure: reading.pressure.map(|p| format!("{:.1} hPa", p)),
            uptime: reading.uptime.map(format_uptime),
            rssi: format_or_unavailable(reading.rssi, |r| format!("{:.0} dBm", r)),
            signal: tier.map_or(UNAVAILABLE, SignalTier::label).to_string(),
            signal_colour: tier_colour(tier),
            last_updated: reading
                .timestamp
                .map_or_else(|| UNAVAILABLE.to_string(), |ts| zone.format(&ts)),
        }
    }
}

fn format_or_unavailable(value: Option<f64>, f: impl FnOnce(f64) -> String) -> String {
    value.map_or_else(|| UNAVAILABLE.to_string(), f)
}

fn tier_colour(tier: Option<SignalTier>) -> &'static str {
    match tier {
        Some(SignalTier::Strong) => "green",
        Some(SignalTier::Moderate) => "yellow",
        Some(SignalTier::Weak) => "red",
        None => "grey",
    }
}

/// `1d 2h 3m 4s`; leading zero units are dropped, seconds always shown
pub fn format_uptime(total: u64) -> String {
    let days = total / 86_400;
    let hours = total % 86_400 / 3_600;
    let minutes = total % 3_600 / 60;
    let seconds = total % 60;

    let mut parts = Vec::with_capacity(4);
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if days > 0 || hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if days > 0 || hours > 0 || minutes > 0 {
        parts.push(format!("{}m", minutes));
    }
    parts.push(format!("{}s", seconds));
    parts.join(" ")
}

// ==============================================================================
// stats projection
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsView {
    pub avg_temperature: String,
    pub avg_humidity: String,
    pub avg_pressure: String,
    pub online: String,
}

impl StatsView {
    pub fn project(stats: &AggregateStats) -> Self {
        Self {
            avg_temperature: format_or_unavailable(stats.avg_temperature, |t| format!("{:.1}°C", t)),
            avg_humidity: format_or_unavailable(stats.avg_humidity, |h| format!("{:.1}%", h)),
            avg_pressure: format_or_unavailable(stats.avg_pressure, |p| format!("{:.1} hPa", p)),
            online: format!("{}/{}", stats.online, stats.total),
        }
    }
}

// ==============================================================================
// html page
// ==============================================================================

pub fn render_page(view: &DashboardView, zone: &DisplayZone) -> String {
    let snapshot = &view.snapshot;
    let mut body = String::new();

    let user = snapshot.user_display_name.as_deref().unwrap_or("signed out");
    let refreshed = snapshot
        .last_refreshed
        .map_or_else(|| "never".to_string(), |ts| zone.format_time(&ts));
    let button = if view.busy { "Refreshing..." } else { "Refresh" };
    let spinner = if view.busy { r#"<span class="spinner" aria-label="loading"></span>"# } else { "" };

    let _ = write!(
        body,
        r#"<header><h1>IoT Sensor Monitoring</h1><p class="muted">{user} &middot; source: {source}</p></header>
<section class="toolbar"><p>Last refreshed: {refreshed} {spinner}</p><div><button onclick="refreshNow()"{disabled}>{button}</button> <button onclick="signOut()">Sign out</button></div></section>
"#,
        user = html_escape(user),
        source = html_escape(&view.source),
        refreshed = html_escape(&refreshed),
        spinner = spinner,
        disabled = if view.busy { " disabled" } else { "" },
        button = button,
    );

    if !view.notifications.is_empty() {
        body.push_str("<section class=\"toasts\">\n");
        for note in view.notifications.iter().rev() {
            let class = match note.level {
                NotificationLevel::Info => "info",
                NotificationLevel::Error => "error",
            };
            let _ = writeln!(
                body,
                r#"<div class="toast {class}"><strong>{title}</strong> {message} <span class="muted">{at}</span></div>"#,
                class = class,
                title = html_escape(&note.title),
                message = html_escape(&note.message),
                at = html_escape(&zone.format_time(&note.at)),
            );
        }
        body.push_str("</section>\n");
    }

    if let Some(stats) = snapshot.stats.as_ref().map(StatsView::project) {
        let _ = write!(
            body,
            r#"<section class="stats">
<div class="stat"><h3>Average temperature</h3><p>{}</p></div>
<div class="stat"><h3>Average humidity</h3><p>{}</p></div>
<div class="stat"><h3>Average pressure</h3><p>{}</p></div>
<div class="stat"><h3>Sensors online</h3><p>{}</p></div>
</section>
"#,
            html_escape(&stats.avg_temperature),
            html_escape(&stats.avg_humidity),
            html_escape(&stats.avg_pressure),
            html_escape(&stats.online),
        );
    }

    body.push_str("<section class=\"cards\">\n");
    if snapshot.readings.is_empty() {
        let message = match snapshot.phase {
            Phase::Loading => "Loading sensors...",
            Phase::Uninitialized => "Dashboard stopped",
            Phase::Ready { .. } => "No sensors available right now",
        };
        let _ = writeln!(body, r#"<p class="empty">{}</p>"#, message);
    }
    for card in snapshot.readings.iter().map(|r| CardView::project(r, zone)) {
        render_card(&mut body, &card);
    }
    body.push_str("</section>\n");

    format!(
        r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<title>IoT Sensor Dashboard</title>
<style>
body {{ font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee; }}
.muted {{ color: #888; }}
.toolbar {{ display: flex; justify-content: space-between; align-items: center; }}
.stats, .cards {{ display: grid; grid-template-columns: repeat(auto-fill, minmax(220px, 1fr)); gap: 1rem; margin: 1rem 0; }}
.stat, .card {{ background: #16213e; padding: 1rem; border-radius: 8px; }}
.card .signal {{ font-weight: bold; }}
.signal.green {{ color: #4ade80; }} .signal.yellow {{ color: #facc15; }} .signal.red {{ color: #ff6b6b; }} .signal.grey {{ color: #888; }}
.toast {{ padding: 0.5rem 1rem; border-radius: 6px; margin-bottom: 0.5rem; background: #16213e; }}
.toast.error {{ border-left: 4px solid #ff6b6b; }} .toast.info {{ border-left: 4px solid #4ade80; }}
.spinner {{ display: inline-block; width: 0.8rem; height: 0.8rem; border: 2px solid #888; border-top-color: transparent; border-radius: 50%; animation: spin 1s linear infinite; }}
@keyframes spin {{ to {{ transform: rotate(360deg); }} }}
</style>
<script>
async function refreshNow() {{ await fetch('/api/refresh', {{ method: 'POST' }}); setTimeout(() => location.reload(), 500); }}
async function signOut() {{ await fetch('/api/logout', {{ method: 'POST' }}); location.reload(); }}
</script>
</head>
<body>
{body}</body>
</html>"#,
        body = body
    )
}

fn render_card(out: &mut String, card: &CardView) {
    let _ = write!(
        out,
        r#"<article class="card">
<h2>{id}</h2>
<p>Temperature: {temperature}</p>
<p>Humidity: {humidity}</p>
"#,
        id = html_escape(&card.id),
        temperature = html_escape(&card.temperature),
        humidity = html_escape(&card.humidity),
    );
    if let Some(pressure) = &card.pressure {
        let _ = writeln!(out, "<p>Pressure: {}</p>", html_escape(pressure));
    }
    if let Some(uptime) = &card.uptime {
        let _ = writeln!(out, "<p>Uptime: {}</p>", html_escape(uptime));
    }
    let _ = write!(
        out,
        r#"<p>RSSI: {rssi} <span class="signal {colour}">{signal}</span></p>
<p class="muted">Last updated: {updated}</p>
</article>
"#,
        rssi = html_escape(&card.rssi),
        colour = card.signal_colour,
        signal = html_escape(&card.signal),
        updated = html_escape(&card.last_updated),
    );
}

/// escape html special characters to prevent xss
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
