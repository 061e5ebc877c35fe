//! ==============================================================================
//! presenter.rs - dashboard state machine
//! ==============================================================================
//!
//! purpose:
//!     owns the current ReadingSet and everything derived from it. it does no
//!     i/o: the driver (dashboard.rs) performs fetches and subscriptions and
//!     reports results back, together with the current time.
//!
//! states:
//!
//! ```text
//!     Uninitialized ──start──▶ Loading ──data/failure──▶ Ready
//!           ▲                                             │  ▲
//!           └───────────────stop──────────────────────────┤  │ data/failure
//!                                                         ▼  │
//!                                               Ready{stale} (fetch in flight)
//!
//!     - a refresh never blanks the screen: Ready{stale} keeps the last set
//!     - a failure keeps the last set and queues one error notification
//!     - at most one fetch is in flight; refresh/tick while one is pending is
//!       reported as Coalesced and changes nothing
//!     - push: once the subscription ends, refresh opens a new one instead
//!       of acknowledging
//! ```
//!
//! tickets:
//!     every fetch and subscription is tagged with the epoch it was issued
//!     in. stop() advances the epoch, so anything that arrives afterwards is
//!     discarded without touching state.
//!
//! ==============================================================================

use crate::domain::ReadingSet;
use crate::error::{DashboardError, SourceError};
use crate::session::Session;
use crate::source::{SourceMode, SourceResult};
use crate::stats::AggregateStats;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Phase {
    Uninitialized,
    Loading,
    Ready { stale: bool },
}

/// identifies one fetch or one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    epoch: u64,
    seq: u64,
}

/// what start() asks the driver to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Startup {
    /// fetch now and arm the periodic timer
    Fetch(Ticket),
    Subscribe(Ticket),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Refresh {
    /// the driver must run a fetch for this ticket
    Fetch(Ticket),
    /// push variant: the store is already current
    Acknowledged,
    /// push variant: the last subscription ended; the driver must open a
    /// new one for this ticket
    Subscribe(Ticket),
    /// a fetch is already in flight
    Coalesced,
    /// nothing to refresh yet (not started, or still on the first load)
    NotReady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    Failed,
    /// stale ticket or stopped presenter
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Error,
}

/// non-blocking, user-visible message
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// read-only copy of presenter state for rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub phase: Phase,
    pub readings: ReadingSet,
    pub stats: Option<AggregateStats>,
    pub last_refreshed: Option<DateTime<Utc>>,
    pub user_display_name: Option<String>,
    /// a push subscription is open
    pub live: bool,
}

#[derive(Debug)]
pub struct Presenter {
    mode: SourceMode,
    session: Session,
    phase: Phase,
    readings: ReadingSet,
    stats: Option<AggregateStats>,
    last_refreshed: Option<DateTime<Utc>>,
    epoch: u64,
    seq: u64,
    in_flight: Option<Ticket>,
    subscription: Option<Ticket>,
    /// the last push delivery was an error
    push_failed: bool,
    notifications: Vec<Notification>,
}

impl Presenter {
    pub fn new(mode: SourceMode, session: Session) -> Self {
        Self {
            mode,
            session,
            phase: Phase::Uninitialized,
            readings: ReadingSet::new(),
            stats: None,
            last_refreshed: None,
            epoch: 0,
            seq: 0,
            in_flight: None,
            subscription: None,
            push_failed: false,
            notifications: Vec::new(),
        }
    }

    pub fn mode(&self) -> SourceMode {
        self.mode
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn readings(&self) -> &ReadingSet {
        &self.readings
    }

    pub fn stats(&self) -> Option<&AggregateStats> {
        self.stats.as_ref()
    }

    pub fn last_refreshed(&self) -> Option<DateTime<Utc>> {
        self.last_refreshed
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// true while the spinner should show
    pub fn is_busy(&self) -> bool {
        matches!(self.phase, Phase::Loading | Phase::Ready { stale: true })
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            phase: self.phase,
            readings: self.readings.clone(),
            stats: self.stats.clone(),
            last_refreshed: self.last_refreshed,
            user_display_name: self.session.user_display_name().map(str::to_string),
            live: self.subscription.is_some(),
        }
    }

    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        std::mem::take(&mut self.notifications)
    }

    /// Uninitialized -> Loading; starts from an empty set
    pub fn start(&mut self) -> Result<Startup, DashboardError> {
        if !self.session.is_authenticated() {
            return Err(DashboardError::NotAuthenticated);
        }
        if self.phase != Phase::Uninitialized {
            return Err(DashboardError::AlreadyStarted);
        }

        self.phase = Phase::Loading;
        self.readings = ReadingSet::new();
        self.stats = None;
        self.last_refreshed = None;
        self.push_failed = false;

        let ticket = self.issue();
        Ok(match self.mode {
            SourceMode::Polling => {
                self.in_flight = Some(ticket);
                Startup::Fetch(ticket)
            }
            SourceMode::Push => {
                self.subscription = Some(ticket);
                Startup::Subscribe(ticket)
            }
        })
    }

    /// manual refresh
    pub fn refresh(&mut self, now: DateTime<Utc>) -> Refresh {
        let outcome = self.begin_refresh();
        if outcome == Refresh::Acknowledged {
            self.last_refreshed = Some(now);
            self.notify(
                NotificationLevel::Info,
                "Data refreshed",
                "Sensor data is up to date",
                now,
            );
        }
        outcome
    }

    /// periodic timer; polling only
    pub fn tick(&mut self) -> Refresh {
        match self.mode {
            SourceMode::Polling => self.begin_refresh(),
            SourceMode::Push => Refresh::NotReady,
        }
    }

    fn begin_refresh(&mut self) -> Refresh {
        if self.in_flight.is_some() {
            return Refresh::Coalesced;
        }
        if !matches!(self.phase, Phase::Ready { .. }) {
            return Refresh::NotReady;
        }
        match self.mode {
            SourceMode::Push => match self.subscription {
                Some(_) if self.phase == (Phase::Ready { stale: true }) => Refresh::Coalesced,
                Some(_) => Refresh::Acknowledged,
                None => {
                    let ticket = self.issue();
                    self.subscription = Some(ticket);
                    self.push_failed = false;
                    self.phase = Phase::Ready { stale: true };
                    Refresh::Subscribe(ticket)
                }
            },
            SourceMode::Polling => {
                let ticket = self.issue();
                self.in_flight = Some(ticket);
                self.phase = Phase::Ready { stale: true };
                Refresh::Fetch(ticket)
            }
        }
    }

    /// result of the fetch identified by `ticket`
    pub fn complete_fetch(&mut self, ticket: Ticket, result: SourceResult, now: DateTime<Utc>) -> Outcome {
        if self.in_flight != Some(ticket) {
            tracing::debug!(?ticket, "discarding stale fetch result");
            return Outcome::Discarded;
        }
        self.in_flight = None;
        self.settle(result, now)
    }

    /// update pushed by the subscription identified by `ticket`
    pub fn apply_push(&mut self, ticket: Ticket, result: SourceResult, now: DateTime<Utc>) -> Outcome {
        if self.subscription != Some(ticket) {
            tracing::debug!(?ticket, "discarding update from a closed subscription");
            return Outcome::Discarded;
        }
        self.push_failed = result.is_err();
        self.settle(result, now)
    }

    /// the subscription identified by `ticket` will deliver nothing more.
    /// warns once, unless its last delivery already did.
    pub fn subscription_ended(&mut self, ticket: Ticket, now: DateTime<Utc>) -> Outcome {
        if self.subscription != Some(ticket) {
            tracing::debug!(?ticket, "ignoring end of a closed subscription");
            return Outcome::Discarded;
        }
        self.subscription = None;
        self.phase = Phase::Ready { stale: false };
        if !self.push_failed {
            self.notify(
                NotificationLevel::Error,
                "Error",
                "Live updates stopped; refresh to reconnect",
                now,
            );
        }
        self.push_failed = false;
        Outcome::Failed
    }

    /// tear down; idempotent. the last set stays visible until the next start
    pub fn stop(&mut self) -> bool {
        let was_running = self.phase != Phase::Uninitialized;
        self.epoch += 1;
        self.in_flight = None;
        self.subscription = None;
        self.phase = Phase::Uninitialized;
        was_running
    }

    /// stop and end the session (logout)
    pub fn sign_out(&mut self) {
        self.stop();
        self.readings = ReadingSet::new();
        self.stats = None;
        self.last_refreshed = None;
        self.session.end();
    }

    fn settle(&mut self, result: SourceResult, now: DateTime<Utc>) -> Outcome {
        match result {
            Ok(readings) => {
                self.stats = AggregateStats::compute(&readings);
                self.readings = readings;
                self.last_refreshed = Some(now);
                self.phase = Phase::Ready { stale: false };
                Outcome::Applied
            }
            Err(e) => {
                self.phase = Phase::Ready { stale: false };
                self.notify(NotificationLevel::Error, "Error", &failure_message(&e), now);
                Outcome::Failed
            }
        }
    }

    fn issue(&mut self) -> Ticket {
        self.seq += 1;
        Ticket { epoch: self.epoch, seq: self.seq }
    }

    fn notify(&mut self, level: NotificationLevel, title: &str, message: &str, at: DateTime<Utc>) {
        self.notifications.push(Notification {
            level,
            title: title.to_string(),
            message: message.to_string(),
            at,
        });
    }
}

fn failure_message(e: &SourceError) -> String {
    match e {
        SourceError::Unavailable(detail) => format!("Unable to fetch sensor data ({})", detail),
        SourceError::Decode(detail) => format!("Sensor data could not be read ({})", detail),
    }
}
