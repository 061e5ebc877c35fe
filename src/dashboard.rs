//! ==============================================================================
//! dashboard.rs - async driver around the presenter
//! ==============================================================================
//!
//! purpose:
//!     runs the presenter on a single tokio task and performs the i/o it asks
//!     for. this is the dashboard's one event loop:
//!
//! ```text
//!     ┌───────────────────────────────────────────────────────────┐
//!     │                      driver task                           │
//!     │  commands ─┐                                               │
//!     │  (refresh, │   ┌───────────┐   publish   ┌──────────────┐  │
//!     │  stop,     ├──▶│ presenter │────────────▶│ watch<View>  │──┼──▶ web server
//!     │  sign-out) │   └───────────┘             └──────────────┘  │
//!     │  timer ────┤         ▲                                     │
//!     │  fetch ────┤         │ tickets                             │
//!     │  push  ────┘         │                                     │
//!     └───────────────────────────────────────────────────────────┘
//!
//!     - polling: fetch at start, then every `interval` (missed ticks are
//!       delayed, never bunched). each fetch runs on its own task and reports
//!       back with its ticket.
//!     - push: subscribe at start; every delivery is applied in order. when
//!       the source closes its sink the subscription is dropped, and the next
//!       manual refresh subscribes again.
//! ```
//!
//! relationships:
//!     - uses: presenter.rs (all state transitions)
//!     - uses: source/* (fetches and subscriptions)
//!     - used by: server.rs (DashboardHandle), main.rs (Dashboard)
//!
//! ==============================================================================

use crate::error::DashboardError;
use crate::presenter::{Notification, NotificationLevel, Presenter, Refresh, Snapshot, Startup, Ticket};
use crate::session::Session;
use crate::source::{SourceResult, Subscription, TelemetrySource, UpdateSink};

use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// how many notifications the view keeps around
pub const NOTIFICATION_HISTORY: usize = 20;

/// everything the web layer needs to draw the dashboard
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    #[serde(flatten)]
    pub snapshot: Snapshot,
    /// spinner: first load or refresh in flight
    pub busy: bool,
    pub source: String,
    /// oldest first
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshOutcome {
    Started,
    Acknowledged,
    /// the live feed had ended and was reopened
    Resubscribed,
    Coalesced,
    NotReady,
}

enum Command {
    Refresh(oneshot::Sender<RefreshOutcome>),
    SignOut(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
}

// ==============================================================================
// public handles
// ==============================================================================

/// owner of the driver task; stop it exactly once when done
pub struct Dashboard {
    handle: DashboardHandle,
    task: Option<JoinHandle<()>>,
}

/// cheap, clone-able access for request handlers
#[derive(Clone)]
pub struct DashboardHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<DashboardView>,
}

impl Dashboard {
    /// start the presenter and its driver task.
    /// fails without spawning anything if the session isn't signed in.
    pub fn start(source: TelemetrySource, session: Session, interval: Duration) -> Result<Self, DashboardError> {
        let mut presenter = Presenter::new(source.mode(), session);
        let startup = presenter.start()?;

        let initial = DashboardView {
            snapshot: presenter.snapshot(),
            busy: presenter.is_busy(),
            source: source.name().to_string(),
            notifications: Vec::new(),
        };
        let (view_tx, view_rx) = watch::channel(initial);
        let (command_tx, command_rx) = mpsc::channel(16);
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();

        let driver = Driver {
            presenter,
            source,
            view: view_tx,
            history: VecDeque::with_capacity(NOTIFICATION_HISTORY),
            fetch_tx,
            fetch_task: None,
            subscription: None,
            interval,
        };
        let task = tokio::spawn(driver.run(startup, command_rx, fetch_rx));

        Ok(Self {
            handle: DashboardHandle { commands: command_tx, view: view_rx },
            task: Some(task),
        })
    }

    pub fn handle(&self) -> DashboardHandle {
        self.handle.clone()
    }

    /// stop the driver: no timer, no subscription, no pending fetch afterwards.
    /// safe to call more than once.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        let (reply, done) = oneshot::channel();
        if self.handle.commands.send(Command::Stop(reply)).await.is_ok() {
            let _ = done.await;
        }
        if let Err(e) = task.await {
            if !e.is_cancelled() {
                tracing::error!(error = %e, "dashboard driver panicked");
            }
        }
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl DashboardHandle {
    pub fn current(&self) -> DashboardView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DashboardView> {
        self.view.clone()
    }

    pub async fn refresh(&self) -> Result<RefreshOutcome, DashboardError> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Refresh(reply))
            .await
            .map_err(|_| DashboardError::Stopped)?;
        outcome.await.map_err(|_| DashboardError::Stopped)
    }

    /// end the session; the driver stops with it
    pub async fn sign_out(&self) -> Result<(), DashboardError> {
        let (reply, done) = oneshot::channel();
        self.commands
            .send(Command::SignOut(reply))
            .await
            .map_err(|_| DashboardError::Stopped)?;
        done.await.map_err(|_| DashboardError::Stopped)
    }
}

// ==============================================================================
// driver task
// ==============================================================================

type FetchResult = (Ticket, SourceResult);

struct Driver {
    presenter: Presenter,
    source: TelemetrySource,
    view: watch::Sender<DashboardView>,
    history: VecDeque<Notification>,
    fetch_tx: mpsc::UnboundedSender<FetchResult>,
    fetch_task: Option<JoinHandle<()>>,
    subscription: Option<(Ticket, Subscription)>,
    interval: Duration,
}

impl Driver {
    async fn run(
        mut self,
        startup: Startup,
        mut commands: mpsc::Receiver<Command>,
        mut fetches: mpsc::UnboundedReceiver<FetchResult>,
    ) {
        let mut timer = None;
        let mut pushes = None;

        match startup {
            Startup::Fetch(ticket) => {
                self.spawn_fetch(ticket);
                let mut interval = interval_at(Instant::now() + self.interval, self.interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                timer = Some(interval);
                tracing::info!(source = self.source.name(), interval_s = self.interval.as_secs_f64(), "polling started");
            }
            Startup::Subscribe(ticket) => {
                pushes = Some(self.subscribe(ticket));
                tracing::info!(source = self.source.name(), "subscription started");
            }
        }
        self.publish();

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Refresh(reply)) => {
                        let _ = reply.send(self.refresh(&mut pushes));
                    }
                    Some(Command::SignOut(reply)) => {
                        self.presenter.sign_out();
                        self.teardown();
                        tracing::info!("signed out, dashboard stopped");
                        let _ = reply.send(());
                        break;
                    }
                    Some(Command::Stop(reply)) => {
                        self.presenter.stop();
                        self.teardown();
                        tracing::info!("dashboard stopped");
                        let _ = reply.send(());
                        break;
                    }
                    None => {
                        self.presenter.stop();
                        self.teardown();
                        break;
                    }
                },
                Some((ticket, result)) = fetches.recv() => {
                    self.fetch_task = None;
                    let count = result.as_ref().map(|set| set.len()).ok();
                    let outcome = self.presenter.complete_fetch(ticket, result, Utc::now());
                    tracing::debug!(?outcome, readings = ?count, "fetch settled");
                    self.publish();
                }
                update = next_push(&mut pushes) => match update {
                    Some(result) => {
                        if let Some((ticket, _)) = &self.subscription {
                            let outcome = self.presenter.apply_push(*ticket, result, Utc::now());
                            tracing::debug!(?outcome, "push applied");
                            self.publish();
                        }
                    }
                    None => {
                        pushes = None;
                        if let Some((ticket, subscription)) = self.subscription.take() {
                            subscription.unsubscribe();
                            let outcome = self.presenter.subscription_ended(ticket, Utc::now());
                            tracing::warn!(?outcome, source = self.source.name(), "live feed ended");
                            self.publish();
                        }
                    }
                },
                _ = next_tick(&mut timer) => {
                    if let Refresh::Fetch(ticket) = self.presenter.tick() {
                        self.spawn_fetch(ticket);
                        self.publish();
                    } else {
                        tracing::debug!("timer tick coalesced with in-flight fetch");
                    }
                }
            }
        }
    }

    fn refresh(&mut self, pushes: &mut Option<mpsc::UnboundedReceiver<SourceResult>>) -> RefreshOutcome {
        let outcome = match self.presenter.refresh(Utc::now()) {
            Refresh::Fetch(ticket) => {
                self.spawn_fetch(ticket);
                RefreshOutcome::Started
            }
            Refresh::Subscribe(ticket) => {
                *pushes = Some(self.subscribe(ticket));
                tracing::info!(source = self.source.name(), "resubscribing");
                RefreshOutcome::Resubscribed
            }
            Refresh::Acknowledged => RefreshOutcome::Acknowledged,
            Refresh::Coalesced => RefreshOutcome::Coalesced,
            Refresh::NotReady => RefreshOutcome::NotReady,
        };
        self.publish();
        outcome
    }

    fn spawn_fetch(&mut self, ticket: Ticket) {
        let TelemetrySource::Polling(source) = &self.source else {
            return;
        };
        let source = Arc::clone(source);
        let tx = self.fetch_tx.clone();
        self.fetch_task = Some(tokio::spawn(async move {
            let result = source.fetch_readings().await;
            let _ = tx.send((ticket, result));
        }));
    }

    fn subscribe(&mut self, ticket: Ticket) -> mpsc::UnboundedReceiver<SourceResult> {
        let (sink, rx) = UpdateSink::channel();
        if let TelemetrySource::Push(source) = &self.source {
            self.subscription = Some((ticket, source.subscribe(sink)));
        }
        rx
    }

    fn teardown(&mut self) {
        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }
        if let Some((_, subscription)) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.publish();
    }

    /// push presenter state and fresh notifications to the view
    fn publish(&mut self) {
        for note in self.presenter.drain_notifications() {
            match note.level {
                NotificationLevel::Error => tracing::warn!(title = %note.title, "{}", note.message),
                NotificationLevel::Info => tracing::info!(title = %note.title, "{}", note.message),
            }
            if self.history.len() == NOTIFICATION_HISTORY {
                self.history.pop_front();
            }
            self.history.push_back(note);
        }

        self.view.send_replace(DashboardView {
            snapshot: self.presenter.snapshot(),
            busy: self.presenter.is_busy(),
            source: self.source.name().to_string(),
            notifications: self.history.iter().cloned().collect(),
        });
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        if let Some(task) = self.fetch_task.take() {
            task.abort();
        }
    }
}

async fn next_push(pushes: &mut Option<mpsc::UnboundedReceiver<SourceResult>>) -> Option<SourceResult> {
    match pushes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
