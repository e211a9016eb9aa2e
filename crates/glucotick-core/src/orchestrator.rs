//! The polling monitor.
//!
//! A single task owns every piece of mutable state and processes [`Event`]s
//! from one channel. Fetches and timers are spawned tasks that post events
//! back; each is tracked by a `JoinHandle` and aborted on teardown.
//!
//! ```text
//!  MonitorHandle ──┐
//!  timers ─────────┼──▶ mpsc ──▶ MonitorLoop ──▶ DisplaySink
//!  fetch tasks ────┘                 │
//!                                    ├──▶ DurableCache
//!                                    └──▶ Provider (spawned fetches)
//! ```
//!
//! Results carry the provider generation they were started under; anything
//! from a superseded generation is dropped before it reaches the caches.

use std::ops::{Index, IndexMut};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::adapters::{DefaultProviderFactory, ProviderFactory};
use crate::alert::{AlertEvaluator, Notification};
use crate::cache::EphemeralCache;
use crate::config::{ConfigSource, ConnectionParams, Settings};
use crate::display::{self, DisplayInput, Snapshot};
use crate::durable::DurableCache;
use crate::provider::{FetchKind, Provider, SourceError, SourceErrorKind};
use crate::retry::{FailureAction, FetchPhase, FetchState, RetryPolicy};
use crate::{HistoryBatch, Reading, UtcDateTime};

/// Receives everything the monitor produces.
pub trait DisplaySink: Send + Sync {
    fn publish(&self, snapshot: &Snapshot);
    fn notify(&self, notification: &Notification);
}

/// Timing knobs. Defaults match the desktop panel behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOptions {
    pub current_interval: Duration,
    /// Minimum gap between current-reading dispatches from ticks.
    pub min_fetch_interval: Duration,
    pub initial_delay: Duration,
    pub reload_debounce: Duration,
    /// Age of the last attempt beyond which `refresh_if_stale` fetches.
    pub refresh_after: Duration,
    pub retry: RetryPolicy,
}

impl Default for MonitorOptions {
    fn default() -> Self {
        Self {
            current_interval: Duration::from_secs(60),
            min_fetch_interval: Duration::from_secs(30),
            initial_delay: Duration::from_secs(2),
            reload_debounce: Duration::from_secs(1),
            refresh_after: Duration::from_secs(300),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug)]
enum Outcome {
    Current(Result<Reading, SourceError>),
    History(Result<HistoryBatch, SourceError>),
}

impl Outcome {
    fn kind(&self) -> FetchKind {
        match self {
            Self::Current(_) => FetchKind::Current,
            Self::History(_) => FetchKind::History,
        }
    }
}

#[derive(Debug)]
enum Event {
    InitialFetch,
    Tick(FetchKind),
    Retry { kind: FetchKind, generation: u64 },
    CooldownExpired { kind: FetchKind, generation: u64 },
    /// `started` is the dispatch instant, not the arrival time.
    Completed {
        generation: u64,
        started: Instant,
        outcome: Outcome,
    },
    ConfigChanged,
    ReloadDue,
    Refresh { only_if_stale: bool },
    SetWindow(u32),
    Shutdown,
}

#[derive(Debug, Default)]
struct PerKind<T> {
    current: T,
    history: T,
}

impl<T> Index<FetchKind> for PerKind<T> {
    type Output = T;

    fn index(&self, kind: FetchKind) -> &T {
        match kind {
            FetchKind::Current => &self.current,
            FetchKind::History => &self.history,
        }
    }
}

impl<T> IndexMut<FetchKind> for PerKind<T> {
    fn index_mut(&mut self, kind: FetchKind) -> &mut T {
        match kind {
            FetchKind::Current => &mut self.current,
            FetchKind::History => &mut self.history,
        }
    }
}

type Slot = Option<JoinHandle<()>>;

/// Replaces a single-slot timer, aborting whatever was pending.
fn arm(slot: &mut Slot, handle: JoinHandle<()>) {
    if let Some(previous) = slot.replace(handle) {
        previous.abort();
    }
}

fn disarm(slot: &mut Slot) {
    if let Some(handle) = slot.take() {
        handle.abort();
    }
}

#[derive(Debug, Default)]
struct Timers {
    initial: Slot,
    ticks: PerKind<Slot>,
    retries: PerKind<Slot>,
    cooldowns: PerKind<Slot>,
    fetches: PerKind<Slot>,
    reload: Slot,
}

impl Timers {
    /// Aborts everything tied to the current provider generation.
    fn abort_generation(&mut self) {
        for kind in [FetchKind::Current, FetchKind::History] {
            disarm(&mut self.retries[kind]);
            disarm(&mut self.cooldowns[kind]);
            disarm(&mut self.fetches[kind]);
        }
    }

    fn abort_all(&mut self) {
        self.abort_generation();
        disarm(&mut self.initial);
        disarm(&mut self.reload);
        disarm(&mut self.ticks.current);
        disarm(&mut self.ticks.history);
    }
}

/// Configures and starts a monitor.
pub struct MonitorBuilder {
    config: Arc<dyn ConfigSource>,
    factory: Arc<dyn ProviderFactory>,
    sink: Arc<dyn DisplaySink>,
    durable: Option<DurableCache>,
    options: MonitorOptions,
}

impl MonitorBuilder {
    pub fn new(config: Arc<dyn ConfigSource>, sink: Arc<dyn DisplaySink>) -> Self {
        Self {
            config,
            factory: Arc::new(DefaultProviderFactory::default()),
            sink,
            durable: None,
            options: MonitorOptions::default(),
        }
    }

    pub fn provider_factory(mut self, factory: Arc<dyn ProviderFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Without a durable cache nothing survives restarts.
    pub fn durable_cache(mut self, cache: DurableCache) -> Self {
        self.durable = Some(cache);
        self
    }

    pub fn options(mut self, options: MonitorOptions) -> Self {
        self.options = options;
        self
    }

    /// Spawns the monitor loop on the current tokio runtime.
    pub fn start(self) -> MonitorHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let settings = self.config.settings();
        let provider = self.factory.build(self.config.clone());

        let monitor = MonitorLoop {
            connection: settings.connection(),
            window_hours: settings.graph_hours,
            ephemeral: EphemeralCache::for_interval_minutes(settings.history_fetch_interval.max(1)),
            settings,
            config: self.config,
            factory: self.factory,
            sink: self.sink,
            durable: self.durable,
            options: self.options,
            provider,
            generation: 0,
            current: None,
            history: HistoryBatch::default(),
            alerts: AlertEvaluator::default(),
            fetch: PerKind::default(),
            timers: Timers::default(),
            tx: tx.clone(),
        };

        let task = tokio::spawn(monitor.run(rx));
        MonitorHandle {
            tx,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Control surface for a running monitor.
///
/// Every method is a no-op once the monitor has shut down. Dropping the
/// handle shuts the monitor down.
#[derive(Debug)]
pub struct MonitorHandle {
    tx: mpsc::UnboundedSender<Event>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorHandle {
    /// Fetches both types now, subject to the in-flight guard.
    pub fn refresh(&self) {
        let _ = self.tx.send(Event::Refresh {
            only_if_stale: false,
        });
    }

    /// Refreshes only when the last current fetch is older than five minutes.
    pub fn refresh_if_stale(&self) {
        let _ = self.tx.send(Event::Refresh {
            only_if_stale: true,
        });
    }

    /// Re-windows history and republishes without fetching.
    pub fn set_window_hours(&self, hours: u32) {
        let _ = self.tx.send(Event::SetWindow(hours));
    }

    /// Schedules a debounced configuration reload.
    pub fn config_changed(&self) {
        let _ = self.tx.send(Event::ConfigChanged);
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Stops every timer and fetch and waits for the loop to exit.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Event::Shutdown);
        let task = self
            .task
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(error) = task.await {
                if error.is_panic() {
                    tracing::error!(%error, "monitor task panicked");
                }
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        let _ = self.tx.send(Event::Shutdown);
    }
}

struct MonitorLoop {
    config: Arc<dyn ConfigSource>,
    factory: Arc<dyn ProviderFactory>,
    sink: Arc<dyn DisplaySink>,
    durable: Option<DurableCache>,
    options: MonitorOptions,

    settings: Settings,
    connection: ConnectionParams,
    provider: Arc<dyn Provider>,
    generation: u64,

    current: Option<Reading>,
    history: HistoryBatch,
    ephemeral: EphemeralCache,
    alerts: AlertEvaluator,
    window_hours: u32,

    fetch: PerKind<FetchState>,
    timers: Timers,
    tx: mpsc::UnboundedSender<Event>,
}

impl MonitorLoop {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Event>) {
        tracing::info!(provider = %self.provider.id(), "monitor started");
        self.hydrate();
        self.publish();
        let initial = self.after(self.options.initial_delay, Event::InitialFetch);
        arm(&mut self.timers.initial, initial);

        while let Some(event) = rx.recv().await {
            if matches!(event, Event::Shutdown) {
                break;
            }
            self.handle(event);
        }

        self.timers.abort_all();
        self.provider.destroy();
        tracing::info!("monitor stopped");
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::InitialFetch => {
                self.timers.initial = None;
                self.dispatch(FetchKind::Current);
                self.dispatch(FetchKind::History);
                self.start_ticks();
            }
            Event::Tick(FetchKind::Current) => {
                let now = Instant::now();
                if self.fetch.current.due(now, self.options.min_fetch_interval) {
                    self.dispatch(FetchKind::Current);
                }
                self.publish();
            }
            Event::Tick(FetchKind::History) => self.dispatch(FetchKind::History),
            Event::Retry { kind, generation } => {
                if generation == self.generation {
                    self.timers.retries[kind] = None;
                    if self.fetch[kind].phase == FetchPhase::BackoffWait {
                        self.dispatch(kind);
                    }
                }
            }
            Event::CooldownExpired { kind, generation } => {
                if generation == self.generation {
                    self.timers.cooldowns[kind] = None;
                    self.fetch[kind].end_cooldown();
                    tracing::debug!(%kind, "retry cooldown over");
                }
            }
            Event::Completed {
                generation,
                started,
                outcome,
            } => self.complete(generation, started, outcome),
            Event::ConfigChanged => {
                let reload = self.after(self.options.reload_debounce, Event::ReloadDue);
                arm(&mut self.timers.reload, reload);
            }
            Event::ReloadDue => {
                self.timers.reload = None;
                self.reload();
            }
            Event::Refresh { only_if_stale } => {
                let stale = self.fetch.current.last_attempt_at.map_or(true, |at| {
                    Instant::now().saturating_duration_since(at) >= self.options.refresh_after
                });
                if !only_if_stale || stale {
                    self.dispatch(FetchKind::Current);
                    self.dispatch(FetchKind::History);
                }
            }
            Event::SetWindow(hours) => {
                self.window_hours = hours.max(1);
                self.publish();
            }
            Event::Shutdown => {}
        }
    }

    fn hydrate(&mut self) {
        let Some(entry) = self.durable.as_ref().and_then(DurableCache::load) else {
            return;
        };
        self.current = entry.reading;
        self.history = entry.history.unwrap_or_default();
        tracing::info!(
            has_reading = self.current.is_some(),
            history = self.history.len(),
            "hydrated from durable cache"
        );
    }

    fn after(&self, delay: Duration, event: Event) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(event);
        })
    }

    fn every(&self, period: Duration, kind: FetchKind) -> JoinHandle<()> {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(Event::Tick(kind)).is_err() {
                    break;
                }
            }
        })
    }

    fn history_period(&self) -> Duration {
        Duration::from_secs(u64::from(self.settings.history_fetch_interval.max(1)) * 60)
    }

    fn start_ticks(&mut self) {
        let current = self.every(self.options.current_interval, FetchKind::Current);
        arm(&mut self.timers.ticks.current, current);
        let history = self.every(self.history_period(), FetchKind::History);
        arm(&mut self.timers.ticks.history, history);
    }

    fn dispatch(&mut self, kind: FetchKind) {
        if !self.provider.is_configured() {
            tracing::debug!(%kind, provider = %self.provider.id(), "provider not configured");
            self.publish();
            return;
        }

        let now = Instant::now();
        if kind == FetchKind::History {
            if let Some(history) = self.ephemeral.get(now).cloned() {
                tracing::debug!(entries = history.len(), "using in-memory history");
                self.history = history;
                self.publish();
                return;
            }
        }

        if !self.fetch[kind].begin(now) {
            tracing::debug!(%kind, "fetch already in flight");
            return;
        }

        let provider = self.provider.clone();
        let tx = self.tx.clone();
        let generation = self.generation;
        let task = tokio::spawn(async move {
            let outcome = match kind {
                FetchKind::Current => Outcome::Current(provider.fetch_current().await),
                FetchKind::History => Outcome::History(provider.fetch_history().await),
            };
            let _ = tx.send(Event::Completed {
                generation,
                started: now,
                outcome,
            });
        });
        arm(&mut self.timers.fetches[kind], task);
    }

    fn complete(&mut self, generation: u64, started: Instant, outcome: Outcome) {
        let kind = outcome.kind();
        if generation != self.generation {
            tracing::debug!(%kind, generation, current = self.generation, "dropping superseded result");
            return;
        }
        self.timers.fetches[kind] = None;

        let now = Instant::now();
        let result = match outcome {
            Outcome::Current(Ok(reading)) => {
                self.fetch[kind].succeed(now);
                self.apply_reading(reading);
                Ok(())
            }
            Outcome::History(Ok(history)) => {
                self.fetch[kind].succeed(now);
                self.apply_history(history, started);
                Ok(())
            }
            Outcome::Current(Err(error)) | Outcome::History(Err(error)) => Err(error),
        };

        if let Err(error) = result {
            self.fail(kind, &error);
        }
    }

    fn apply_reading(&mut self, reading: Reading) {
        tracing::debug!(value = reading.value, timestamp = %reading.timestamp, "current reading");
        self.current = Some(reading);
        if let Some(durable) = &self.durable {
            durable.save_reading(&reading, UtcDateTime::now());
        }

        let notification = self.alerts.observe(
            reading.value,
            &self.settings.thresholds,
            &self.settings.notifications,
            self.settings.units,
        );
        self.publish();
        if let Some(notification) = notification {
            tracing::info!(body = %notification.body, "alert");
            self.sink.notify(&notification);
        }
    }

    /// The ephemeral entry ages from `started` so the next history tick,
    /// one TTL after dispatch, finds it expired.
    fn apply_history(&mut self, history: HistoryBatch, started: Instant) {
        tracing::debug!(
            entries = history.len(),
            cgm_interval = self.provider.cgm_interval(),
            "history batch"
        );
        if let Some(durable) = &self.durable {
            durable.save_history(&history, UtcDateTime::now());
        }
        self.ephemeral.put(history.clone(), started);
        self.history = history;
        self.publish();
    }

    fn fail(&mut self, kind: FetchKind, error: &SourceError) {
        let policy = self.options.retry;
        let action = self.fetch[kind].fail(error.retryable(), &policy);
        tracing::warn!(
            %kind,
            provider = %self.provider.id(),
            code = error.code(),
            retry_count = self.fetch[kind].retry_count,
            %error,
            "fetch failed"
        );

        match action {
            FailureAction::Retry { retry_count, delay } => {
                tracing::info!(%kind, retry_count, delay_secs = delay.as_secs(), "retry scheduled");
                let generation = self.generation;
                let retry = self.after(delay, Event::Retry { kind, generation });
                arm(&mut self.timers.retries[kind], retry);
            }
            FailureAction::Cooldown { after } => {
                tracing::warn!(%kind, cooldown_secs = after.as_secs(), "retries exhausted");
                if self.timers.cooldowns[kind].is_none() {
                    let generation = self.generation;
                    let cooldown = self.after(after, Event::CooldownExpired { kind, generation });
                    self.timers.cooldowns[kind] = Some(cooldown);
                }
                if kind == FetchKind::Current {
                    self.publish();
                }
            }
            FailureAction::GiveUp => {
                if error.kind() == SourceErrorKind::Config {
                    self.publish();
                }
            }
        }
    }

    /// Drops the provider and everything in flight for it.
    fn replace_provider(&mut self) {
        self.timers.abort_generation();
        self.provider.destroy();
        self.generation += 1;
        self.fetch.current.reset();
        self.fetch.history.reset();
        self.provider = self.factory.build(self.config.clone());
    }

    fn reload(&mut self) {
        if let Err(error) = self.config.reload() {
            tracing::warn!(%error, "config reload failed, keeping previous settings");
        }
        let previous = std::mem::replace(&mut self.settings, self.config.settings());
        let connection = self.settings.connection();

        self.ephemeral
            .set_ttl(Duration::from_secs(u64::from(self.settings.history_fetch_interval.max(1)) * 60));
        if previous.history_fetch_interval != self.settings.history_fetch_interval
            && self.timers.ticks.history.is_some()
        {
            let history = self.every(self.history_period(), FetchKind::History);
            arm(&mut self.timers.ticks.history, history);
        }
        if previous.graph_hours != self.settings.graph_hours {
            self.window_hours = self.settings.graph_hours;
        }

        if connection.provider != self.connection.provider {
            tracing::info!(
                from = %self.connection.provider,
                to = %connection.provider,
                "provider switched"
            );
            self.connection = connection;
            self.replace_provider();
            if let Some(durable) = &self.durable {
                durable.clear();
            }
            self.ephemeral.clear();
            self.current = None;
            self.history = HistoryBatch::default();
            self.alerts.reset();
            self.publish();
            self.dispatch(FetchKind::Current);
            self.dispatch(FetchKind::History);
        } else if connection != self.connection {
            tracing::info!(provider = %connection.provider, "connection settings changed");
            self.connection = connection;
            self.replace_provider();
            self.ephemeral.clear();
            self.dispatch(FetchKind::Current);
            self.dispatch(FetchKind::History);
        } else {
            if previous.units != self.settings.units {
                tracing::debug!(units = %self.settings.units, "units changed");
            }
            self.publish();
        }
    }

    fn publish(&self) {
        let snapshot = display::compose(DisplayInput {
            current: self.current.as_ref(),
            history: self.history.readings(),
            settings: &self.settings,
            configured: self.provider.is_configured(),
            current_exhausted: self.fetch.current.exhausted,
            window_hours: self.window_hours,
            now: UtcDateTime::now(),
        });
        self.sink.publish(&snapshot);
    }
}
