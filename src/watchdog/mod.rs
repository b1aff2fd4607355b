// Watchdog module - in-worker liveness monitoring of the external session

mod session;

pub use session::{Session, SessionEvent};

use crate::config::WatchdogConfig;
use crate::exit::ExitReason;
use crate::status::WatchdogStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Heartbeat bookkeeping, owned exclusively by the watchdog.
///
/// Created fresh with each watchdog and never carried across a worker
/// restart: a new worker gets a new watchdog.
#[derive(Debug)]
struct HeartbeatState {
    last_activity: Instant,
    last_heartbeat: Instant,
    missed_heartbeats: u32,
    shutting_down: bool,
}

impl HeartbeatState {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            last_activity: now,
            last_heartbeat: now,
            missed_heartbeats: 0,
            shutting_down: false,
        }
    }
}

struct WatchdogInner {
    config: WatchdogConfig,
    state: Mutex<HeartbeatState>,
    session: Mutex<Option<Arc<dyn Session>>>,
    /// Periodic probe tasks; replaced wholesale by start()
    probe_tasks: Mutex<Vec<JoinHandle<()>>>,
    /// Session event loop, spawned once by attach()
    event_task: Mutex<Option<JoinHandle<()>>>,
    /// One-way restart-required condition, consumed by the worker's
    /// top-level shutdown path
    restart_tx: watch::Sender<Option<ExitReason>>,
    attached: AtomicBool,
}

/// Liveness watchdog running inside the worker process.
///
/// Observes external-session activity on fixed intervals, accumulates
/// missed-heartbeat counters, and raises a restart-required condition when
/// connectivity is judged unrecoverable. It can only end its own process;
/// the supervisor on the other side of the process boundary observes the
/// resulting exit.
pub struct Watchdog {
    inner: Arc<WatchdogInner>,
}

impl Watchdog {
    pub fn new(config: WatchdogConfig) -> Self {
        let (restart_tx, _) = watch::channel(None);
        Self {
            inner: Arc::new(WatchdogInner {
                config,
                state: Mutex::new(HeartbeatState::new()),
                session: Mutex::new(None),
                probe_tasks: Mutex::new(Vec::new()),
                event_task: Mutex::new(None),
                restart_tx,
                attached: AtomicBool::new(false),
            }),
        }
    }

    /// Attach the external session and subscribe to its lifecycle events.
    ///
    /// Idempotent: only the first call takes effect.
    pub fn attach(&self, session: Arc<dyn Session>) {
        if self.inner.attached.swap(true, Ordering::SeqCst) {
            debug!("Session already attached to watchdog");
            return;
        }

        let mut rx = session.subscribe();
        *self.inner.session.lock().unwrap() = Some(session);
        info!("Session attached to liveness watchdog");

        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => inner.handle_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Watchdog lagged behind session events, skipped {}", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *self.inner.event_task.lock().unwrap() = Some(task);
    }

    /// Launch the periodic probe tasks, replacing any previous set.
    ///
    /// Five independently-scheduled tasks run until cancelled: the activity
    /// probe, the heartbeat probe, the aggregate health check, and two
    /// low-value liveness signals (pulse and latency report) aimed at an
    /// outer host-platform monitor.
    pub fn start(&self) {
        let mut tasks = self.inner.probe_tasks.lock().unwrap();
        for task in tasks.drain(..) {
            task.abort();
        }

        info!(
            "Liveness watchdog started (activity {:?}, heartbeat {:?}, health {:?})",
            self.inner.config.activity_interval(),
            self.inner.config.heartbeat_interval(),
            self.inner.config.health_check_interval()
        );

        let inner = Arc::clone(&self.inner);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.activity_interval());
            ticker.tick().await;
            loop {
                ticker.tick().await;
                inner.probe_activity();
            }
        }));

        let inner = Arc::clone(&self.inner);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.heartbeat_interval());
            ticker.tick().await;
            loop {
                ticker.tick().await;
                inner.probe_heartbeat();
            }
        }));

        let inner = Arc::clone(&self.inner);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.health_check_interval());
            ticker.tick().await;
            loop {
                ticker.tick().await;
                inner.check_health();
            }
        }));

        let inner = Arc::clone(&self.inner);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.pulse_interval());
            ticker.tick().await;
            loop {
                ticker.tick().await;
                inner.pulse();
            }
        }));

        let inner = Arc::clone(&self.inner);
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.config.latency_report_interval());
            ticker.tick().await;
            loop {
                ticker.tick().await;
                inner.report_latency();
            }
        }));
    }

    /// Run one activity probe (exposed for testing and manual ticks)
    pub fn probe_activity(&self) {
        self.inner.probe_activity();
    }

    /// Run one heartbeat probe (exposed for testing and manual ticks)
    pub fn probe_heartbeat(&self) {
        self.inner.probe_heartbeat();
    }

    /// Run one aggregate health check (exposed for testing and manual ticks)
    pub fn check_health(&self) {
        self.inner.check_health();
    }

    /// Raise the restart-required condition and stop probing.
    ///
    /// Raised at most once for the lifetime of the watchdog.
    pub fn trigger_restart(&self) {
        self.inner.trigger_restart();
    }

    /// Stop all probes without raising a restart. Idempotent; used by the
    /// worker's ordinary shutdown paths.
    pub fn stop(&self) {
        {
            let mut st = self.inner.state.lock().unwrap();
            if st.shutting_down {
                return;
            }
            st.shutting_down = true;
        }
        info!("Stopping liveness watchdog");
        self.inner.cancel_tasks();
    }

    /// Subscribe to the restart-required condition.
    ///
    /// The channel holds `None` until the watchdog raises a restart, then
    /// permanently carries the reason.
    pub fn restart_signal(&self) -> watch::Receiver<Option<ExitReason>> {
        self.inner.restart_tx.subscribe()
    }

    /// Resolve once the watchdog requests a restart.
    ///
    /// The worker's top-level shutdown path awaits this and exits the
    /// process with the reason's exit code.
    pub async fn wait_for_restart(&self) -> ExitReason {
        let mut rx = self.inner.restart_tx.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                // Sender lives inside the watchdog; a closed channel means
                // the watchdog is gone and no restart will ever be raised
                std::future::pending::<()>().await;
            }
        }
    }

    /// Read-only snapshot of the watchdog's connectivity view
    pub fn status(&self) -> WatchdogStatus {
        let (missed, last_activity) = {
            let st = self.inner.state.lock().unwrap();
            (st.missed_heartbeats, st.last_activity)
        };
        WatchdogStatus {
            missed_heartbeats: missed,
            last_activity_ms_ago: last_activity.elapsed().as_millis() as u64,
            ready: self.inner.session_ready(),
        }
    }
}

impl WatchdogInner {
    fn session_ready(&self) -> bool {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .map(|s| s.is_ready())
            .unwrap_or(false)
    }

    fn session_latency(&self) -> Option<u64> {
        self.session
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|s| s.latency_ms())
    }

    fn handle_event(&self, event: SessionEvent) {
        let now = Instant::now();
        let mut st = self.state.lock().unwrap();
        match event {
            SessionEvent::Ready => {
                st.last_activity = now;
                st.last_heartbeat = now;
                st.missed_heartbeats = 0;
                info!("Session ready, liveness monitoring active");
            }
            SessionEvent::Reconnecting => {
                st.last_heartbeat = now;
                info!("Session reconnecting, resetting heartbeat");
            }
            SessionEvent::Error => {
                st.missed_heartbeats += 1;
                warn!(
                    "Session error, missed heartbeats now {}",
                    st.missed_heartbeats
                );
            }
            SessionEvent::Disconnect => {
                warn!("Session disconnected, monitoring for reconnection");
            }
        }
    }

    fn probe_activity(&self) {
        let ready = self.session_ready();
        let mut st = self.state.lock().unwrap();
        if st.shutting_down {
            return;
        }
        if ready {
            st.last_activity = Instant::now();
            st.missed_heartbeats = 0;
            debug!("Session activity confirmed");
        } else {
            st.missed_heartbeats += 1;
            debug!(
                "Session not ready during activity probe ({}/{})",
                st.missed_heartbeats, self.config.max_missed_heartbeats
            );
        }
    }

    fn probe_heartbeat(&self) {
        let ready = self.session_ready();
        let mut st = self.state.lock().unwrap();
        if st.shutting_down {
            return;
        }
        if ready {
            st.last_heartbeat = Instant::now();
            st.missed_heartbeats = 0;
            debug!("Session heartbeat successful");
        } else {
            st.missed_heartbeats += 1;
            debug!(
                "Session heartbeat failed ({}/{})",
                st.missed_heartbeats, self.config.max_missed_heartbeats
            );
        }
    }

    /// Inspect aggregate state and decide whether a restart is warranted.
    ///
    /// Two triggers: the session is not ready with the missed-heartbeat
    /// counter at threshold, or no activity for the whole stall window
    /// even though the session self-reports ready (a session can be
    /// "ready" yet silently stuck).
    fn check_health(&self) {
        let ready = self.session_ready();
        let latency = self.session_latency();

        let restart = {
            let mut st = self.state.lock().unwrap();
            if st.shutting_down {
                return;
            }

            let since_activity = st.last_activity.elapsed();

            if ready {
                match latency {
                    Some(ms) => {
                        info!(
                            "Health check: ready, {}ms latency, {} missed heartbeats",
                            ms, st.missed_heartbeats
                        );
                        if ms > 0 && ms < self.config.max_healthy_latency_ms {
                            st.missed_heartbeats = 0;
                        }
                    }
                    None => info!(
                        "Health check: ready, latency unknown, {} missed heartbeats",
                        st.missed_heartbeats
                    ),
                }
            }

            if !ready && st.missed_heartbeats >= self.config.max_missed_heartbeats {
                error!(
                    "Health check failed: {} missed heartbeats, last activity {:?} ago",
                    st.missed_heartbeats, since_activity
                );
                true
            } else if since_activity > self.config.stall_window() {
                warn!(
                    "No session activity for {:?}, treating connection as stalled",
                    since_activity
                );
                true
            } else {
                false
            }
        };

        if restart {
            self.trigger_restart();
        }
    }

    /// Low-value liveness signal for the outer host-platform monitor
    fn pulse(&self) {
        {
            let st = self.state.lock().unwrap();
            if st.shutting_down {
                return;
            }
        }
        if let Some(ref path) = self.config.keepalive_file {
            let stamp = chrono::Utc::now().timestamp_millis().to_string();
            if let Err(e) = std::fs::write(path, stamp) {
                debug!("Failed to touch keepalive file {}: {}", path.display(), e);
            }
        }
        debug!("Watchdog pulse");
    }

    /// Periodic latency line so the host log shows the session is observed
    fn report_latency(&self) {
        {
            let st = self.state.lock().unwrap();
            if st.shutting_down {
                return;
            }
        }
        match self.session_latency() {
            Some(ms) => info!("Session latency report: {}ms", ms),
            None => debug!("Session latency unknown"),
        }
    }

    fn trigger_restart(&self) {
        {
            let mut st = self.state.lock().unwrap();
            if st.shutting_down {
                return;
            }
            st.shutting_down = true;
        }
        info!("Requesting worker restart: session connectivity judged unrecoverable");
        self.cancel_tasks();
        self.restart_tx.send_replace(Some(ExitReason::HealthRestart));
    }

    fn cancel_tasks(&self) {
        for task in self.probe_tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        if let Some(task) = self.event_task.lock().unwrap().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU64;

    struct FakeSession {
        ready: AtomicBool,
        latency: AtomicU64,
        events: broadcast::Sender<SessionEvent>,
    }

    impl FakeSession {
        fn new(ready: bool) -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self {
                ready: AtomicBool::new(ready),
                latency: AtomicU64::new(50),
                events,
            })
        }
    }

    impl Session for FakeSession {
        fn is_ready(&self) -> bool {
            self.ready.load(Ordering::SeqCst)
        }

        fn latency_ms(&self) -> Option<u64> {
            Some(self.latency.load(Ordering::SeqCst))
        }

        fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
            self.events.subscribe()
        }
    }

    fn test_config() -> WatchdogConfig {
        WatchdogConfig {
            stall_window_secs: 3600,
            ..WatchdogConfig::default()
        }
    }

    #[tokio::test]
    async fn test_missed_heartbeats_accumulate_when_not_ready() {
        let watchdog = Watchdog::new(test_config());
        watchdog.attach(FakeSession::new(false));

        watchdog.probe_heartbeat();
        watchdog.probe_heartbeat();
        watchdog.probe_activity();

        assert_eq!(watchdog.status().missed_heartbeats, 3);
    }

    #[tokio::test]
    async fn test_ready_probe_resets_counter() {
        let session = FakeSession::new(false);
        let watchdog = Watchdog::new(test_config());
        watchdog.attach(session.clone());

        watchdog.probe_heartbeat();
        watchdog.probe_heartbeat();
        assert_eq!(watchdog.status().missed_heartbeats, 2);

        session.ready.store(true, Ordering::SeqCst);
        watchdog.probe_heartbeat();
        assert_eq!(watchdog.status().missed_heartbeats, 0);
    }

    #[tokio::test]
    async fn test_health_check_below_threshold_no_restart() {
        let watchdog = Watchdog::new(test_config());
        watchdog.attach(FakeSession::new(false));

        watchdog.probe_heartbeat();
        watchdog.probe_heartbeat();
        watchdog.check_health();

        assert!(watchdog.restart_signal().borrow().is_none());
    }

    #[tokio::test]
    async fn test_health_check_at_threshold_raises_restart_once() {
        let watchdog = Watchdog::new(test_config());
        watchdog.attach(FakeSession::new(false));

        watchdog.probe_heartbeat();
        watchdog.probe_heartbeat();
        watchdog.probe_heartbeat();

        let mut rx = watchdog.restart_signal();
        watchdog.check_health();
        assert_eq!(*rx.borrow_and_update(), Some(ExitReason::HealthRestart));

        // Further probes and checks are no-ops once shutting down
        watchdog.probe_heartbeat();
        watchdog.check_health();
        assert_eq!(watchdog.status().missed_heartbeats, 3);
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test]
    async fn test_event_loop_error_increments_ready_resets() {
        let session = FakeSession::new(false);
        let watchdog = Watchdog::new(test_config());
        watchdog.attach(session.clone());

        session.events.send(SessionEvent::Error).unwrap();
        session.events.send(SessionEvent::Error).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(watchdog.status().missed_heartbeats, 2);

        session.events.send(SessionEvent::Ready).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(watchdog.status().missed_heartbeats, 0);
    }

    #[tokio::test]
    async fn test_attach_is_idempotent() {
        let session = FakeSession::new(false);
        let watchdog = Watchdog::new(test_config());
        watchdog.attach(session.clone());
        watchdog.attach(session.clone());

        session.events.send(SessionEvent::Error).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // A double subscription would have counted the error twice
        assert_eq!(watchdog.status().missed_heartbeats, 1);
    }

    #[tokio::test]
    async fn test_stall_guard_fires_even_when_ready() {
        let config = WatchdogConfig {
            stall_window_secs: 0,
            ..WatchdogConfig::default()
        };
        let watchdog = Watchdog::new(config);
        watchdog.attach(FakeSession::new(true));

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        watchdog.check_health();

        assert_eq!(
            *watchdog.restart_signal().borrow(),
            Some(ExitReason::HealthRestart)
        );
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_raises_nothing() {
        let watchdog = Watchdog::new(test_config());
        watchdog.attach(FakeSession::new(false));
        watchdog.start();

        watchdog.stop();
        watchdog.stop();

        assert!(watchdog.restart_signal().borrow().is_none());
        // trigger_restart after stop is also a no-op
        watchdog.trigger_restart();
        assert!(watchdog.restart_signal().borrow().is_none());
    }
}
