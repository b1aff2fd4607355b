use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use vigil::config::WatchdogConfig;
use vigil::exit::ExitReason;
use vigil::watchdog::{Session, SessionEvent, Watchdog};

struct FakeSession {
    ready: AtomicBool,
    events: broadcast::Sender<SessionEvent>,
}

impl FakeSession {
    fn new(ready: bool) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            ready: AtomicBool::new(ready),
            events,
        })
    }

    fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }
}

impl Session for FakeSession {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn latency_ms(&self) -> Option<u64> {
        if self.is_ready() {
            Some(50)
        } else {
            None
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }
}

fn fast_config() -> WatchdogConfig {
    WatchdogConfig {
        activity_interval_secs: 1,
        heartbeat_interval_secs: 1,
        health_check_interval_secs: 1,
        pulse_interval_secs: 1,
        latency_report_interval_secs: 3600,
        max_missed_heartbeats: 3,
        stall_window_secs: 3600,
        max_healthy_latency_ms: 1000,
        keepalive_file: None,
    }
}

#[tokio::test]
async fn test_timer_driven_probes_raise_restart_when_not_ready() {
    let watchdog = Watchdog::new(fast_config());
    watchdog.attach(FakeSession::new(false));
    watchdog.start();

    // With 1s probes and threshold 3, the health check fires within seconds
    let reason = tokio::time::timeout(Duration::from_secs(10), watchdog.wait_for_restart())
        .await
        .expect("watchdog should have requested a restart");

    assert_eq!(reason, ExitReason::HealthRestart);
    assert_eq!(reason.exit_code(), vigil::exit::RESTART_EXIT_CODE);
}

#[tokio::test]
async fn test_ready_session_stays_healthy() {
    let watchdog = Watchdog::new(fast_config());
    watchdog.attach(FakeSession::new(true));
    watchdog.start();

    tokio::time::sleep(Duration::from_millis(2500)).await;

    let status = watchdog.status();
    assert_eq!(status.missed_heartbeats, 0);
    assert!(status.ready);
    assert!(watchdog.restart_signal().borrow().is_none());

    watchdog.stop();
}

#[tokio::test]
async fn test_recovery_before_threshold_avoids_restart() {
    let session = FakeSession::new(false);
    let watchdog = Watchdog::new(fast_config());
    watchdog.attach(session.clone());

    // Two misses, then the session comes back
    watchdog.probe_heartbeat();
    watchdog.probe_heartbeat();
    session.set_ready(true);
    session.events.send(SessionEvent::Ready).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    watchdog.check_health();

    let status = watchdog.status();
    assert_eq!(status.missed_heartbeats, 0);
    assert!(watchdog.restart_signal().borrow().is_none());
}

#[tokio::test]
async fn test_pulse_touches_keepalive_file() {
    let temp = tempfile::tempdir().unwrap();
    let keepalive = temp.path().join("keepalive");

    let config = WatchdogConfig {
        keepalive_file: Some(keepalive.clone()),
        ..fast_config()
    };
    let watchdog = Watchdog::new(config);
    watchdog.attach(FakeSession::new(true));
    watchdog.start();

    tokio::time::sleep(Duration::from_millis(2500)).await;
    watchdog.stop();

    let contents = std::fs::read_to_string(&keepalive).expect("keepalive file should exist");
    let stamp: i64 = contents.parse().expect("keepalive file should hold a timestamp");
    assert!(stamp > 0);
}

#[tokio::test]
async fn test_restart_signal_observed_by_late_subscriber() {
    // The worker's top-level handler may subscribe after the raise
    let watchdog = Watchdog::new(fast_config());
    watchdog.attach(FakeSession::new(false));

    watchdog.trigger_restart();

    assert_eq!(
        *watchdog.restart_signal().borrow(),
        Some(ExitReason::HealthRestart)
    );
    let reason = tokio::time::timeout(Duration::from_secs(1), watchdog.wait_for_restart())
        .await
        .expect("already-raised signal should resolve immediately");
    assert_eq!(reason, ExitReason::HealthRestart);
}
