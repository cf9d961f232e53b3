//! The monitoring loop and its start/stop state machine.
//!
//! `Stopped → Starting → Running → Stopping → Stopped`. One worker thread runs
//! the capture/classify/mitigate cycle; cancellation is a flag the worker checks
//! during the inter-cycle delay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::audit::{AuditEvent, AuditRecorder};
use crate::capture::FrameSource;
use crate::config::Settings;
use crate::content_filter::ContentClassifier;
use crate::error::{ClassifyError, MonitorError};
use crate::mitigation::{DispatchReport, Dispatcher};
use crate::model_loader::ModelLoader;

const TASK_SLEEP_CHUNK_MS: u64 = 100;
pub const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// Capture failed or the model was not ready.
    Skipped,
    Clear {
        score: f64,
    },
    Alert {
        score: f64,
        dispatch: DispatchReport,
        event: Option<AuditEvent>,
    },
}

/// One capture → classify → decide → mitigate pass.
pub struct Cycle {
    source: Box<dyn FrameSource>,
    classifier: ContentClassifier,
    settings: Arc<Settings>,
    dispatcher: Dispatcher,
    recorder: AuditRecorder,
}

impl Cycle {
    pub fn new(
        source: Box<dyn FrameSource>,
        classifier: ContentClassifier,
        settings: Arc<Settings>,
        dispatcher: Dispatcher,
        recorder: AuditRecorder,
    ) -> Self {
        Self {
            source,
            classifier,
            settings,
            dispatcher,
            recorder,
        }
    }

    pub fn run_once(&self) -> CycleOutcome {
        let frame = match self.source.capture() {
            Ok(frame) => frame,
            Err(err) => {
                debug!("Skipping cycle, capture failed: {err}");
                return CycleOutcome::Skipped;
            }
        };

        let result = match self.classifier.classify(&frame) {
            Ok(result) => result,
            Err(ClassifyError::NotReady) => {
                debug!("Skipping cycle, model not loaded yet");
                return CycleOutcome::Skipped;
            }
            Err(err) => {
                warn!("Skipping cycle: {err}");
                return CycleOutcome::Skipped;
            }
        };

        if !result.is_explicit {
            return CycleOutcome::Clear {
                score: result.score,
            };
        }

        let dispatch = self.dispatcher.dispatch(&result, &self.settings.mitigation());
        let event = match self.recorder.record(&result, &frame) {
            Ok(event) => Some(event),
            Err(err) => {
                error!("Failed to record parent report event: {err}");
                None
            }
        };

        CycleOutcome::Alert {
            score: result.score,
            dispatch,
            event,
        }
    }
}

struct Shared {
    state: Mutex<MonitorState>,
    cancel: AtomicBool,
    loader: Arc<ModelLoader>,
    cycle: Cycle,
    interval: Duration,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Worker {
    handle: thread::JoinHandle<()>,
    done: mpsc::Receiver<()>,
}

/// Marks the monitor stopped when the worker leaves, including by panic.
struct ExitGuard {
    shared: Arc<Shared>,
    done: mpsc::Sender<()>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("Monitor worker panicked; marking monitor stopped");
        }
        *self.shared.lock_state() = MonitorState::Stopped;
        let _ = self.done.send(());
    }
}

pub struct Monitor {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    join_timeout: Duration,
}

impl Monitor {
    pub fn new(loader: Arc<ModelLoader>, cycle: Cycle, interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MonitorState::Stopped),
                cancel: AtomicBool::new(false),
                loader,
                cycle,
                interval,
            }),
            worker: Mutex::new(None),
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }

    /// How long `stop` waits for the worker before giving up on it.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    pub fn state(&self) -> MonitorState {
        *self.shared.lock_state()
    }

    /// Loads the model if needed, then begins polling.
    ///
    /// Blocks the caller for the duration of the model load. A no-op unless
    /// the monitor is `Stopped`.
    pub fn start(&self) -> Result<MonitorState, MonitorError> {
        {
            let mut state = self.shared.lock_state();
            if *state != MonitorState::Stopped {
                debug!("start() ignored, monitor is {:?}", *state);
                return Ok(*state);
            }
            *state = MonitorState::Starting;
            self.shared.cancel.store(false, Ordering::SeqCst);
        }

        info!("Starting monitor");
        let loaded = self
            .shared
            .loader
            .load(|percent, message| info!("Model load {percent}%: {message}"));

        let mut state = self.shared.lock_state();
        if let Err(err) = loaded {
            *state = MonitorState::Stopped;
            error!("Monitor not started: {err}");
            return Err(err.into());
        }
        if self.shared.cancel.load(Ordering::SeqCst) {
            *state = MonitorState::Stopped;
            info!("Monitor stopped before polling began");
            return Ok(MonitorState::Stopped);
        }

        let (done_tx, done_rx) = mpsc::channel();
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("mindwall-monitor".into())
            .spawn(move || run_worker(shared, done_tx));

        match spawned {
            Ok(handle) => {
                *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(Worker {
                    handle,
                    done: done_rx,
                });
                *state = MonitorState::Running;
                info!("Monitor running");
                Ok(MonitorState::Running)
            }
            Err(err) => {
                *state = MonitorState::Stopped;
                error!("Failed to spawn monitor worker: {err}");
                Err(MonitorError::Spawn(err))
            }
        }
    }

    /// Requests cancellation and waits, bounded, for the worker to exit.
    ///
    /// Returns the state afterwards: `Stopped`, or `Stopping` if the worker is
    /// still finishing its cycle (or the model load is still in flight).
    pub fn stop(&self) -> MonitorState {
        // The worker is taken under the state lock so it is always the one
        // that was just cancelled, never one installed by a later `start`.
        let worker = {
            let mut state = self.shared.lock_state();
            match *state {
                MonitorState::Stopped | MonitorState::Stopping => return *state,
                MonitorState::Starting | MonitorState::Running => {
                    *state = MonitorState::Stopping;
                    self.shared.cancel.store(true, Ordering::SeqCst);
                }
            }
            self.worker
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
        };

        info!("Stopping monitor");
        if let Some(worker) = worker {
            self.join_worker(worker);
        }
        self.state()
    }

    fn join_worker(&self, worker: Worker) {
        if worker.handle.thread().id() == thread::current().id() {
            warn!("Skipping join for monitor worker because stop was called from the worker thread");
            return;
        }

        match worker.done.recv_timeout(self.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    error!("Monitor worker thread panicked during shutdown");
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Monitor worker did not exit within {:?}; leaving it detached",
                    self.join_timeout
                );
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(shared: Arc<Shared>, done: mpsc::Sender<()>) {
    let _exit = ExitGuard {
        shared: Arc::clone(&shared),
        done,
    };
    debug!("Monitor polling every {:?}", shared.interval);

    while !shared.cancel.load(Ordering::SeqCst) {
        shared.cycle.run_once();
        if sleep_with_cancellation(&shared.cancel, shared.interval) {
            break;
        }
    }

    info!("Monitor worker exiting");
}

/// Sleeps in small steps, returning early (true) once `flag` is set.
fn sleep_with_cancellation(flag: &AtomicBool, duration: Duration) -> bool {
    let mut elapsed = Duration::ZERO;
    while elapsed < duration {
        if flag.load(Ordering::SeqCst) {
            return true;
        }
        let remaining = duration - elapsed;
        let step = remaining.min(Duration::from_millis(TASK_SLEEP_CHUNK_MS));
        thread::sleep(step);
        elapsed += step;
    }
    flag.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Instant;

    use super::*;
    use crate::audit::{AuditPaths, read_events};
    use crate::capture::Frame;
    use crate::error::CaptureError;
    use crate::mitigation::testing::{Recorder, dispatcher};
    use crate::model_loader::testing::{FixedClassifier, StubSource};

    struct StaticSource {
        captures: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl FrameSource for StaticSource {
        fn capture(&self) -> Result<Frame, CaptureError> {
            self.captures.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            Ok(Frame {
                rgb: vec![90; 12],
                width: 2,
                height: 2,
            })
        }
    }

    struct NoDisplaySource;

    impl FrameSource for NoDisplaySource {
        fn capture(&self) -> Result<Frame, CaptureError> {
            Err(CaptureError::NoDisplay)
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        settings: Arc<Settings>,
        loader: Arc<ModelLoader>,
        classifier: FixedClassifier,
        recorder: Recorder,
        captures: Arc<AtomicUsize>,
    }

    impl Harness {
        fn new(score: f32) -> Self {
            let classifier = FixedClassifier::new(score);
            Self::with_source(classifier.clone(), StubSource::ready(classifier))
        }

        // `classifier` shares its score cell with whatever `source` builds.
        fn with_source(classifier: FixedClassifier, source: StubSource) -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                settings: Arc::new(Settings::default()),
                loader: Arc::new(ModelLoader::new(source)),
                classifier,
                recorder: Recorder::default(),
                captures: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn paths(&self) -> AuditPaths {
            AuditPaths::in_dir(self.dir.path())
        }

        fn cycle_with(&self, source: Box<dyn FrameSource>) -> Cycle {
            Cycle::new(
                source,
                ContentClassifier::new(Arc::clone(&self.loader), Arc::clone(&self.settings)),
                Arc::clone(&self.settings),
                dispatcher(&self.recorder),
                AuditRecorder::new(self.paths()),
            )
        }

        fn cycle(&self, capture_delay: Duration) -> Cycle {
            self.cycle_with(Box::new(StaticSource {
                captures: Arc::clone(&self.captures),
                delay: capture_delay,
            }))
        }

        fn monitor(&self, interval: Duration) -> Monitor {
            Monitor::new(
                Arc::clone(&self.loader),
                self.cycle(Duration::ZERO),
                interval,
            )
        }
    }

    fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    #[test]
    fn score_above_threshold_dispatches_and_records_once() {
        let harness = Harness::new(0.6);
        harness.loader.load(|_, _| {}).unwrap();

        let outcome = harness.cycle(Duration::ZERO).run_once();

        assert!(matches!(outcome, CycleOutcome::Alert { event: Some(_), .. }));
        assert_eq!(harness.recorder.chord_count(), 1);
        assert_eq!(harness.recorder.urls.lock().unwrap().len(), 1);
        assert_eq!(read_events(&harness.paths().log_file).unwrap().len(), 1);
    }

    #[test]
    fn score_equal_to_threshold_does_nothing() {
        let harness = Harness::new(0.5);
        harness.loader.load(|_, _| {}).unwrap();

        let outcome = harness.cycle(Duration::ZERO).run_once();

        assert_eq!(outcome, CycleOutcome::Clear { score: 0.5 });
        assert_eq!(harness.recorder.chord_count(), 0);
        assert!(read_events(&harness.paths().log_file).unwrap().is_empty());
    }

    #[test]
    fn threshold_change_applies_on_next_cycle() {
        let harness = Harness::new(0.6);
        harness.loader.load(|_, _| {}).unwrap();
        let cycle = harness.cycle(Duration::ZERO);

        assert!(matches!(cycle.run_once(), CycleOutcome::Alert { .. }));
        harness.settings.set_threshold(0.65).unwrap();
        assert!(matches!(cycle.run_once(), CycleOutcome::Clear { .. }));
    }

    #[test]
    fn not_ready_and_capture_errors_skip_the_cycle() {
        let harness = Harness::new(0.9);

        assert_eq!(harness.cycle(Duration::ZERO).run_once(), CycleOutcome::Skipped);

        harness.loader.load(|_, _| {}).unwrap();
        assert_eq!(
            harness.cycle_with(Box::new(NoDisplaySource)).run_once(),
            CycleOutcome::Skipped
        );
        assert_eq!(harness.recorder.chord_count(), 0);
    }

    #[test]
    fn audit_failure_does_not_block_dispatch() {
        let harness = Harness::new(0.9);
        harness.loader.load(|_, _| {}).unwrap();
        std::fs::write(harness.paths().log_file, "garbage").unwrap();

        let outcome = harness.cycle(Duration::ZERO).run_once();

        assert!(matches!(outcome, CycleOutcome::Alert { event: None, .. }));
        assert_eq!(harness.recorder.chord_count(), 1);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let harness = Harness::new(0.1);
        let monitor = harness.monitor(Duration::from_millis(20));

        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert_eq!(monitor.stop(), MonitorState::Stopped);

        assert_eq!(monitor.start().unwrap(), MonitorState::Running);
        assert_eq!(monitor.start().unwrap(), MonitorState::Running);

        assert_eq!(monitor.stop(), MonitorState::Stopped);
        assert_eq!(monitor.stop(), MonitorState::Stopped);
    }

    #[test]
    fn stop_right_after_start_is_prompt() {
        let harness = Harness::new(0.1);
        let interval = Duration::from_millis(200);
        let monitor = harness.monitor(interval);

        monitor.start().unwrap();
        let began = Instant::now();
        assert_eq!(monitor.stop(), MonitorState::Stopped);
        assert!(began.elapsed() < interval + Duration::from_millis(500));
    }

    #[test]
    fn monitor_can_restart_after_stop() {
        let harness = Harness::new(0.1);
        let monitor = harness.monitor(Duration::from_millis(10));

        monitor.start().unwrap();
        monitor.stop();
        assert_eq!(monitor.start().unwrap(), MonitorState::Running);
        assert!(wait_until(Duration::from_secs(2), || {
            harness.captures.load(Ordering::SeqCst) > 0
        }));
        assert_eq!(monitor.stop(), MonitorState::Stopped);
    }

    #[test]
    fn failed_load_returns_to_stopped_every_time() {
        let harness = Harness::with_source(FixedClassifier::new(0.1), StubSource::unavailable());
        let monitor = harness.monitor(Duration::from_millis(10));

        let first = monitor.start().unwrap_err();
        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert!(first.to_string().contains("model unavailable"));

        let second = monitor.start().unwrap_err();
        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert_eq!(first.to_string(), second.to_string());
        assert_eq!(harness.captures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stop_during_model_load_never_reaches_running() {
        let classifier = FixedClassifier::new(0.1);
        let harness = Harness::with_source(
            classifier.clone(),
            StubSource::ready(classifier).with_delay(Duration::from_millis(200)),
        );
        let monitor = Arc::new(harness.monitor(Duration::from_millis(10)));

        let starter = {
            let monitor = Arc::clone(&monitor);
            thread::spawn(move || monitor.start())
        };
        assert!(wait_until(Duration::from_secs(1), || {
            monitor.state() == MonitorState::Starting
        }));

        assert_eq!(monitor.stop(), MonitorState::Stopping);
        assert_eq!(starter.join().unwrap().unwrap(), MonitorState::Stopped);
        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert_eq!(harness.captures.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn slow_cycle_is_left_detached_after_bounded_wait() {
        let harness = Harness::new(0.1);
        let monitor = Monitor::new(
            Arc::clone(&harness.loader),
            harness.cycle(Duration::from_millis(400)),
            Duration::from_millis(10),
        )
        .with_join_timeout(Duration::from_millis(20));

        monitor.start().unwrap();
        assert!(wait_until(Duration::from_secs(1), || {
            harness.captures.load(Ordering::SeqCst) > 0
        }));

        assert_eq!(monitor.stop(), MonitorState::Stopping);
        assert_eq!(monitor.start().unwrap(), MonitorState::Stopping);
        assert!(wait_until(Duration::from_secs(2), || {
            monitor.state() == MonitorState::Stopped
        }));
    }

    #[test]
    fn every_alert_cycle_dispatches_and_records() {
        let harness = Harness::new(0.9);
        let monitor = harness.monitor(Duration::from_millis(5));

        monitor.start().unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            harness.recorder.chord_count() >= 3
        }));
        harness.classifier.set_score(0.1);
        assert_eq!(monitor.stop(), MonitorState::Stopped);

        let events = read_events(&harness.paths().log_file).unwrap();
        assert_eq!(events.len(), harness.recorder.chord_count());
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        for event in &events {
            assert!(harness.paths().screenshot_dir.join(&event.screenshot).is_file());
        }
    }

    #[test]
    fn concurrent_start_and_stop_never_strand_a_worker() {
        let harness = Harness::new(0.1);
        let monitor = Arc::new(
            harness
                .monitor(Duration::from_millis(2))
                .with_join_timeout(Duration::from_secs(5)),
        );

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let monitor = Arc::clone(&monitor);
                thread::spawn(move || {
                    for _ in 0..25 {
                        monitor.start().unwrap();
                        let began = Instant::now();
                        monitor.stop();
                        assert!(
                            began.elapsed() < Duration::from_secs(1),
                            "stop waited on a worker that was never cancelled"
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        monitor.stop();
        assert!(wait_until(Duration::from_secs(2), || {
            monitor.state() == MonitorState::Stopped
        }));
    }
}
