//! Touch engine - processing and settings loops
//!
//! The engine owns two threads sharing one run flag:
//!
//! - **processing**: blocks on the skeleton source once per cycle, applies
//!   user lifecycle events, runs every tracked user's hands and closes the
//!   cycle by draining the frame aggregator.
//! - **settings**: re-reads the touch settings at a fixed interval and swaps
//!   in a new classifier when they change.
//!
//! Shutdown clears the flag, joins both threads and only then releases the
//! skeleton source.

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::RwLock;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

use crate::classifier::{ScreenMapping, TouchClassifier, TouchMode};
use crate::config::{AppConfig, SettingsSource, SettingsTracker};
use crate::contact::ContactIdAllocator;
use crate::error::SensorError;
use crate::frame::{FrameAggregator, FrameSink, FrameStats};
use crate::sensor::{SkeletonSource, TrackerEvent};
use crate::tracking::{JointKind, JointSample, UserArena, UserId, UserRegistry};

#[cfg(test)]
mod tests;

/// Counters shared between the loops and the owner
#[derive(Debug, Default)]
pub struct EngineStats {
    cycles: AtomicU64,
    sensor_failures: AtomicU64,
    user_errors: AtomicU64,
    settings_changes: AtomicU64,
}

/// Snapshot of engine counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineReport {
    pub cycles: u64,
    pub sensor_failures: u64,
    pub user_errors: u64,
    pub settings_changes: u64,
    pub active_users: usize,
    pub frames: FrameStats,
}

type ProcessingExit = (Box<dyn SkeletonSource>, Result<(), SensorError>);

/// Running touch pipeline
pub struct TouchEngine {
    running: Arc<AtomicBool>,
    /// Interrupts the settings loop sleep on stop
    wake: Sender<()>,
    registry: UserRegistry,
    aggregator: Arc<FrameAggregator>,
    classifier: Arc<RwLock<TouchClassifier>>,
    stats: Arc<EngineStats>,
    processing: Option<JoinHandle<ProcessingExit>>,
    settings: Option<JoinHandle<()>>,
}

impl TouchEngine {
    /// Start both loops
    ///
    /// Settings are read once before the threads start; if that read fails
    /// the `touch` section of `config` is used.
    pub fn start(
        config: &AppConfig,
        source: Box<dyn SkeletonSource>,
        mut settings_source: Box<dyn SettingsSource>,
        sink: Option<Arc<dyn FrameSink>>,
    ) -> Result<Self> {
        config.validate()?;
        let coefficients = config.filter_coefficients()?;
        let mapping = config.screen_mapping()?;

        let initial = match settings_source.read() {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to read touch settings, using configured defaults: {:#}", e);
                config.touch
            }
        };
        let mut tracker = SettingsTracker::new(config.touch);
        tracker.update(initial);
        log_mapping(config, &mapping);

        let classifier = Arc::new(RwLock::new(TouchClassifier::new(
            TouchMode::from_settings(&tracker.current()),
            mapping,
        )));

        let aggregator = Arc::new(FrameAggregator::with_backlog_capacity(
            config.frames.always_notify,
            config.frames.backlog_capacity,
        ));
        if let Some(sink) = sink {
            aggregator.set_sink(sink);
        }

        let registry = UserRegistry::new(coefficients, ContactIdAllocator::new(), aggregator.clone());
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(EngineStats::default());

        let processor = Processor {
            source,
            registry: registry.clone(),
            aggregator: aggregator.clone(),
            classifier: classifier.clone(),
            running: running.clone(),
            stats: stats.clone(),
            pending_events: Vec::new(),
            max_failures: config.engine.max_consecutive_failures.max(1),
            sequence: 0,
        };
        let processing = std::thread::Builder::new()
            .name("vtouch-processing".to_string())
            .spawn(move || processor.run())
            .context("Failed to spawn processing thread")?;

        let (wake, wake_rx) = channel::bounded(1);
        let settings_loop = SettingsLoop {
            source: settings_source,
            tracker,
            classifier: classifier.clone(),
            mapping,
            running: running.clone(),
            stats: stats.clone(),
            interval: Duration::from_millis(config.engine.settings_poll_ms),
            wake: wake_rx,
        };
        let settings = match std::thread::Builder::new()
            .name("vtouch-settings".to_string())
            .spawn(move || settings_loop.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                running.store(false, Ordering::Release);
                let _ = processing.join();
                return Err(e).context("Failed to spawn settings thread");
            }
        };

        info!("Touch engine started");

        Ok(Self {
            running,
            wake,
            registry,
            aggregator,
            classifier,
            stats,
            processing: Some(processing),
            settings: Some(settings),
        })
    }

    /// Handle for tracker callbacks that add or remove users
    pub fn registry(&self) -> UserRegistry {
        self.registry.clone()
    }

    pub fn aggregator(&self) -> &Arc<FrameAggregator> {
        &self.aggregator
    }

    /// Classifier currently in effect
    pub fn classifier(&self) -> TouchClassifier {
        *self.classifier.read()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// True once the processing loop exited on its own (end of stream or
    /// sensor failure)
    pub fn is_finished(&self) -> bool {
        self.processing
            .as_ref()
            .map(JoinHandle::is_finished)
            .unwrap_or(true)
    }

    /// Ask both loops to stop after their current iteration
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
        let _ = self.wake.try_send(());
    }

    pub fn report(&self) -> EngineReport {
        EngineReport {
            cycles: self.stats.cycles.load(Ordering::Relaxed),
            sensor_failures: self.stats.sensor_failures.load(Ordering::Relaxed),
            user_errors: self.stats.user_errors.load(Ordering::Relaxed),
            settings_changes: self.stats.settings_changes.load(Ordering::Relaxed),
            active_users: self.registry.active_users().len(),
            frames: self.aggregator.stats(),
        }
    }

    /// Stop, join both threads, then release the sensor
    ///
    /// A processing loop that gave up on the sensor is reported as an error.
    pub fn shutdown(mut self) -> Result<EngineReport> {
        self.stop();

        if let Some(settings) = self.settings.take() {
            if settings.join().is_err() {
                error!("Settings thread panicked");
            }
        }

        let outcome = match self.processing.take() {
            Some(processing) => match processing.join() {
                Ok((mut source, outcome)) => {
                    source.release();
                    outcome
                }
                Err(_) => {
                    anyhow::bail!("Processing thread panicked");
                }
            },
            None => Ok(()),
        };

        let report = self.report();
        info!(
            "Touch engine stopped after {} cycles ({} frames, {} contacts)",
            report.cycles, report.frames.frames_delivered, report.frames.contacts_delivered
        );

        outcome.context("Sensor processing failed")?;
        Ok(report)
    }
}

impl Drop for TouchEngine {
    fn drop(&mut self) {
        // Let detached loops wind down if shutdown() was never called
        self.stop();
    }
}

fn log_mapping(config: &AppConfig, mapping: &ScreenMapping) {
    let g = &config.geometry;
    info!(
        "Virtual screen {}x{} at ({}, {})",
        g.display.width, g.display.height, g.display.x, g.display.y
    );
    info!(
        "Device depth map {}x{}, cropped {}x{}",
        g.sensor.x_res,
        g.sensor.y_res,
        g.sensor.x_res.saturating_sub(g.crop.x.saturating_mul(2)),
        g.sensor.y_res.saturating_sub(g.crop.y.saturating_mul(2))
    );
    log_factors(mapping);
}

fn log_factors(mapping: &ScreenMapping) {
    info!(
        "Convert factor x: {:.4} y: {:.4}",
        mapping.factor_x, mapping.factor_y
    );
}

/// State owned by the processing thread
struct Processor {
    source: Box<dyn SkeletonSource>,
    registry: UserRegistry,
    aggregator: Arc<FrameAggregator>,
    classifier: Arc<RwLock<TouchClassifier>>,
    running: Arc<AtomicBool>,
    stats: Arc<EngineStats>,
    /// Lifecycle events not applied yet, in tracker order
    pending_events: Vec<TrackerEvent>,
    max_failures: u32,
    sequence: u64,
}

impl Processor {
    fn run(mut self) -> ProcessingExit {
        let outcome = self.run_loop();

        // Nobody will classify these hands again: close their contacts
        self.release_all();
        self.running.store(false, Ordering::Release);

        (self.source, outcome)
    }

    fn run_loop(&mut self) -> Result<(), SensorError> {
        let mut failures: u32 = 0;

        while self.running.load(Ordering::Acquire) {
            match self.source.wait_for_update() {
                Ok(()) => failures = 0,
                Err(SensorError::EndOfStream) => {
                    info!("Sensor stream ended");
                    return Ok(());
                }
                Err(e) => {
                    failures += 1;
                    self.stats.sensor_failures.fetch_add(1, Ordering::Relaxed);
                    warn!("Sensor update failed ({}/{}): {}", failures, self.max_failures, e);

                    if failures >= self.max_failures {
                        error!("Giving up on sensor after {} consecutive failures", failures);
                        return Err(SensorError::Exhausted(failures));
                    }
                    continue;
                }
            }

            self.run_cycle();
        }

        debug!("Processing loop stopped");
        Ok(())
    }

    /// One full cycle: lifecycle events, hands of every user, frame
    fn run_cycle(&mut self) {
        let events = self.source.take_events();
        self.pending_events.extend(events);
        self.apply_events();

        let classifier = *self.classifier.read();
        {
            let mut arena = self.registry.lock();
            for id in self.source.users() {
                let processed = panic::catch_unwind(AssertUnwindSafe(|| {
                    self.process_user(&mut arena, id, &classifier)
                }));
                if processed.is_err() {
                    self.stats.user_errors.fetch_add(1, Ordering::Relaxed);
                    error!("Processing user {} panicked, continuing with other users", id);
                }
            }
        }

        let sequence = self.sequence;
        self.sequence += 1;
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);

        let outcome = self.aggregator.drain_and_notify(sequence);
        trace!("Cycle {} closed: {:?}", sequence, outcome);
    }

    /// Apply lifecycle events in arrival order.
    ///
    /// Removal never waits on the arena lock. When it is busy, the lost event
    /// and everything queued behind it wait for the next cycle, so a user that
    /// is lost and re-calibrated in one batch ends up registered.
    fn apply_events(&mut self) {
        let pending = std::mem::take(&mut self.pending_events);
        let mut events = pending.into_iter();

        while let Some(event) = events.next() {
            match event {
                TrackerEvent::UserCalibrated(id) => {
                    self.registry.add_user(id);
                }
                TrackerEvent::UserLost(id) => match self.registry.try_remove_user(id) {
                    Ok(Some(_)) => {}
                    Ok(None) => debug!("Lost user {} was not tracked", id),
                    Err(()) => {
                        debug!("User arena busy, deferring removal of user {}", id);
                        self.pending_events.push(event);
                        self.pending_events.extend(events);
                        return;
                    }
                },
            }
        }
    }

    fn process_user(&self, arena: &mut UserArena, id: UserId, classifier: &TouchClassifier) {
        // Not calibrated yet
        let Some(user) = arena.get_mut(id) else {
            return;
        };

        if !self.source.is_tracking(id) {
            for contact in user.release_touches() {
                self.aggregator.push(contact);
            }
            return;
        }

        match read_joints(self.source.as_ref(), id) {
            Ok(samples) => {
                user.record_joints(samples);
                for contact in user.update_hands(classifier) {
                    debug!(
                        "Contact {} {} at ({:.0}, {:.0}) for user {}",
                        contact.id, contact.state, contact.position.x, contact.position.y, id
                    );
                    self.aggregator.push(contact);
                }
            }
            Err(e) => {
                self.stats.user_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Skipping user {} this cycle: {}", id, e);
            }
        }
    }

    fn release_all(&mut self) {
        let mut released = Vec::new();
        {
            let mut arena = self.registry.lock();
            for id in arena.ids() {
                if let Some(user) = arena.get_mut(id) {
                    released.extend(user.release_touches());
                }
            }
        }

        if released.is_empty() {
            return;
        }

        info!("Releasing {} active contact(s) on shutdown", released.len());
        for contact in released {
            self.aggregator.push(contact);
        }
        let sequence = self.sequence;
        self.sequence += 1;
        self.aggregator.drain_and_notify(sequence);
    }
}

fn read_joints(source: &dyn SkeletonSource, id: UserId) -> Result<[JointSample; 3], SensorError> {
    Ok([
        source.joint(id, JointKind::Torso)?,
        source.joint(id, JointKind::LeftHand)?,
        source.joint(id, JointKind::RightHand)?,
    ])
}

/// State owned by the settings thread
struct SettingsLoop {
    source: Box<dyn SettingsSource>,
    tracker: SettingsTracker,
    classifier: Arc<RwLock<TouchClassifier>>,
    mapping: ScreenMapping,
    running: Arc<AtomicBool>,
    stats: Arc<EngineStats>,
    interval: Duration,
    wake: Receiver<()>,
}

impl SettingsLoop {
    fn run(mut self) {
        while self.running.load(Ordering::Acquire) {
            self.poll_once();
            self.sleep();
        }
        debug!("Settings loop stopped");
    }

    fn poll_once(&mut self) {
        let fresh = match self.source.read() {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Failed to read touch settings (keeping current): {:#}", e);
                return;
            }
        };

        if let Some(changed) = self.tracker.update(fresh) {
            let classifier = TouchClassifier::new(TouchMode::from_settings(&changed), self.mapping);
            *self.classifier.write() = classifier;
            self.stats.settings_changes.fetch_add(1, Ordering::Relaxed);
            info!("Touch mode now {:?}", classifier.mode());
            log_factors(classifier.mapping());
        }
    }

    /// Wait one interval, or less if the engine is stopping
    fn sleep(&self) {
        let _ = self.wake.recv_timeout(self.interval);
    }
}
