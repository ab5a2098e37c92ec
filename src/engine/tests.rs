use super::*;
use crate::config::{SharedSettings, TouchSettings};
use crate::contact::{Contact, ContactState};
use crate::frame::{CallbackSink, Frame};
use crate::sensor::{RecordedCycle, RecordedUser, ScriptedSource};
use crate::tracking::Vector3;
use parking_lot::Mutex;
use std::time::Instant;

const PLANE: i32 = 900;
const TOUCHING: f32 = 850.0;
const HOVERING: f32 = 950.0;

fn absolute_settings() -> TouchSettings {
    TouchSettings {
        relative_offset: 350,
        absolute_offset: PLANE,
        relative_mode: false,
    }
}

fn joint(kind: JointKind, z: f32) -> JointSample {
    JointSample {
        kind,
        position: Vector3 { x: 320.0, y: 240.0, z },
        confidence: 1.0,
    }
}

/// User with only the right hand visible at depth `z`
fn user(id: UserId, z: f32) -> RecordedUser {
    RecordedUser {
        id,
        tracking: true,
        joints: vec![joint(JointKind::Torso, 2000.0), joint(JointKind::RightHand, z)],
    }
}

fn cycle(users: Vec<RecordedUser>, events: Vec<TrackerEvent>) -> RecordedCycle {
    RecordedCycle { users, events }
}

struct Harness {
    engine: TouchEngine,
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl Harness {
    fn start(config: AppConfig, source: ScriptedSource) -> Self {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let collected = frames.clone();
        let sink = CallbackSink::new(Arc::new(move |frame: &Frame| {
            collected.lock().push(frame.clone());
        }));

        let engine = TouchEngine::start(
            &config,
            Box::new(source),
            Box::new(SharedSettings::new(absolute_settings())),
            Some(Arc::new(sink)),
        )
        .unwrap();

        Self { engine, frames }
    }

    /// Wait for the scripted source to run dry
    fn wait_finished(&self) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !self.engine.is_finished() {
            assert!(Instant::now() < deadline, "engine did not finish");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn contacts(&self) -> Vec<Contact> {
        self.frames
            .lock()
            .iter()
            .flat_map(|f| f.contacts.iter().copied())
            .collect()
    }
}

fn states(contacts: &[Contact]) -> Vec<ContactState> {
    contacts.iter().map(|c| c.state).collect()
}

#[test]
fn test_touch_release_retouch_gets_fresh_id() {
    let mut source = ScriptedSource::new();
    source
        .push_cycle(cycle(vec![user(1, TOUCHING)], vec![TrackerEvent::UserCalibrated(1)]))
        .push_cycle(cycle(vec![user(1, TOUCHING)], vec![]))
        .push_cycle(cycle(vec![user(1, HOVERING)], vec![]))
        .push_cycle(cycle(vec![user(1, TOUCHING)], vec![]));

    let harness = Harness::start(AppConfig::default(), source);
    harness.wait_finished();
    let contacts = harness.contacts();
    let report = harness.engine.shutdown().unwrap();

    assert_eq!(
        states(&contacts),
        vec![
            ContactState::New,
            ContactState::Moved,
            ContactState::Removed,
            ContactState::New,
            // released when the stream ended
            ContactState::Removed,
        ]
    );
    assert_eq!(contacts[0].id, contacts[1].id);
    assert_eq!(contacts[1].id, contacts[2].id);
    assert!(contacts[3].id > contacts[0].id);
    assert_eq!(contacts[3].id, contacts[4].id);

    assert_eq!(report.cycles, 4);
    assert_eq!(report.frames.contacts_delivered, 5);
}

#[test]
fn test_frame_sequences_increase() {
    let mut source = ScriptedSource::new();
    source
        .push_cycle(cycle(vec![user(1, TOUCHING)], vec![TrackerEvent::UserCalibrated(1)]))
        .push_cycle(cycle(vec![user(1, TOUCHING)], vec![]))
        .push_cycle(cycle(vec![user(1, TOUCHING)], vec![]));

    let harness = Harness::start(AppConfig::default(), source);
    harness.wait_finished();

    let sequences: Vec<u64> = harness.frames.lock().iter().map(|f| f.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]), "{:?}", sequences);
    harness.engine.shutdown().unwrap();
}

#[test]
fn test_user_lost_while_touching_removes_once() {
    let mut source = ScriptedSource::new();
    source
        .push_cycle(cycle(vec![user(1, TOUCHING)], vec![TrackerEvent::UserCalibrated(1)]))
        .push_cycle(cycle(vec![], vec![TrackerEvent::UserLost(1)]))
        .push_cycle(cycle(vec![], vec![]));

    let harness = Harness::start(AppConfig::default(), source);
    harness.wait_finished();
    let contacts = harness.contacts();
    let report = harness.engine.shutdown().unwrap();

    assert_eq!(states(&contacts), vec![ContactState::New, ContactState::Removed]);
    assert_eq!(contacts[0].id, contacts[1].id);
    assert_eq!(contacts[1].position, contacts[0].position);
    assert_eq!(report.active_users, 0);
}

#[test]
fn test_untracked_user_releases_touch_but_stays_registered() {
    let mut lost = user(1, TOUCHING);
    lost.tracking = false;

    let mut source = ScriptedSource::new();
    source
        .push_cycle(cycle(vec![user(1, TOUCHING)], vec![TrackerEvent::UserCalibrated(1)]))
        .push_cycle(cycle(vec![lost.clone()], vec![]))
        .push_cycle(cycle(vec![lost], vec![]));

    let harness = Harness::start(AppConfig::default(), source);
    harness.wait_finished();
    let contacts = harness.contacts();
    let report = harness.engine.shutdown().unwrap();

    assert_eq!(states(&contacts), vec![ContactState::New, ContactState::Removed]);
    assert_eq!(report.active_users, 1);
}

#[test]
fn test_broken_user_does_not_block_others() {
    let mut source = ScriptedSource::new();
    source
        .push_cycle(cycle(
            vec![user(1, TOUCHING), user(2, TOUCHING)],
            vec![TrackerEvent::UserCalibrated(1), TrackerEvent::UserCalibrated(2)],
        ))
        .push_cycle(cycle(vec![user(1, TOUCHING), user(2, HOVERING)], vec![]))
        .break_user(1);

    let harness = Harness::start(AppConfig::default(), source);
    harness.wait_finished();
    let contacts = harness.contacts();
    let report = harness.engine.shutdown().unwrap();

    assert_eq!(states(&contacts), vec![ContactState::New, ContactState::Removed]);
    assert_eq!(report.user_errors, 2);
    assert_eq!(report.active_users, 2);
}

#[test]
fn test_transient_failures_are_retried() {
    let mut source = ScriptedSource::new();
    source
        .push_failure("usb hiccup")
        .push_cycle(cycle(vec![user(1, TOUCHING)], vec![TrackerEvent::UserCalibrated(1)]))
        .push_failure("usb hiccup")
        .push_failure("usb hiccup")
        .push_cycle(cycle(vec![user(1, TOUCHING)], vec![]));

    let mut config = AppConfig::default();
    config.engine.max_consecutive_failures = 3;

    let harness = Harness::start(config, source);
    harness.wait_finished();
    let report = harness.engine.shutdown().unwrap();

    assert_eq!(report.sensor_failures, 3);
    assert_eq!(report.cycles, 2);
}

#[test]
fn test_repeated_failures_stop_processing() {
    let mut source = ScriptedSource::new();
    source
        .push_failure("device unplugged")
        .push_failure("device unplugged")
        .push_failure("device unplugged")
        .push_cycle(cycle(vec![], vec![]));

    let mut config = AppConfig::default();
    config.engine.max_consecutive_failures = 3;

    let harness = Harness::start(config, source);
    harness.wait_finished();
    assert!(!harness.engine.is_running());

    let err = harness.engine.shutdown().unwrap_err();
    assert!(err
        .chain()
        .any(|e| matches!(e.downcast_ref::<SensorError>(), Some(SensorError::Exhausted(3)))));
}

#[test]
fn test_always_notify_delivers_empty_frames() {
    let mut source = ScriptedSource::new();
    source
        .push_cycle(cycle(vec![], vec![]))
        .push_cycle(cycle(vec![], vec![]))
        .push_cycle(cycle(vec![], vec![]));

    let mut config = AppConfig::default();
    config.frames.always_notify = true;

    let harness = Harness::start(config, source);
    harness.wait_finished();

    let frames = harness.frames.lock().clone();
    assert_eq!(frames.len(), 3);
    assert!(frames.iter().all(|f| f.contacts.is_empty()));
    assert_eq!(
        frames.iter().map(|f| f.sequence).collect::<Vec<_>>(),
        vec![0, 1, 2]
    );
    harness.engine.shutdown().unwrap();
}

#[test]
fn test_empty_cycles_are_silent_by_default() {
    let mut source = ScriptedSource::new();
    source
        .push_cycle(cycle(vec![], vec![]))
        .push_cycle(cycle(vec![], vec![]));

    let harness = Harness::start(AppConfig::default(), source);
    harness.wait_finished();
    assert!(harness.frames.lock().is_empty());
    harness.engine.shutdown().unwrap();
}

#[test]
fn test_invalid_config_fails_fast() {
    let mut config = AppConfig::default();
    config.filter.cutoff = config.filter.sample_rate;

    let result = TouchEngine::start(
        &config,
        Box::new(ScriptedSource::new()),
        Box::new(SharedSettings::default()),
        None,
    );
    assert!(result.is_err());
}

#[test]
fn test_settings_change_swaps_classifier() {
    let config = AppConfig::default();
    let mapping = config.screen_mapping().unwrap();
    let shared = SharedSettings::new(TouchSettings::default());
    let classifier = Arc::new(RwLock::new(TouchClassifier::new(
        TouchMode::from_settings(&TouchSettings::default()),
        mapping,
    )));
    let stats = Arc::new(EngineStats::default());

    let mut settings_loop = SettingsLoop {
        source: Box::new(shared.clone()),
        tracker: SettingsTracker::new(TouchSettings::default()),
        classifier: classifier.clone(),
        mapping,
        running: Arc::new(AtomicBool::new(true)),
        stats: stats.clone(),
        interval: Duration::from_millis(1),
        wake: crossbeam::channel::never(),
    };

    settings_loop.poll_once();
    assert_eq!(stats.settings_changes.load(Ordering::Relaxed), 0);

    shared.set(absolute_settings());
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    tracing::subscriber::with_default(subscriber, || settings_loop.poll_once());

    assert_eq!(classifier.read().mode(), TouchMode::Absolute { plane: PLANE });
    assert_eq!(stats.settings_changes.load(Ordering::Relaxed), 1);

    let output = logs.contents();
    assert!(output.contains("Touch mode now"), "{}", output);
    assert!(
        output.contains(&format!(
            "Convert factor x: {:.4} y: {:.4}",
            mapping.factor_x, mapping.factor_y
        )),
        "{}",
        output
    );

    settings_loop.poll_once();
    assert_eq!(stats.settings_changes.load(Ordering::Relaxed), 1);
}

#[test]
fn test_lost_and_recalibrated_in_one_cycle_stays_registered() {
    let mut source = ScriptedSource::new();
    source
        .push_cycle(cycle(vec![user(1, TOUCHING)], vec![TrackerEvent::UserCalibrated(1)]))
        .push_cycle(cycle(
            vec![user(1, TOUCHING)],
            vec![TrackerEvent::UserLost(1), TrackerEvent::UserCalibrated(1)],
        ))
        .push_cycle(cycle(vec![user(1, TOUCHING)], vec![]));

    let harness = Harness::start(AppConfig::default(), source);
    harness.wait_finished();
    let contacts = harness.contacts();
    let report = harness.engine.shutdown().unwrap();

    // The first hand is closed on loss, the fresh user touches anew
    assert_eq!(
        states(&contacts),
        vec![
            ContactState::New,
            ContactState::Removed,
            ContactState::New,
            ContactState::Moved,
            ContactState::Removed,
        ]
    );
    assert_eq!(contacts[0].id, contacts[1].id);
    assert!(contacts[2].id > contacts[1].id);
    assert_eq!(report.active_users, 1);
}

#[test]
fn test_panicking_user_does_not_block_others() {
    let mut source = ScriptedSource::new();
    source
        .push_cycle(cycle(
            vec![user(1, TOUCHING), user(2, TOUCHING)],
            vec![TrackerEvent::UserCalibrated(1), TrackerEvent::UserCalibrated(2)],
        ))
        .push_cycle(cycle(vec![user(1, TOUCHING), user(2, HOVERING)], vec![]))
        .panic_user(1);

    let harness = Harness::start(AppConfig::default(), source);
    harness.wait_finished();
    assert!(!harness.engine.is_running());
    let contacts = harness.contacts();
    let report = harness.engine.shutdown().unwrap();

    assert_eq!(states(&contacts), vec![ContactState::New, ContactState::Removed]);
    assert_eq!(report.user_errors, 2);
    assert_eq!(report.cycles, 2);
    assert_eq!(report.active_users, 2);
}

#[test]
fn test_deferred_removal_waits_for_arena() {
    let aggregator = Arc::new(FrameAggregator::new(false));
    let config = AppConfig::default();
    let registry = UserRegistry::new(
        config.filter_coefficients().unwrap(),
        ContactIdAllocator::new(),
        aggregator.clone(),
    );
    registry.add_user(7);

    let mut processor = Processor {
        source: Box::new(ScriptedSource::new()),
        registry: registry.clone(),
        aggregator,
        classifier: Arc::new(RwLock::new(TouchClassifier::new(
            TouchMode::from_settings(&TouchSettings::default()),
            config.screen_mapping().unwrap(),
        ))),
        running: Arc::new(AtomicBool::new(true)),
        stats: Arc::new(EngineStats::default()),
        pending_events: vec![
            TrackerEvent::UserLost(7),
            TrackerEvent::UserCalibrated(7),
            TrackerEvent::UserCalibrated(8),
        ],
        max_failures: 1,
        sequence: 0,
    };

    {
        let _busy = registry.lock();
        processor.apply_events();
    }
    // Nothing queued behind the busy removal may overtake it
    assert_eq!(
        processor.pending_events,
        vec![
            TrackerEvent::UserLost(7),
            TrackerEvent::UserCalibrated(7),
            TrackerEvent::UserCalibrated(8),
        ]
    );
    assert_eq!(registry.active_users(), vec![7]);

    processor.apply_events();
    assert!(processor.pending_events.is_empty());
    assert_eq!(registry.active_users(), vec![7, 8]);
}

/// Captures formatted log output for assertions
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
