//! Playback of recorded tracker sessions
//!
//! A recording is a JSON-lines file, one [`RecordedCycle`] per line. Blank
//! lines and lines starting with `#` are ignored. Playback is paced at a
//! fixed rate so the filters see the cadence they were tuned for.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::SensorError;
use crate::tracking::{JointKind, JointSample, UserId};

use super::{RecordedCycle, SkeletonSource, TrackerEvent};

/// Replays recorded cycles at a fixed rate
pub struct ReplaySource {
    cycles: Vec<RecordedCycle>,
    cursor: usize,
    current: RecordedCycle,
    pending_events: Vec<TrackerEvent>,
    interval: Duration,
    next_tick: Option<Instant>,
    looping: bool,
}

impl ReplaySource {
    /// Load a recording from disk
    pub fn open(path: impl AsRef<Path>, rate_hz: f64, looping: bool) -> Result<Self, SensorError> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)?;
        let cycles = Self::parse(BufReader::new(file))?;

        info!(
            "📼 Loaded recording {} ({} cycles, {:.0} Hz{})",
            path.display(),
            cycles.len(),
            rate_hz,
            if looping { ", looping" } else { "" }
        );

        Ok(Self::from_cycles(cycles, rate_hz, looping))
    }

    /// Parse JSON lines into cycles
    pub fn parse(reader: impl BufRead) -> Result<Vec<RecordedCycle>, SensorError> {
        let mut cycles = Vec::new();
        for (index, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let cycle = serde_json::from_str(trimmed).map_err(|source| SensorError::Parse {
                line: index + 1,
                source,
            })?;
            cycles.push(cycle);
        }
        Ok(cycles)
    }

    pub fn from_cycles(cycles: Vec<RecordedCycle>, rate_hz: f64, looping: bool) -> Self {
        Self {
            cycles,
            cursor: 0,
            current: RecordedCycle::default(),
            pending_events: Vec::new(),
            interval: playback_interval(rate_hz),
            next_tick: None,
            looping,
        }
    }

    pub fn len(&self) -> usize {
        self.cycles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cycles.is_empty()
    }

    /// Sleep until the next cycle is due
    fn pace(&mut self) {
        let now = Instant::now();
        let due = self.next_tick.unwrap_or(now);
        if due > now {
            std::thread::sleep(due - now);
        }
        // Do not try to catch up after a long stall
        let base = match due.checked_add(self.interval) {
            Some(next) if next >= now => due,
            _ => now,
        };
        self.next_tick = base.checked_add(self.interval);
    }
}

/// Cycle period for a playback rate, falling back to the filter rate when
/// the period is not representable
fn playback_interval(rate_hz: f64) -> Duration {
    let fallback = crate::filter::DEFAULT_SAMPLE_RATE;
    if !rate_hz.is_finite() || rate_hz <= 0.0 {
        warn!("⚠️  Invalid playback rate {} Hz, using {} Hz", rate_hz, fallback);
        return Duration::from_secs_f64(1.0 / fallback);
    }

    Duration::try_from_secs_f64(1.0 / rate_hz).unwrap_or_else(|e| {
        warn!(
            "⚠️  Playback rate {} Hz gives an unusable period ({}), using {} Hz",
            rate_hz, e, fallback
        );
        Duration::from_secs_f64(1.0 / fallback)
    })
}

impl SkeletonSource for ReplaySource {
    fn wait_for_update(&mut self) -> Result<(), SensorError> {
        if self.cursor >= self.cycles.len() {
            if !self.looping || self.cycles.is_empty() {
                return Err(SensorError::EndOfStream);
            }
            debug!("Recording finished, looping");
            self.cursor = 0;
        }

        self.pace();

        let cycle = self.cycles[self.cursor].clone();
        self.cursor += 1;
        self.pending_events.extend(cycle.events.iter().copied());
        self.current = cycle;
        Ok(())
    }

    fn users(&self) -> Vec<UserId> {
        self.current.user_ids()
    }

    fn is_tracking(&self, user: UserId) -> bool {
        self.current.is_tracking(user)
    }

    fn joint(&self, user: UserId, kind: JointKind) -> Result<JointSample, SensorError> {
        self.current.joint(user, kind)
    }

    fn take_events(&mut self) -> Vec<TrackerEvent> {
        std::mem::take(&mut self.pending_events)
    }

    fn release(&mut self) {
        debug!("Replay source released at cycle {}", self.cursor);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::io::Write;

    const RECORDING: &str = r#"
# two cycles
{"users":[{"id":1,"joints":[]}],"events":[{"user_calibrated":1}]}

{"users":[],"events":[{"user_lost":1}]}
"#;

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let cycles = ReplaySource::parse(Cursor::new(RECORDING)).unwrap();
        assert_eq!(cycles.len(), 2);
        assert_eq!(cycles[1].events, vec![TrackerEvent::UserLost(1)]);
    }

    #[test]
    fn test_unusable_rates_fall_back_to_filter_rate() {
        let expected = Duration::from_secs_f64(1.0 / crate::filter::DEFAULT_SAMPLE_RATE);

        for rate in [0.0, -5.0, f64::NAN, f64::INFINITY, 1e-20, f64::MIN_POSITIVE] {
            let source = ReplaySource::from_cycles(Vec::new(), rate, false);
            assert_eq!(source.interval, expected, "rate {}", rate);
        }

        let source = ReplaySource::from_cycles(Vec::new(), 4.0, false);
        assert_eq!(source.interval, Duration::from_millis(250));
    }

    #[test]
    fn test_parse_reports_line_number() {
        let err = ReplaySource::parse(Cursor::new("{}\nnot json\n")).unwrap_err();
        assert!(matches!(err, SensorError::Parse { line: 2, .. }));
    }

    #[test]
    fn test_playback_and_end_of_stream() {
        let cycles = ReplaySource::parse(Cursor::new(RECORDING)).unwrap();
        let mut source = ReplaySource::from_cycles(cycles, 1000.0, false);

        source.wait_for_update().unwrap();
        assert_eq!(source.users(), vec![1]);
        assert_eq!(source.take_events(), vec![TrackerEvent::UserCalibrated(1)]);
        assert!(source.take_events().is_empty());

        source.wait_for_update().unwrap();
        assert!(source.users().is_empty());

        assert!(matches!(
            source.wait_for_update(),
            Err(SensorError::EndOfStream)
        ));
    }

    #[test]
    fn test_looping_restarts() {
        let cycles = ReplaySource::parse(Cursor::new(RECORDING)).unwrap();
        let mut source = ReplaySource::from_cycles(cycles, 1000.0, true);

        for _ in 0..5 {
            source.wait_for_update().unwrap();
        }
        assert_eq!(source.users(), vec![1]);
    }

    #[test]
    fn test_open_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        file.write_all(RECORDING.as_bytes())?;

        let source = ReplaySource::open(file.path(), 30.0, false)?;
        assert_eq!(source.len(), 2);
        Ok(())
    }
}
