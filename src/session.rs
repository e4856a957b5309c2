use crate::clock::seconds_between;
use crate::error::{Error, Result};
use crate::parameters::{validate, Parameter, PumpParameters};
use crate::settings::SettingsStore;
use chrono::{DateTime, Utc};
use log::{debug, error, info, trace, warn};
use serde::{Deserialize, Serialize};

/// Minimal persisted state needed to pick a session back up after restart
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub start_time: Option<DateTime<Utc>>,
    pub tap_count: u32,
    pub spm: f64,
}

/// Values derived from the snapshot, the parameters and "now"
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedMetrics {
    pub elapsed_seconds: f64,
    pub pump_rate: f64,
    pub volume_displaced: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TapOutcome {
    /// The tap opened a new session
    Started,
    /// The tap was counted and the average rate recomputed
    Counted { tap_count: u32, spm: f64 },
    /// The tap landed on the start instant (or before it) and was dropped
    Ignored,
}

/// The stroke-rate engine. Owns the current session and writes every
/// transition through to the settings store.
#[derive(Debug)]
pub struct SessionState {
    start_time: Option<DateTime<Utc>>,
    tap_count: u32,
    spm: f64,
    params: PumpParameters,
    store: SettingsStore,
}

impl SessionState {
    /// Loads parameters and, when a snapshot was left behind, resumes it
    pub fn open(mut store: SettingsStore, now: DateTime<Utc>) -> Self {
        let params = store.load_parameters();
        let snapshot = store.load_snapshot();
        let mut state = Self {
            start_time: None,
            tap_count: 0,
            spm: 0.0,
            params,
            store,
        };
        if let Some(snapshot) = snapshot {
            state.resume(snapshot, now);
        }
        state
    }

    pub fn phase(&self) -> Phase {
        if self.start_time.is_some() {
            Phase::Running
        } else {
            Phase::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    pub fn tap_count(&self) -> u32 {
        self.tap_count
    }

    /// Whole-session average strokes per minute; `None` while idle
    pub fn spm(&self) -> Option<f64> {
        self.start_time.map(|_| self.spm)
    }

    pub fn pump_rate(&self) -> Option<f64> {
        self.spm().map(|spm| self.params.pump_rate(spm))
    }

    pub fn parameters(&self) -> PumpParameters {
        self.params
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            start_time: self.start_time,
            tap_count: self.tap_count,
            spm: self.spm,
        }
    }

    fn persist(&mut self) {
        let snapshot = self.snapshot();
        if let Err(e) = self.store.save_snapshot(&snapshot) {
            error!("failed to persist session snapshot: {e}");
        }
    }

    /// The single user action: opens a session when idle, counts a stroke otherwise
    pub fn tap(&mut self, now: DateTime<Utc>) -> TapOutcome {
        if self.start(now) {
            return TapOutcome::Started;
        }
        self.register_tap(now).unwrap_or(TapOutcome::Ignored)
    }

    /// Returns false, changing nothing, when a session is already running
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.start_time.is_some() {
            return false;
        }
        self.start_time = Some(now);
        self.tap_count = 0;
        self.spm = 0.0;
        self.persist();
        info!("session started at {now}");
        true
    }

    pub fn register_tap(&mut self, now: DateTime<Utc>) -> Result<TapOutcome> {
        let Some(start) = self.start_time else {
            warn!("tap registered with no active session");
            return Err(Error::NoActiveSession);
        };

        let elapsed = seconds_between(start, now);
        if elapsed <= 0.0 {
            debug!("dropping tap {elapsed}s from session start");
            return Ok(TapOutcome::Ignored);
        }

        self.tap_count = self.tap_count.saturating_add(1);
        self.spm = (60.0 / elapsed) * self.tap_count as f64;
        self.persist();
        debug!(
            "tap {} at {elapsed:.3}s, spm {:.3}",
            self.tap_count, self.spm
        );

        Ok(TapOutcome::Counted {
            tap_count: self.tap_count,
            spm: self.spm,
        })
    }

    /// Rehydrates from a persisted snapshot. The stored rate is trusted as-is.
    pub fn resume(&mut self, snapshot: SessionSnapshot, now: DateTime<Utc>) {
        let Some(start) = snapshot.start_time else {
            debug!("ignoring snapshot without a start time");
            return;
        };
        self.start_time = Some(start);
        self.tap_count = snapshot.tap_count;
        self.spm = snapshot.spm;
        info!(
            "resumed session from {start} ({:.0}s ago) at {:.1} spm",
            seconds_between(start, now),
            self.spm
        );
    }

    pub fn reset(&mut self) {
        if self.start_time.is_some() {
            info!("session reset after {} taps", self.tap_count);
        }
        self.start_time = None;
        self.tap_count = 0;
        self.spm = 0.0;
        if let Err(e) = self.store.clear_snapshot() {
            error!("failed to clear session snapshot: {e}");
        }
    }

    /// `None` while idle
    pub fn recompute_derived(&self, now: DateTime<Utc>) -> Option<DerivedMetrics> {
        let Some(start) = self.start_time else {
            trace!("no active session to derive metrics from");
            return None;
        };
        let elapsed_seconds = seconds_between(start, now).max(0.0);
        let pump_rate = self.params.pump_rate(self.spm);
        Some(DerivedMetrics {
            elapsed_seconds,
            pump_rate,
            volume_displaced: (elapsed_seconds / 60.0) * pump_rate,
        })
    }

    pub fn update_coefficient(&mut self, value: f64) -> Result<()> {
        self.update_parameter(Parameter::Coefficient, value)
    }

    pub fn update_efficiency(&mut self, value: f64) -> Result<()> {
        self.update_parameter(Parameter::Efficiency, value)
    }

    fn update_parameter(&mut self, parameter: Parameter, value: f64) -> Result<()> {
        let value = validate(parameter, value)?;
        self.store.save_parameter(parameter, value)?;
        match parameter {
            Parameter::Coefficient => self.params.coefficient = value,
            Parameter::Efficiency => self.params.efficiency = value,
        }
        debug!("{parameter} set to {value}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{Defaults, MemoryDefaults};
    use assert_matches::assert_matches;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn fresh() -> SessionState {
        SessionState::open(SettingsStore::in_memory(), t(0))
    }

    #[test]
    fn opens_idle_with_defaults() {
        let s = fresh();
        assert_eq!(s.phase(), Phase::Idle);
        assert_eq!(s.parameters(), PumpParameters::default());
        assert_eq!(s.spm(), None);
        assert_eq!(s.pump_rate(), None);
        assert_eq!(s.recompute_derived(t(10)), None);
    }

    #[test]
    fn first_tap_starts_session() {
        let mut s = fresh();
        assert_eq!(s.tap(t(0)), TapOutcome::Started);
        assert_eq!(s.phase(), Phase::Running);
        assert_eq!(s.tap_count(), 0);
        assert_eq!(s.spm(), Some(0.0));
        assert_eq!(s.start_time(), Some(t(0)));
    }

    #[test]
    fn start_while_running_is_noop() {
        let mut s = fresh();
        assert!(s.start(t(0)));
        s.register_tap(t(6)).unwrap();
        assert!(!s.start(t(9)));
        assert_eq!(s.start_time(), Some(t(0)));
        assert_eq!(s.tap_count(), 1);
    }

    #[test]
    fn scenario_average_rate() {
        let mut s = fresh();
        s.tap(t(0));

        assert_eq!(
            s.tap(t(6)),
            TapOutcome::Counted {
                tap_count: 1,
                spm: 10.0
            }
        );
        assert!((s.pump_rate().unwrap() - 0.056).abs() < 1e-12);

        assert_eq!(
            s.tap(t(12)),
            TapOutcome::Counted {
                tap_count: 2,
                spm: 10.0
            }
        );

        let m = s.recompute_derived(t(30)).unwrap();
        assert_eq!(m.elapsed_seconds, 30.0);
        assert!((m.pump_rate - 0.056).abs() < 1e-12);
        assert!((m.volume_displaced - 0.028).abs() < 1e-12);
    }

    #[test]
    fn average_covers_whole_session() {
        let mut s = fresh();
        s.tap(t(0));
        s.tap(t(2));
        s.tap(t(4));
        // long pause, then a burst: rate is still total taps over total time
        let outcome = s.tap(t(60));
        assert_eq!(
            outcome,
            TapOutcome::Counted {
                tap_count: 3,
                spm: 3.0
            }
        );
    }

    #[test]
    fn tap_at_start_instant_is_dropped() {
        let mut s = fresh();
        s.tap(t(0));
        assert_eq!(s.tap(t(0)), TapOutcome::Ignored);
        assert_eq!(s.tap_count(), 0);
        assert_eq!(s.spm(), Some(0.0));
        assert_matches!(s.register_tap(t(-1)), Ok(TapOutcome::Ignored));
    }

    #[test]
    fn tap_while_idle_is_contract_violation() {
        let mut s = fresh();
        assert_matches!(s.register_tap(t(5)), Err(Error::NoActiveSession));
        assert_eq!(s.phase(), Phase::Idle);
        assert_eq!(s.tap_count(), 0);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut s = fresh();
        s.tap(t(0));
        s.tap(t(6));
        s.reset();
        let once = s.snapshot();
        s.reset();
        assert_eq!(s.snapshot(), once);
        assert_eq!(once, SessionSnapshot::default());
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[test]
    fn taps_are_persisted_and_reset_clears() {
        let mut store = SettingsStore::in_memory();
        store.load_parameters();
        let mut s = SessionState::open(store, t(0));
        s.tap(t(0));
        s.tap(t(6));
        assert_eq!(
            s.store.load_snapshot(),
            Some(SessionSnapshot {
                start_time: Some(t(0)),
                tap_count: 1,
                spm: 10.0
            })
        );
        s.reset();
        assert_eq!(s.store.load_snapshot(), None);
    }

    #[test]
    fn resume_trusts_persisted_rate() {
        let mut s = fresh();
        s.resume(
            SessionSnapshot {
                start_time: Some(t(0)),
                tap_count: 0,
                spm: 12.0,
            },
            t(600),
        );
        assert_eq!(s.phase(), Phase::Running);
        let m = s.recompute_derived(t(600)).unwrap();
        assert!((m.pump_rate - 12.0 * 0.0056).abs() < 1e-12);
        assert_eq!(s.tap_count(), 0);
    }

    #[test]
    fn open_resumes_left_over_snapshot() {
        let mut store = SettingsStore::in_memory();
        store
            .save_snapshot(&SessionSnapshot {
                start_time: Some(t(0)),
                tap_count: 5,
                spm: 7.5,
            })
            .unwrap();
        let s = SessionState::open(store, t(120));
        assert!(s.is_running());
        assert_eq!(s.tap_count(), 5);
        assert_eq!(s.spm(), Some(7.5));
    }

    #[test]
    fn tap_after_resume_continues_average() {
        let mut s = fresh();
        s.resume(
            SessionSnapshot {
                start_time: Some(t(0)),
                tap_count: 9,
                spm: 9.0,
            },
            t(60),
        );
        assert_eq!(
            s.tap(t(60)),
            TapOutcome::Counted {
                tap_count: 10,
                spm: 10.0
            }
        );
    }

    #[test]
    fn tap_count_at_limit_does_not_overflow() {
        let mut store = SettingsStore::in_memory();
        store
            .save_snapshot(&SessionSnapshot {
                start_time: Some(t(0)),
                tap_count: u32::MAX,
                spm: 1.0,
            })
            .unwrap();
        let mut s = SessionState::open(store, t(6));
        assert_matches!(
            s.tap(t(6)),
            TapOutcome::Counted { tap_count: u32::MAX, spm } if spm.is_finite()
        );
        assert_eq!(s.tap_count(), u32::MAX);
    }

    #[test]
    fn resume_without_start_time_stays_idle() {
        let mut s = fresh();
        s.resume(SessionSnapshot::default(), t(5));
        assert_eq!(s.phase(), Phase::Idle);
    }

    #[test]
    fn parameter_updates_validate_and_persist() {
        let mut s = fresh();
        s.tap(t(0));
        s.tap(t(6));

        s.update_efficiency(1.5).unwrap();
        assert!((s.pump_rate().unwrap() - 0.084).abs() < 1e-12);

        assert_matches!(
            s.update_coefficient(0.0),
            Err(Error::InvalidInput { field: "coefficient", .. })
        );
        assert_matches!(s.update_coefficient(f64::NAN), Err(Error::InvalidInput { .. }));
        assert_eq!(s.parameters().coefficient, 0.0056);

        s.update_coefficient(0.01).unwrap();
        assert_eq!(s.store.stored_parameter(Parameter::Coefficient), Some(0.01));
        assert_eq!(s.store.stored_parameter(Parameter::Efficiency), Some(1.5));
    }

    #[test]
    fn pump_rate_is_product_for_many_inputs() {
        for (c, e, spm) in [(0.0056, 1.0, 10.0), (0.01, 0.85, 7.3), (1.2, 2.5, 0.0)] {
            let mut defaults = MemoryDefaults::new();
            defaults.set("coefficient", &c.to_string()).unwrap();
            defaults.set("efficiency", &e.to_string()).unwrap();
            let mut s = SessionState::open(SettingsStore::new(defaults), t(0));
            s.resume(
                SessionSnapshot {
                    start_time: Some(t(0)),
                    tap_count: 3,
                    spm,
                },
                t(30),
            );
            let m = s.recompute_derived(t(30)).unwrap();
            assert!((m.pump_rate - spm * c * e).abs() < 1e-12);
        }
    }
}
