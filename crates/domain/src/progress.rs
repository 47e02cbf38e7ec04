//! Progress blending for sparse backend signals.
//!
//! The status endpoint reports completion percentage sparsely and sometimes
//! not at all, so the estimator blends that signal with a time-elapsed
//! baseline into a target value that never stalls and never moves backwards.
//! A separate easing step advances the displayed value toward the target a
//! little each frame.
//!
//! The estimator is clock-free: every method takes the elapsed time since
//! monitoring started, so the caller owns the clock and tests stay
//! deterministic.

use std::time::Duration;

use sitepulse_core::{AppError, AppResult};

/// Ceiling for the time-elapsed baseline; only backend signals and
/// completion move progress past it.
const TIME_BASELINE_CEILING: f64 = 92.0;

/// Backend-reported progress is clamped here before blending so the monitor,
/// not the backend, controls the final approach to 100.
const BACKEND_PROGRESS_CEILING: f64 = 95.0;

/// Backend weight while its signal is fresh; the baseline takes the
/// complement. Weights flip once the signal goes stale.
const FRESH_BACKEND_WEIGHT: f64 = 0.65;

/// A backend value that has not changed for this long is considered stale.
const BACKEND_STALE_AFTER: Duration = Duration::from_secs(10);

/// Minimum lead over the baseline once the backend signal has gone stale.
const STALE_FLOOR_BONUS: f64 = 5.0;

/// Fraction of the remaining gap the displayed value closes per frame.
const EASE_FACTOR: f64 = 0.12;

/// Smallest per-frame displayed advance, so the bar never visibly crawls.
const MIN_EASE_STEP: f64 = 0.4;

/// Blends backend progress reports with a time-elapsed baseline into a
/// smooth, monotonically non-decreasing displayed value.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    expected: Duration,
    backend: Option<f64>,
    backend_changed_at: Duration,
    target: f64,
    displayed: f64,
    completed: bool,
}

impl ProgressEstimator {
    /// Creates an estimator for an audit expected to take `expected`.
    pub fn new(expected: Duration) -> AppResult<Self> {
        if expected.is_zero() {
            return Err(AppError::Validation(
                "expected audit duration must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            expected,
            backend: None,
            backend_changed_at: Duration::ZERO,
            target: 0.0,
            displayed: 0.0,
            completed: false,
        })
    }

    /// Records a backend-reported completion percentage observed at `at`.
    ///
    /// The value is clamped to the backend ceiling before it participates in
    /// blending. The staleness timestamp refreshes only when the value
    /// actually changes, so a backend repeating the same number still counts
    /// as stale.
    pub fn observe_backend(&mut self, raw: f64, at: Duration) {
        if !raw.is_finite() {
            return;
        }

        let clamped = raw.clamp(0.0, BACKEND_PROGRESS_CEILING);
        if self.backend != Some(clamped) {
            self.backend_changed_at = at;
        }

        self.backend = Some(clamped);
    }

    /// Returns the time-elapsed baseline at `at`.
    #[must_use]
    pub fn time_baseline(&self, at: Duration) -> f64 {
        let ratio = at.as_secs_f64() / self.expected.as_secs_f64();
        (ratio * TIME_BASELINE_CEILING).min(TIME_BASELINE_CEILING)
    }

    /// Recomputes and returns the target progress at `at`.
    ///
    /// The target is the maximum of the baseline and the blended backend
    /// value, and never decreases across calls.
    pub fn target_at(&mut self, at: Duration) -> f64 {
        if self.completed {
            return self.target;
        }

        let baseline = self.time_baseline(at);
        let candidate = match self.backend {
            None => baseline,
            Some(backend) => {
                let stale = at.saturating_sub(self.backend_changed_at) > BACKEND_STALE_AFTER;
                if stale {
                    // The backend stopped talking; lean on the clock but
                    // keep a visible lead over the bare baseline.
                    let blended = (1.0 - FRESH_BACKEND_WEIGHT) * backend
                        + FRESH_BACKEND_WEIGHT * baseline;
                    blended.max(baseline + STALE_FLOOR_BONUS)
                } else {
                    let blended =
                        FRESH_BACKEND_WEIGHT * backend + (1.0 - FRESH_BACKEND_WEIGHT) * baseline;
                    blended.max(baseline)
                }
            }
        };

        self.target = self.target.max(candidate.clamp(0.0, 100.0));
        self.target
    }

    /// Advances the displayed value one frame toward the target at `at`.
    ///
    /// Eases by a fraction of the remaining gap with a minimum step, without
    /// overshooting. Returns the new displayed value.
    pub fn ease_frame(&mut self, at: Duration) -> f64 {
        let target = self.target_at(at);
        let gap = target - self.displayed;
        if gap > 0.0 {
            let step = (gap * EASE_FACTOR).max(MIN_EASE_STEP);
            self.displayed = (self.displayed + step).min(target);
        }

        self.displayed
    }

    /// Snaps target and displayed progress to 100 on audit completion.
    pub fn complete(&mut self) {
        self.completed = true;
        self.target = 100.0;
        self.displayed = 100.0;
    }

    /// Returns the current displayed value.
    #[must_use]
    pub fn displayed(&self) -> f64 {
        self.displayed
    }

    /// Returns the current target value.
    #[must_use]
    pub fn target(&self) -> f64 {
        self.target
    }

    /// Returns whether completion has been signalled.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }
}
