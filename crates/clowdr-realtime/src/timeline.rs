//! Schedule timeline viewport
//!
//! The schedule view shows a window of `visible_span_seconds` starting at
//! `start_time_ms`, inside the bounds spanned by the events it has seen.
//! Event rows report their start/end through [`TimelineParameters::notify_event_start`]
//! and [`TimelineParameters::notify_event_end`]; the bounds only ever widen.
//!
//! Every start mutation is written to local storage so the next session
//! opens where the last one left off.

use std::sync::Arc;

use clowdr_core::{Clock, Observable, Subscription};
use tracing::{debug, warn};

use crate::storage::LocalStorage;

/// Local storage key holding the last viewport start (epoch millis)
pub const LAST_START_TIME_KEY: &str = "timeline-params-last-start-time";

/// Visible span before the user zooms
pub const DEFAULT_VISIBLE_SPAN_SECONDS: f64 = 4.0 * 60.0 * 60.0;

/// Narrowest zoom level
pub const MIN_VISIBLE_SPAN_SECONDS: f64 = 5.0 * 60.0;

const RENDERED_START_STEP_MS: i64 = 5 * 60 * 1000;

/// Largest magnitude accepted for a stored start (the ECMAScript date range)
const MAX_STORED_START_MS: f64 = 8.64e15;

/// Round to the nearest multiple of `step`, halves away from zero
fn round_to_nearest(value: i64, step: i64) -> i64 {
    ((value as f64 / step as f64).round() as i64).saturating_mul(step)
}

/// Snapshot of the viewport state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineWindow {
    start_time_ms: i64,
    earliest_event_ms: Option<i64>,
    latest_event_ms: Option<i64>,
    visible_span_seconds: f64,
}

impl TimelineWindow {
    /// Window starting at `start_time_ms` with no known events
    pub fn new(start_time_ms: i64) -> Self {
        Self {
            start_time_ms,
            earliest_event_ms: None,
            latest_event_ms: None,
            visible_span_seconds: DEFAULT_VISIBLE_SPAN_SECONDS,
        }
    }

    /// Raw (unrounded) viewport start
    pub fn start_time_ms(&self) -> i64 {
        self.start_time_ms
    }

    /// Earliest known event start; the viewport start until an event reports in
    pub fn earliest_ms(&self) -> i64 {
        self.earliest_event_ms.unwrap_or(self.start_time_ms)
    }

    /// Latest known event end; one second past `earliest_ms` until an event reports in
    pub fn latest_ms(&self) -> i64 {
        self.latest_event_ms
            .unwrap_or(self.earliest_ms().saturating_add(1000))
    }

    pub fn visible_span_seconds(&self) -> f64 {
        self.visible_span_seconds
    }

    fn visible_span_ms(&self) -> i64 {
        (self.visible_span_seconds * 1000.0).round() as i64
    }

    /// Viewport start as rendered: clamped to the event bounds and rounded
    /// to the nearest five minutes
    pub fn rendered_start_ms(&self) -> i64 {
        let clamped = self
            .earliest_ms()
            .max(self.latest_ms().min(self.start_time_ms));
        round_to_nearest(clamped, RENDERED_START_STEP_MS)
    }

    /// Width of the event bounds in seconds, never below one second
    pub fn full_span_seconds(&self) -> f64 {
        self.latest_ms().saturating_sub(self.earliest_ms()).max(1000) as f64 / 1000.0
    }

    /// Distance of the viewport start from the earliest event, in seconds
    pub fn start_offset_seconds(&self) -> f64 {
        self.start_time_ms.saturating_sub(self.earliest_ms()) as f64 / 1000.0
    }

    /// Clamp a candidate start into `[earliest, latest - visible span]`;
    /// the lower bound wins when the window is narrower than the span
    fn clamp_start(&self, candidate: i64) -> i64 {
        self.earliest_ms()
            .max(self.latest_ms().saturating_sub(self.visible_span_ms()).min(candidate))
    }

    /// Same window with the start pulled back inside the bounds
    fn clamped(self) -> Self {
        Self {
            start_time_ms: self.clamp_start(self.start_time_ms),
            ..self
        }
    }

    /// Clamp a candidate span into `[5 min, latest - earliest]`; the lower
    /// bound wins
    fn clamp_span(&self, candidate: f64) -> f64 {
        let upper = self.latest_ms().saturating_sub(self.earliest_ms()) as f64 / 1000.0;
        MIN_VISIBLE_SPAN_SECONDS.max(upper.min(candidate))
    }
}

/// Shared, persisted timeline viewport
pub struct TimelineParameters {
    window: Observable<TimelineWindow>,
    storage: Arc<dyn LocalStorage>,
}

impl TimelineParameters {
    /// Create parameters starting at an explicit time
    pub fn new(storage: Arc<dyn LocalStorage>, default_start_ms: i64) -> Self {
        Self {
            window: Observable::new(TimelineWindow::new(default_start_ms)),
            storage,
        }
    }

    /// Create parameters starting where the previous session left off,
    /// or at the current time if nothing usable was stored
    pub fn restore(storage: Arc<dyn LocalStorage>, clock: &dyn Clock) -> Self {
        let start = Self::stored_start(storage.as_ref()).unwrap_or_else(|| clock.now_millis());
        Self::new(storage, start)
    }

    fn stored_start(storage: &dyn LocalStorage) -> Option<i64> {
        let raw = match storage.get_item(LAST_START_TIME_KEY) {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(error = %e, "Failed to read last timeline start");
                return None;
            }
        };
        match raw.trim().parse::<f64>() {
            Ok(ms) if ms.is_finite() && ms.abs() <= MAX_STORED_START_MS => Some(ms as i64),
            _ => {
                debug!(value = %raw, "Ignoring unparsable timeline start");
                None
            }
        }
    }

    /// Current viewport state
    pub fn window(&self) -> TimelineWindow {
        self.window.get()
    }

    /// Observe viewport changes (called immediately with the current state)
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe(
        &self,
        callback: impl Fn(&TimelineWindow) + Send + Sync + 'static,
    ) -> Subscription {
        self.window.subscribe(callback)
    }

    /// Move the viewport start to `target_ms`, clamped to the event bounds
    pub fn shift_to(&self, target_ms: i64) {
        self.shift_with(|_, _| target_ms);
    }

    /// Move the viewport start to `f(old_start_ms, visible_span_ms)`,
    /// clamped to the event bounds
    pub fn shift_with(&self, f: impl FnOnce(i64, i64) -> i64) {
        let mut new_start = 0;
        self.window.update(|window| {
            let candidate = f(window.start_time_ms, window.visible_span_ms());
            new_start = window.clamp_start(candidate);
            TimelineWindow {
                start_time_ms: new_start,
                ..*window
            }
        });
        self.persist_start(new_start);
    }

    /// Change the visible span to `f(old_span_seconds)`, clamped to
    /// `[5 min, full event span]`; the start is re-clamped to the new span
    pub fn zoom_to(&self, f: impl FnOnce(f64) -> f64) {
        self.update_clamped(|window| TimelineWindow {
            visible_span_seconds: window.clamp_span(f(window.visible_span_seconds)),
            ..*window
        });
    }

    /// Report an event start; only ever moves the earliest bound back
    pub fn notify_event_start(&self, start_ms: i64) {
        self.update_clamped(|window| TimelineWindow {
            earliest_event_ms: Some(match window.earliest_event_ms {
                Some(old) => old.min(start_ms),
                None => start_ms,
            }),
            ..*window
        });
    }

    /// Report an event end; only ever moves the latest bound forward
    pub fn notify_event_end(&self, end_ms: i64) {
        self.update_clamped(|window| TimelineWindow {
            latest_event_ms: Some(match window.latest_event_ms {
                Some(old) => old.max(end_ms),
                None => end_ms,
            }),
            ..*window
        });
    }

    /// Apply `f`, clamp the start into the resulting bounds and persist it
    /// if it moved
    fn update_clamped(&self, f: impl FnOnce(&TimelineWindow) -> TimelineWindow) {
        let mut moved = None;
        self.window.update(|window| {
            let next = f(window).clamped();
            if next.start_time_ms != window.start_time_ms {
                moved = Some(next.start_time_ms);
            }
            next
        });
        if let Some(start_ms) = moved {
            self.persist_start(start_ms);
        }
    }

    fn persist_start(&self, start_ms: i64) {
        if let Err(e) = self
            .storage
            .set_item(LAST_START_TIME_KEY, &start_ms.to_string())
        {
            warn!(error = %e, "Failed to persist timeline start");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use clowdr_core::ManualClock;

    const HOUR: i64 = 60 * 60 * 1000;

    fn params_with_bounds(earliest: i64, latest: i64) -> (TimelineParameters, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let params = TimelineParameters::new(storage.clone(), earliest);
        params.notify_event_start(earliest);
        params.notify_event_end(latest);
        (params, storage)
    }

    #[test]
    fn test_defaults_without_events() {
        let params = TimelineParameters::new(Arc::new(MemoryStorage::new()), 10 * HOUR);
        let window = params.window();
        assert_eq!(window.earliest_ms(), 10 * HOUR);
        assert_eq!(window.latest_ms(), 10 * HOUR + 1000);
        assert_eq!(window.visible_span_seconds(), DEFAULT_VISIBLE_SPAN_SECONDS);
        assert_eq!(window.full_span_seconds(), 1.0);
        assert_eq!(window.start_offset_seconds(), 0.0);
    }

    #[test]
    fn test_shift_clamps_into_bounds() {
        let (params, _) = params_with_bounds(0, 24 * HOUR);

        params.shift_to(30 * HOUR);
        assert_eq!(params.window().start_time_ms(), 20 * HOUR);

        params.shift_to(-5 * HOUR);
        assert_eq!(params.window().start_time_ms(), 0);

        params.shift_with(|old, span| old + span / 2);
        assert_eq!(params.window().start_time_ms(), 2 * HOUR);
    }

    #[test]
    fn test_shift_lower_bound_wins_on_narrow_window() {
        let (params, _) = params_with_bounds(0, HOUR);
        params.shift_to(30 * 60 * 1000);
        assert_eq!(params.window().start_time_ms(), 0);
    }

    #[test]
    fn test_shift_persists_start() {
        let (params, storage) = params_with_bounds(0, 24 * HOUR);
        params.shift_to(3 * HOUR);
        assert_eq!(
            storage.get_item(LAST_START_TIME_KEY).unwrap(),
            Some((3 * HOUR).to_string())
        );
    }

    #[test]
    fn test_zoom_clamps() {
        let (params, _) = params_with_bounds(0, 2 * HOUR);

        params.zoom_to(|_| 10.0);
        assert_eq!(params.window().visible_span_seconds(), MIN_VISIBLE_SPAN_SECONDS);

        params.zoom_to(|old| old * 1000.0);
        assert_eq!(params.window().visible_span_seconds(), 7200.0);

        params.zoom_to(|old| old / 2.0);
        assert_eq!(params.window().visible_span_seconds(), 3600.0);
    }

    #[test]
    fn test_zoom_lower_bound_wins_on_tiny_window() {
        let params = TimelineParameters::new(Arc::new(MemoryStorage::new()), 0);
        params.zoom_to(|_| 1_000_000.0);
        assert_eq!(params.window().visible_span_seconds(), MIN_VISIBLE_SPAN_SECONDS);
    }

    fn assert_start_in_bounds(window: &TimelineWindow) {
        let upper = window.latest_ms() - (window.visible_span_seconds() * 1000.0) as i64;
        assert!(
            window.start_time_ms() >= window.earliest_ms()
                && (window.start_time_ms() <= upper || window.start_time_ms() == window.earliest_ms()),
            "start {} outside [{}, {}]",
            window.start_time_ms(),
            window.earliest_ms(),
            upper
        );
    }

    #[test]
    fn test_zoom_out_pulls_start_back() {
        let (params, storage) = params_with_bounds(0, 24 * HOUR);
        params.shift_to(20 * HOUR);
        assert_eq!(params.window().start_time_ms(), 20 * HOUR);

        params.zoom_to(|_| (8 * 60 * 60) as f64);
        assert_eq!(params.window().start_time_ms(), 16 * HOUR);
        assert_start_in_bounds(&params.window());
        assert_eq!(
            storage.get_item(LAST_START_TIME_KEY).unwrap(),
            Some((16 * HOUR).to_string())
        );
    }

    #[test]
    fn test_new_earliest_bound_pulls_start_forward() {
        let params = TimelineParameters::new(Arc::new(MemoryStorage::new()), 0);
        params.notify_event_start(5 * HOUR);
        assert_eq!(params.window().earliest_ms(), 5 * HOUR);
        assert_eq!(params.window().start_time_ms(), 5 * HOUR);

        params.notify_event_end(20 * HOUR);
        assert_start_in_bounds(&params.window());
    }

    #[test]
    fn test_bounds_hold_across_mixed_mutations() {
        let (params, _) = params_with_bounds(2 * HOUR, 6 * HOUR);
        params.shift_to(10 * HOUR);
        assert_start_in_bounds(&params.window());

        params.notify_event_end(30 * HOUR);
        params.shift_to(25 * HOUR);
        params.zoom_to(|old| old * 3.0);
        assert_start_in_bounds(&params.window());

        params.notify_event_start(0);
        params.zoom_to(|_| 1.0);
        assert_start_in_bounds(&params.window());
    }

    #[test]
    fn test_bounds_only_widen() {
        let (params, _) = params_with_bounds(5 * HOUR, 10 * HOUR);

        params.notify_event_start(7 * HOUR);
        params.notify_event_end(8 * HOUR);
        assert_eq!(params.window().earliest_ms(), 5 * HOUR);
        assert_eq!(params.window().latest_ms(), 10 * HOUR);

        params.notify_event_start(HOUR);
        params.notify_event_end(12 * HOUR);
        assert_eq!(params.window().earliest_ms(), HOUR);
        assert_eq!(params.window().latest_ms(), 12 * HOUR);
    }

    #[test]
    fn test_rendered_start_rounds_to_five_minutes() {
        let (params, _) = params_with_bounds(0, 5 * HOUR);
        params.shift_to(7 * 60 * 1000 + 31_000);
        assert_eq!(params.window().rendered_start_ms(), 10 * 60 * 1000);
        assert_eq!(params.window().start_offset_seconds(), 451.0);
    }

    #[test]
    fn test_restore_reads_last_start() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item(LAST_START_TIME_KEY, "1234567.0").unwrap();
        let clock = ManualClock::at_millis(99);
        let params = TimelineParameters::restore(storage, &clock);
        assert_eq!(params.window().start_time_ms(), 1_234_567);
    }

    #[test]
    fn test_restore_rejects_out_of_range_start() {
        let clock = ManualClock::at_millis(42_000);
        for raw in ["1e300", "-1e300", "9e15"] {
            let storage = Arc::new(MemoryStorage::new());
            storage.set_item(LAST_START_TIME_KEY, raw).unwrap();
            let params = TimelineParameters::restore(storage, &clock);
            let window = params.window();
            assert_eq!(window.start_time_ms(), 42_000, "stored {raw}");
            assert_eq!(window.latest_ms(), 43_000);
        }
    }

    #[test]
    fn test_extreme_bounds_do_not_overflow() {
        let params = TimelineParameters::new(Arc::new(MemoryStorage::new()), i64::MAX);
        let window = params.window();
        assert_eq!(window.latest_ms(), i64::MAX);
        assert_eq!(window.full_span_seconds(), 1.0);

        params.notify_event_start(i64::MIN);
        params.zoom_to(|old| old * 2.0);
        let window = params.window();
        assert!(window.full_span_seconds() > 0.0);
        assert_eq!(window.start_time_ms(), i64::MIN);
    }

    #[test]
    fn test_restore_falls_back_to_now() {
        let storage = Arc::new(MemoryStorage::new());
        storage.set_item(LAST_START_TIME_KEY, "yesterday").unwrap();
        let clock = ManualClock::at_millis(42_000);
        let params = TimelineParameters::restore(storage, &clock);
        assert_eq!(params.window().start_time_ms(), 42_000);
    }
}
