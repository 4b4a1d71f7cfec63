//! The dual-window scan shape.
//!
//! The IoT scan operation asks a backend for two windows of the same time series: the *recent*
//! window starting at a reference timestamp, and a *historical* window of the same width placed
//! somewhere between the start of the run and the reference timestamp. Workloads compare the
//! averages of both windows.
//!
//! Window placement is computed here so that every adapter samples the historical window the
//! same way. Adapters only need to answer single-window range queries, see
//! [`WindowQuery::execute`].

use std::future::Future;

use rand::Rng;

use crate::backend::{BackendResult, FieldMap};
use crate::key::KEY_SEPARATOR;

/// Width of each window in logical time units.
pub const WINDOW_WIDTH: u64 = 5_000;

/// How far back the historical window is based when the run start time is unknown.
pub const HISTORICAL_FALLBACK_OFFSET: u64 = 1_800_000;

/// Distance kept between the latest possible historical window and the reference timestamp.
pub const HISTORICAL_GUARD: u64 = 10_000;

/// An inclusive range of logical timestamps.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeWindow {
    /// First timestamp in the window.
    pub start: u64,
    /// Last timestamp in the window, inclusive.
    pub end: u64,
}

impl TimeWindow {
    /// A window of [`WINDOW_WIDTH`] starting at `start`.
    pub fn starting_at(start: u64) -> Self {
        Self {
            start,
            end: start.saturating_add(WINDOW_WIDTH),
        }
    }

    /// Whether the timestamp falls within this window.
    pub fn contains(&self, timestamp: u64) -> bool {
        (self.start..=self.end).contains(&timestamp)
    }
}

/// Parameters of a dual-window scan.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WindowQuery {
    /// The sensor channel to query.
    pub sensor: String,
    /// The client that produced the series.
    pub client: String,
    /// Start of the recent window.
    pub reference_timestamp: u64,
    /// Logical time at which the run started, or `0` if unknown.
    pub run_start_time: u64,
    /// Maximum number of records returned per window.
    pub limit: Option<usize>,
}

impl WindowQuery {
    /// Creates a query without a record limit.
    pub fn new(
        sensor: impl Into<String>,
        client: impl Into<String>,
        reference_timestamp: u64,
        run_start_time: u64,
    ) -> Self {
        Self {
            sensor: sensor.into(),
            client: client.into(),
            reference_timestamp,
            run_start_time,
            limit: None,
        }
    }

    /// Caps the number of records returned for each window.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// The `client:sensor` series identifier, matching [`RecordKey::device_id`].
    ///
    /// [`RecordKey::device_id`]: crate::RecordKey::device_id
    pub fn device_id(&self) -> String {
        format!("{}{KEY_SEPARATOR}{}", self.client, self.sensor)
    }

    /// The recent window, beginning at the reference timestamp.
    pub fn recent(&self) -> TimeWindow {
        TimeWindow::starting_at(self.reference_timestamp)
    }

    /// The earliest start of the historical window.
    ///
    /// This is the run start time if known, otherwise [`HISTORICAL_FALLBACK_OFFSET`] before the
    /// reference timestamp.
    pub fn historical_base(&self) -> u64 {
        if self.run_start_time > 0 {
            let elapsed = self.reference_timestamp.saturating_sub(self.run_start_time);
            self.reference_timestamp - elapsed
        } else {
            self.reference_timestamp
                .saturating_sub(HISTORICAL_FALLBACK_OFFSET)
        }
    }

    /// Places the historical window at a random point of the elapsed span.
    ///
    /// The window starts somewhere between [`historical_base`](Self::historical_base) and
    /// [`HISTORICAL_GUARD`] before the reference timestamp. If that span is empty, the window
    /// starts at the base.
    pub fn historical<R: Rng + ?Sized>(&self, rng: &mut R) -> TimeWindow {
        let base = self.historical_base();
        let latest = self.reference_timestamp.saturating_sub(HISTORICAL_GUARD);
        let span = latest.saturating_sub(base);

        let start = if span > 0 {
            base + (rng.random::<f64>() * span as f64) as u64
        } else {
            base
        };

        TimeWindow::starting_at(start)
    }

    /// Runs both windows through a single-window `fetch` with the contract's failure semantics.
    ///
    /// The recent window is fetched first and its failure is returned as the error of the whole
    /// scan. A failure of the historical window is logged and reported as `None`.
    pub async fn execute<R, F, Fut>(&self, rng: &mut R, mut fetch: F) -> BackendResult<WindowScan>
    where
        R: Rng + ?Sized,
        F: FnMut(TimeWindow) -> Fut,
        Fut: Future<Output = BackendResult<Vec<FieldMap>>>,
    {
        let recent_window = self.recent();
        let historical_window = self.historical(rng);
        tracing::debug!(
            device = %self.device_id(),
            ?recent_window,
            ?historical_window,
            "planned dual-window scan"
        );

        let recent = fetch(recent_window).await?;
        let historical = match fetch(historical_window).await {
            Ok(records) => Some(records),
            Err(error) => {
                tracing::warn!(
                    error = &error as &dyn std::error::Error,
                    device = %self.device_id(),
                    "historical window query failed"
                );
                None
            }
        };

        Ok(WindowScan { recent, historical })
    }
}

/// The result of a dual-window scan.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WindowScan {
    /// Records of the recent window.
    pub recent: Vec<FieldMap>,
    /// Records of the historical window, or `None` if that query failed.
    pub historical: Option<Vec<FieldMap>>,
}

impl WindowScan {
    /// Records of the historical window, empty if the query failed.
    pub fn historical_records(&self) -> &[FieldMap] {
        self.historical.as_deref().unwrap_or_default()
    }

    /// Whether the recent window returned no records.
    pub fn recent_is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    /// Whether the historical window failed or returned no records.
    pub fn historical_is_empty(&self) -> bool {
        self.historical_records().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    use super::*;
    use crate::backend::BackendError;

    const T: u64 = 10_000_000;

    #[test]
    fn historical_base_falls_back_without_run_start() {
        let query = WindowQuery::new("cent_9_Flow", "cli11", T, 0);
        assert_eq!(query.historical_base(), T - 1_800_000);
    }

    #[test]
    fn historical_base_uses_run_start() {
        let query = WindowQuery::new("cent_9_Flow", "cli11", T, T - 500);
        assert_eq!(query.historical_base(), T - 500);
    }

    #[test]
    fn historical_base_clamps_at_zero() {
        let query = WindowQuery::new("cent_9_Flow", "cli11", 1_000, 0);
        assert_eq!(query.historical_base(), 0);
    }

    #[test]
    fn historical_window_stays_within_elapsed_span() {
        let mut rng = SmallRng::seed_from_u64(7);
        let query = WindowQuery::new("cent_9_Flow", "cli11", T, 0);

        for _ in 0..1_000 {
            let window = query.historical(&mut rng);
            assert!(window.start >= T - 1_800_000);
            assert!(window.start <= T - HISTORICAL_GUARD);
            assert_eq!(window.end - window.start, WINDOW_WIDTH);
        }
    }

    #[test]
    fn historical_window_pins_to_base_for_short_runs() {
        let mut rng = SmallRng::seed_from_u64(7);
        let query = WindowQuery::new("cent_9_Flow", "cli11", T, T - 500);
        assert_eq!(query.historical(&mut rng), TimeWindow::starting_at(T - 500));
    }

    #[test]
    fn recent_window_starts_at_reference() {
        let query = WindowQuery::new("cent_9_Flow", "cli11", T, 0);
        let window = query.recent();
        assert_eq!(window, TimeWindow { start: T, end: T + 5_000 });
        assert!(window.contains(T + 5_000));
        assert!(!window.contains(T - 1));
    }

    #[tokio::test]
    async fn recent_failure_fails_the_scan() {
        let mut rng = SmallRng::seed_from_u64(1);
        let query = WindowQuery::new("cent_9_Flow", "cli11", T, 0);

        let result = query
            .execute(&mut rng, |_| async { Err(BackendError::Unavailable("down".into())) })
            .await;

        assert!(matches!(result, Err(BackendError::Unavailable(_))));
    }

    #[tokio::test]
    async fn historical_failure_degrades() {
        let mut rng = SmallRng::seed_from_u64(1);
        let query = WindowQuery::new("cent_9_Flow", "cli11", T, 0);
        let recent = query.recent();

        let scan = query
            .execute(&mut rng, |window| async move {
                if window == recent {
                    Ok(vec![FieldMap::new()])
                } else {
                    Err(BackendError::Unavailable("down".into()))
                }
            })
            .await
            .unwrap();

        assert_eq!(scan.recent.len(), 1);
        assert_eq!(scan.historical, None);
        assert!(!scan.recent_is_empty());
        assert!(scan.historical_is_empty());
    }
}
