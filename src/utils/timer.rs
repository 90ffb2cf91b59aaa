//! Timer utilities
//!
//! Monotonic durations paired with wall-clock timestamps for results.

use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Measures one case or phase
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    started_at: DateTime<Utc>,
    label: String,
}

impl Timer {
    /// Create and start a new timer
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            started_at: Utc::now(),
            label: label.into(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Stop the timer: elapsed time plus start and end timestamps
    pub fn stop(self) -> (Duration, DateTime<Utc>, DateTime<Utc>) {
        let elapsed = self.elapsed();
        tracing::trace!("{}: {}ms", self.label, elapsed.as_millis());
        (elapsed, self.started_at, Utc::now())
    }
}

/// Stopwatch with lap timing, used for scheduler phases
#[derive(Debug)]
pub struct Stopwatch {
    start: Instant,
    laps: Vec<(String, Duration)>,
}

impl Stopwatch {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            laps: Vec::new(),
        }
    }

    /// Record a lap
    pub fn lap(&mut self, label: impl Into<String>) {
        let elapsed = self.start.elapsed();
        self.laps.push((label.into(), elapsed));
    }

    pub fn total(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn laps(&self) -> &[(String, Duration)] {
        &self.laps
    }

    /// Duration of each lap, not cumulative
    pub fn lap_times(&self) -> Vec<(String, Duration)> {
        let mut prev = Duration::ZERO;
        self.laps
            .iter()
            .map(|(label, cumulative)| {
                let lap = cumulative.saturating_sub(prev);
                prev = *cumulative;
                (label.clone(), lap)
            })
            .collect()
    }

    /// One-line `phase=Nms` summary
    pub fn format(&self) -> String {
        let mut parts: Vec<String> = self
            .lap_times()
            .into_iter()
            .map(|(label, duration)| format!("{}={}ms", label, duration.as_millis()))
            .collect();
        parts.push(format!("total={}ms", self.total().as_millis()));
        parts.join(" ")
    }
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_timer() {
        let timer = Timer::start("case");
        sleep(Duration::from_millis(10));
        assert!(timer.elapsed_ms() >= 10);

        let (elapsed, started, ended) = timer.stop();
        assert!(elapsed >= Duration::from_millis(10));
        assert!(ended >= started);
    }

    #[test]
    fn test_stopwatch() {
        let mut sw = Stopwatch::new();
        sleep(Duration::from_millis(10));
        sw.lap("partition");
        sleep(Duration::from_millis(10));
        sw.lap("dispatch");

        assert_eq!(sw.laps().len(), 2);
        let lap_times = sw.lap_times();
        assert!(lap_times[1].1 >= Duration::from_millis(10));
        assert!(sw.format().starts_with("partition="));
        assert!(sw.format().contains("total="));
    }
}
