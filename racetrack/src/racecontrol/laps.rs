use std::time::Instant;

use racetrack_types::MetricRecord;

use crate::console::Console;
use crate::reporter::{summarize_lap, Reporter};

/// Split `seconds` into whole hours, minutes and seconds.
pub fn seconds_to_hour_minute_seconds(seconds: f64) -> (u64, u64, u64) {
    let total = seconds.max(0.0) as u64;
    (total / 3600, (total % 3600) / 60, total % 60)
}

pub fn format_duration(seconds: f64) -> String {
    let (h, m, s) = seconds_to_hour_minute_seconds(seconds);
    format!("{h:02}:{m:02}:{s:02}")
}

/// Lap banners, per-lap reports and the ETA of the remaining laps. Silent
/// for single-lap races.
pub struct LapCounter {
    laps: u32,
    console: Console,
    reporter: Reporter,
    started: Instant,
    lap_times: f64,
}

impl LapCounter {
    pub fn new(laps: u32, console: Console, reporter: Reporter) -> Self {
        Self {
            laps,
            console,
            reporter,
            started: Instant::now(),
            lap_times: 0.0,
        }
    }

    pub fn before_lap(&self, lap: u32) {
        if self.laps > 1 {
            self.console.heading(format!("Lap [{lap}/{}]", self.laps));
        }
    }

    pub fn after_lap(&mut self, lap: u32, records: &[MetricRecord]) {
        if self.laps <= 1 {
            return;
        }
        let lap_time = self.started.elapsed().as_secs_f64() - self.lap_times;
        self.lap_times += lap_time;

        if let Err(e) = self.reporter.report(&summarize_lap(records, lap), Some(lap)) {
            tracing::warn!(lap, error = %e, "Could not report lap results");
        }
        self.console.println("");
        match self.eta(lap) {
            Some(remaining) => self.console.info(format!(
                "Lap time {} (ETA: {})",
                format_duration(lap_time),
                format_duration(remaining)
            )),
            None => self
                .console
                .info(format!("Lap time {}", format_duration(lap_time))),
        }
        self.console.println("");
    }

    /// Estimated time for the laps after `lap`, from the average so far.
    fn eta(&self, lap: u32) -> Option<f64> {
        (lap < self.laps && lap > 0)
            .then(|| f64::from(self.laps - lap) * self.lap_times / f64::from(lap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use racetrack_types::ReportFormat;

    #[test]
    fn test_seconds_to_hour_minute_seconds() {
        assert_eq!(seconds_to_hour_minute_seconds(0.0), (0, 0, 0));
        assert_eq!(seconds_to_hour_minute_seconds(59.9), (0, 0, 59));
        assert_eq!(seconds_to_hour_minute_seconds(3661.0), (1, 1, 1));
        assert_eq!(seconds_to_hour_minute_seconds(-5.0), (0, 0, 0));
        assert_eq!(format_duration(7325.0), "02:02:05");
    }

    #[test]
    fn test_eta_uses_average_lap_time() {
        let console = Console::new(true);
        let mut counter = LapCounter::new(
            4,
            console,
            Reporter::new(ReportFormat::Markdown, None, console),
        );
        counter.lap_times = 30.0;
        assert_eq!(counter.eta(2), Some(30.0));
        assert_eq!(counter.eta(4), None);
    }
}
