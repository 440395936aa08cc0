//! Summary reports of a race and comparisons between two races.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::PathBuf;

use racetrack_types::{MetricRecord, MetricSummary, ReportFormat};

use crate::console::Console;
use crate::store::RaceRecord;

/// Summaries per metric name, in name order.
pub fn summarize(records: &[MetricRecord]) -> Vec<MetricSummary> {
    let mut grouped: BTreeMap<(&str, &str), Vec<f64>> = BTreeMap::new();
    for record in records {
        grouped
            .entry((record.name.as_str(), record.unit.as_str()))
            .or_default()
            .push(record.value);
    }
    grouped
        .into_iter()
        .map(|((name, unit), mut values)| {
            values.sort_by(f64::total_cmp);
            let count = values.len();
            let median = if count % 2 == 1 {
                values[count / 2]
            } else {
                (values[count / 2 - 1] + values[count / 2]) / 2.0
            };
            MetricSummary {
                name: name.to_string(),
                unit: unit.to_string(),
                count,
                min: values[0],
                median,
                mean: values.iter().sum::<f64>() / count as f64,
                max: values[count - 1],
            }
        })
        .collect()
}

/// Summaries of the records of one lap only.
pub fn summarize_lap(records: &[MetricRecord], lap: u32) -> Vec<MetricSummary> {
    let lap_records: Vec<MetricRecord> = records
        .iter()
        .filter(|r| r.lap == Some(lap))
        .cloned()
        .collect();
    summarize(&lap_records)
}

#[derive(Debug, Clone)]
pub struct Reporter {
    format: ReportFormat,
    output_file: Option<PathBuf>,
    console: Console,
}

impl Reporter {
    pub fn new(format: ReportFormat, output_file: Option<PathBuf>, console: Console) -> Self {
        Self {
            format,
            output_file,
            console,
        }
    }

    pub fn render(&self, summaries: &[MetricSummary]) -> String {
        let header = ["Metric", "Unit", "Count", "Min", "Median", "Mean", "Max"];
        let rows: Vec<[String; 7]> = summaries
            .iter()
            .map(|s| {
                [
                    s.name.clone(),
                    s.unit.clone(),
                    s.count.to_string(),
                    format!("{:.3}", s.min),
                    format!("{:.3}", s.median),
                    format!("{:.3}", s.mean),
                    format!("{:.3}", s.max),
                ]
            })
            .collect();
        match self.format {
            ReportFormat::Markdown => markdown_table(&header, &rows),
            ReportFormat::Csv => csv_table(&header, &rows),
        }
    }

    /// Print the summary of a whole race (`lap == None`) or of one lap, and
    /// write the whole-race report to the output file if one is configured.
    pub fn report(&self, summaries: &[MetricSummary], lap: Option<u32>) -> std::io::Result<()> {
        let title = match lap {
            Some(lap) => format!("Lap {lap} Report"),
            None => "Final Report".to_string(),
        };
        let rendered = self.render(summaries);
        self.console.println("");
        self.console.heading(&title);
        self.console.println(&rendered);

        if let (None, Some(path)) = (lap, &self.output_file) {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &rendered)?;
            self.console
                .info(format!("Wrote report to [{}]", path.display()));
        }
        Ok(())
    }

    /// Side by side means of two races.
    pub fn compare(&self, baseline: &RaceRecord, contender: &RaceRecord) -> String {
        let mut names: Vec<(&str, &str)> = baseline
            .results
            .iter()
            .chain(&contender.results)
            .map(|s| (s.name.as_str(), s.unit.as_str()))
            .collect();
        names.sort();
        names.dedup();

        let mean_of = |race: &RaceRecord, name: &str| {
            race.results
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.mean)
        };
        let rows: Vec<[String; 5]> = names
            .into_iter()
            .map(|(name, unit)| {
                let base = mean_of(baseline, name);
                let cont = mean_of(contender, name);
                let diff = match (base, cont) {
                    (Some(b), Some(c)) => format!("{:+.3}", c - b),
                    _ => String::new(),
                };
                let fmt = |v: Option<f64>| v.map(|v| format!("{v:.3}")).unwrap_or_default();
                [name.to_string(), unit.to_string(), fmt(base), fmt(cont), diff]
            })
            .collect();
        let header = ["Metric", "Unit", "Baseline", "Contender", "Diff"];

        let mut out = String::new();
        let _ = writeln!(out, "Baseline:  {} ({})", baseline.race_timestamp, baseline.car);
        let _ = writeln!(out, "Contender: {} ({})", contender.race_timestamp, contender.car);
        out.push('\n');
        out.push_str(&match self.format {
            ReportFormat::Markdown => markdown_table(&header, &rows),
            ReportFormat::Csv => csv_table(&header, &rows),
        });
        out
    }
}

pub(crate) fn markdown_table<const N: usize>(header: &[&str; N], rows: &[[String; N]]) -> String {
    let mut widths: Vec<usize> = header.iter().map(|h| h.len()).collect();
    for row in rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.len());
        }
    }
    let line = |cells: Vec<&str>| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<w$}", cell, w = *width))
            .collect();
        format!("| {} |\n", padded.join(" | "))
    };

    let mut out = line(header.to_vec());
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    out.push_str(&format!("|-{}-|\n", rule.join("-|-")));
    for row in rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
    }
    out
}

fn csv_table<const N: usize>(header: &[&str; N], rows: &[[String; N]]) -> String {
    let mut out = header.join(",");
    out.push('\n');
    for row in rows {
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, value: f64, lap: u32) -> MetricRecord {
        let mut record = MetricRecord::new(name, value, "ms");
        record.lap = Some(lap);
        record
    }

    #[test]
    fn test_summary_statistics() {
        let records = vec![
            record("latency", 4.0, 1),
            record("latency", 1.0, 1),
            record("latency", 3.0, 2),
            record("latency", 2.0, 2),
            record("errors", 0.0, 1),
        ];
        let summaries = summarize(&records);
        assert_eq!(summaries.len(), 2);
        let latency = &summaries[1];
        assert_eq!(latency.name, "latency");
        assert_eq!(latency.count, 4);
        assert_eq!(latency.min, 1.0);
        assert_eq!(latency.median, 2.5);
        assert_eq!(latency.mean, 2.5);
        assert_eq!(latency.max, 4.0);

        let lap_two = summarize_lap(&records, 2);
        assert_eq!(lap_two.len(), 1);
        assert_eq!(lap_two[0].count, 2);
    }

    #[test]
    fn test_csv_rendering() {
        let reporter = Reporter::new(ReportFormat::Csv, None, Console::new(true));
        let rendered = reporter.render(&summarize(&[record("latency", 2.0, 1)]));
        assert_eq!(
            rendered,
            "Metric,Unit,Count,Min,Median,Mean,Max\nlatency,ms,1,2.000,2.000,2.000,2.000\n"
        );
    }

    #[test]
    fn test_markdown_columns_line_up() {
        let reporter = Reporter::new(ReportFormat::Markdown, None, Console::new(true));
        let rendered = reporter.render(&summarize(&[record("connect_latency", 2.0, 1)]));
        let widths: Vec<usize> = rendered.lines().map(str::len).collect();
        assert_eq!(widths.len(), 3);
        assert!(widths.iter().all(|w| *w == widths[0]));
    }

    #[test]
    fn test_report_writes_output_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out").join("report.csv");
        let reporter = Reporter::new(ReportFormat::Csv, Some(path.clone()), Console::new(true));
        reporter
            .report(&summarize(&[record("latency", 1.0, 1)]), None)
            .unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("Metric,"));
    }
}
