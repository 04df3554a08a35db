use crate::model::VolumeAnomalyResult;
use chrono::{DateTime, Utc};
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::ASCII_NO_BORDERS};
use std::cmp::Ordering;

pub const FIRST_TRIGGER_MARKER: &str = "🆕";
pub const HIGH_MAGNITUDE_MARKER: &str = "🔥";

/// Anomalous results of one run, strongest spike first.
#[derive(Debug, Clone)]
pub struct Digest {
    rows: Vec<VolumeAnomalyResult>,
    analysed: usize,
    multiplier: f64,
}

impl Digest {
    /// Keeps results with `volume_ratio >= multiplier`, ranked by ratio descending.
    /// Equal ratios keep their original order.
    pub fn build(results: &[VolumeAnomalyResult], multiplier: f64) -> Self {
        let mut rows: Vec<VolumeAnomalyResult> = results
            .iter()
            .filter(|r| r.volume_ratio >= multiplier)
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            b.volume_ratio
                .partial_cmp(&a.volume_ratio)
                .unwrap_or(Ordering::Equal)
        });

        Self {
            rows,
            analysed: results.len(),
            multiplier,
        }
    }

    pub fn rows(&self) -> &[VolumeAnomalyResult] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Plain text report, safe for any character oriented transport.
    ///
    /// `display_suffix` is stripped from symbols for display only.
    pub fn render(
        &self,
        exchange_label: &str,
        display_suffix: &str,
        high_ratio_threshold: f64,
        completed_at: DateTime<Utc>,
    ) -> String {
        let mut lines = vec![format!(
            "📊 {} volume anomalies (ratio ≥ {}x, {} symbols analysed)",
            exchange_label, self.multiplier, self.analysed
        )];

        if self.rows.is_empty() {
            lines.push(format!(
                "No abnormal volume detected: no symbol reached {}x its baseline average.",
                self.multiplier
            ));
        } else {
            lines.push(String::new());
            lines.extend(
                self.table(display_suffix, high_ratio_threshold)
                    .lines()
                    .map(|line| line.trim_end().to_string()),
            );
            lines.push(String::new());
            lines.push(format!(
                "{} first trigger  {} ratio ≥ {}x",
                FIRST_TRIGGER_MARKER, HIGH_MAGNITUDE_MARKER, high_ratio_threshold
            ));
        }

        lines.push(format!("Completed at {}", format_timestamp(completed_at)));
        lines.join("\n")
    }

    fn table(&self, display_suffix: &str, high_ratio_threshold: f64) -> Table {
        let mut table = Table::new();
        table
            .load_preset(ASCII_NO_BORDERS)
            .set_content_arrangement(ContentArrangement::Disabled)
            .set_header(vec![
                Cell::new(""),
                Cell::new("Ratio").set_alignment(CellAlignment::Right),
                Cell::new("Current").set_alignment(CellAlignment::Right),
                Cell::new("Average").set_alignment(CellAlignment::Right),
                Cell::new("Change").set_alignment(CellAlignment::Right),
                Cell::new("Close").set_alignment(CellAlignment::Right),
                Cell::new("Symbol"),
            ]);

        for result in &self.rows {
            let mut markers = String::new();
            if result.is_first_trigger {
                markers.push_str(FIRST_TRIGGER_MARKER);
            }
            if result.volume_ratio >= high_ratio_threshold {
                markers.push_str(HIGH_MAGNITUDE_MARKER);
            }

            table.add_row(vec![
                Cell::new(markers),
                Cell::new(format_ratio(result.volume_ratio)).set_alignment(CellAlignment::Right),
                Cell::new(format_compact(result.current_volume))
                    .set_alignment(CellAlignment::Right),
                Cell::new(format_compact(result.avg_volume)).set_alignment(CellAlignment::Right),
                Cell::new(format!("{:+.2}%", result.price_change_pct))
                    .set_alignment(CellAlignment::Right),
                Cell::new(result.close_price).set_alignment(CellAlignment::Right),
                Cell::new(result.symbol.display_name(display_suffix)),
            ]);
        }

        table
    }
}

fn format_ratio(ratio: f64) -> String {
    if ratio.is_infinite() {
        "∞".to_string()
    } else {
        format!("{:.2}x", ratio)
    }
}

/// Scales volumes to K/M/B with two decimals, e.g. `1234567.0` -> `1.23M`.
fn format_compact(value: f64) -> String {
    let abs = value.abs();
    if abs >= 1e9 {
        format!("{:.2}B", value / 1e9)
    } else if abs >= 1e6 {
        format!("{:.2}M", value / 1e6)
    } else if abs >= 1e3 {
        format!("{:.2}K", value / 1e3)
    } else {
        format!("{:.2}", value)
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%d-%m-%Y %H:%M:%S UTC").to_string()
}
