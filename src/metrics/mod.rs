/*!
 * # Metrics Module
 *
 * In-process counters for authentication and stock activity, rendered in the
 * Prometheus text format at `/metrics`.
 *
 * Series are keyed by name plus a sorted label set, so
 * `increment_counter_with("stock_movements_total", &[("type", "inbound")])`
 * and the same call with labels in another order hit one series.
 */

use crate::entities::{MovementType, OrderStatus};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const LOGINS_TOTAL: &str = "auth_logins_total";
pub const FAILED_LOGINS_TOTAL: &str = "auth_failed_logins_total";
pub const PIN_REJECTIONS_TOTAL: &str = "auth_pin_rejections_total";
pub const STOCK_MOVEMENTS_TOTAL: &str = "stock_movements_total";
pub const STOCK_UNITS_MOVED_TOTAL: &str = "stock_units_moved_total";
pub const ORDER_TRANSITIONS_TOTAL: &str = "order_transitions_total";

#[derive(Debug, Clone, Default)]
pub struct Counter {
    value: Arc<AtomicU64>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, value: u64) {
        self.value.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct SeriesKey {
    name: String,
    labels: Vec<(String, String)>,
}

impl SeriesKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        let mut labels: Vec<(String, String)> = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        labels.sort();
        Self {
            name: name.to_string(),
            labels,
        }
    }

    fn render(&self) -> String {
        if self.labels.is_empty() {
            return self.name.clone();
        }
        let labels = self
            .labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}{{{}}}", self.name, labels)
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    counters: DashMap<SeriesKey, Counter>,
    help: DashMap<String, &'static str>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn describe(&self, name: &str, help: &'static str) {
        self.help.insert(name.to_string(), help);
    }

    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> Counter {
        self.counters
            .entry(SeriesKey::new(name, labels))
            .or_default()
            .clone()
    }

    /// Current value of a series, zero when it was never touched.
    pub fn value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .get(&SeriesKey::new(name, labels))
            .map(|c| c.get())
            .unwrap_or(0)
    }

    /// Prometheus text exposition, series grouped by metric name.
    pub fn export(&self) -> String {
        let mut families: BTreeMap<String, Vec<(String, u64)>> = BTreeMap::new();
        for entry in self.counters.iter() {
            families
                .entry(entry.key().name.clone())
                .or_default()
                .push((entry.key().render(), entry.value().get()));
        }

        let mut output = String::new();
        for (name, mut series) in families {
            series.sort();
            if let Some(help) = self.help.get(&name) {
                let _ = writeln!(output, "# HELP {} {}", name, *help);
            }
            let _ = writeln!(output, "# TYPE {} counter", name);
            for (series_name, value) in series {
                let _ = writeln!(output, "{} {}", series_name, value);
            }
        }
        output
    }
}

lazy_static::lazy_static! {
    pub static ref METRICS: MetricsRegistry = {
        let registry = MetricsRegistry::new();
        registry.describe(LOGINS_TOTAL, "Successful sign-ins by method");
        registry.describe(FAILED_LOGINS_TOTAL, "Rejected sign-in attempts by method");
        registry.describe(PIN_REJECTIONS_TOTAL, "Wrong PINs and rate-limited PIN checks");
        registry.describe(STOCK_MOVEMENTS_TOTAL, "Recorded stock movements by type");
        registry.describe(STOCK_UNITS_MOVED_TOTAL, "Units moved by movement type");
        registry.describe(ORDER_TRANSITIONS_TOTAL, "Order status changes by target status");
        registry
    };
}

pub fn increment_counter(name: &str) {
    METRICS.counter(name, &[]).inc();
}

pub fn increment_counter_with(name: &str, labels: &[(&str, &str)]) {
    METRICS.counter(name, labels).inc();
}

pub fn record_login(method: &str) {
    increment_counter_with(LOGINS_TOTAL, &[("method", method)]);
}

pub fn record_failed_login(method: &str) {
    increment_counter_with(FAILED_LOGINS_TOTAL, &[("method", method)]);
}

pub fn record_pin_rejection(reason: &str) {
    increment_counter_with(PIN_REJECTIONS_TOTAL, &[("reason", reason)]);
}

pub fn record_stock_movement(movement_type: MovementType, units: i32) {
    let kind = movement_type.to_string();
    increment_counter_with(STOCK_MOVEMENTS_TOTAL, &[("type", &kind)]);
    METRICS
        .counter(STOCK_UNITS_MOVED_TOTAL, &[("type", &kind)])
        .inc_by(units.unsigned_abs() as u64);
}

pub fn record_order_transition(to: OrderStatus) {
    increment_counter_with(ORDER_TRANSITIONS_TOTAL, &[("status", &to.to_string())]);
}

/// Renders the global registry.
pub fn export_metrics() -> String {
    METRICS.export()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_order_does_not_split_series() {
        let registry = MetricsRegistry::new();
        registry.counter("t", &[("a", "1"), ("b", "2")]).inc();
        registry.counter("t", &[("b", "2"), ("a", "1")]).inc();
        assert_eq!(registry.value("t", &[("a", "1"), ("b", "2")]), 2);
    }

    #[test]
    fn export_groups_families() {
        let registry = MetricsRegistry::new();
        registry.describe("moves_total", "Moves");
        registry.counter("moves_total", &[("type", "inbound")]).inc_by(3);
        registry.counter("moves_total", &[("type", "outbound")]).inc();
        registry.counter("logins_total", &[]).inc();

        let text = registry.export();
        assert!(text.contains("# HELP moves_total Moves\n"));
        assert!(text.contains("# TYPE moves_total counter\n"));
        assert!(text.contains("moves_total{type=\"inbound\"} 3\n"));
        assert!(text.contains("moves_total{type=\"outbound\"} 1\n"));
        assert!(text.contains("logins_total 1\n"));
        assert_eq!(text.matches("# TYPE moves_total").count(), 1);
    }

    #[test]
    fn label_values_are_escaped() {
        let key = SeriesKey::new("x", &[("reason", "say \"hi\"")]);
        assert_eq!(key.render(), "x{reason=\"say \\\"hi\\\"\"}");
    }

    #[test]
    fn stock_movement_counts_units() {
        let before = METRICS.value(STOCK_UNITS_MOVED_TOTAL, &[("type", "transfer")]);
        record_stock_movement(MovementType::Transfer, 7);
        assert!(METRICS.value(STOCK_UNITS_MOVED_TOTAL, &[("type", "transfer")]) >= before + 7);
    }
}
