//! Per-processor metrics with influx-style naming.
//!
//! Every processor owns its counters and gauges. At topology start the
//! metrics get stamped with the owning application's identity and the
//! processor's kind, record types and partition, yielding names like
//! `in_count,app_id=ingest,partition=3,processor=log_source,...`.

use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

/// What a metric's value means.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    /// Monotone count of events.
    Counter,
    /// Point-in-time level.
    Gauge,
}

/// One named value owned by a processor.
#[derive(Debug)]
pub struct Metric {
    name: &'static str,
    kind: MetricKind,
    value: AtomicI64,
    logged_name: Mutex<Option<String>>,
}

impl Metric {
    #[must_use]
    pub fn counter(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Counter,
            value: AtomicI64::new(0),
            logged_name: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn gauge(name: &'static str) -> Self {
        Self {
            name,
            kind: MetricKind::Gauge,
            value: AtomicI64::new(0),
            logged_name: Mutex::new(None),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    #[must_use]
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// The tagged name assigned at topology start; the bare name before.
    #[must_use]
    pub fn logged_name(&self) -> String {
        self.logged_name
            .lock()
            .expect("metric lock")
            .clone()
            .unwrap_or_else(|| self.name.to_string())
    }

    pub fn set_logged_name(&self, full: String) {
        *self.logged_name.lock().expect("metric lock") = Some(full);
    }
}

/// Escape a tag value: spaces, commas and equals signs are backslash-escaped.
#[must_use]
pub fn escape_tag_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, ' ' | ',' | '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Tag set rendered onto metric names, keys in ascending order.
#[derive(Debug, Clone, Default)]
pub struct MetricTags {
    pairs: Vec<(String, String)>,
}

impl MetricTags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: &str) {
        self.pairs.push((key.to_string(), escape_tag_value(value)));
    }

    #[must_use]
    pub fn with(mut self, key: &str, value: &str) -> Self {
        self.push(key, value);
        self
    }

    /// `metric_name,tag1=v1,tag2=v2,...`
    #[must_use]
    pub fn render(&self, metric_name: &str) -> String {
        let mut pairs = self.pairs.clone();
        pairs.sort();
        let mut out = String::from(metric_name);
        for (k, v) in pairs {
            out.push(',');
            out.push_str(&k);
            out.push('=');
            out.push_str(&v);
        }
        out
    }
}

/// Strip module paths out of a type name, keeping generic structure:
/// `alloc::string::String` becomes `String`,
/// `core::option::Option<alloc::string::String>` becomes `Option<String>`.
#[must_use]
pub fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let mut out = String::with_capacity(full.len());
    let mut segment = String::new();
    for c in full.chars() {
        match c {
            ':' => {
                // drop the accumulated path segment
                segment.clear();
            }
            '<' | '>' | ',' | '(' | ')' | '[' | ']' | ';' | ' ' | '&' => {
                out.push_str(&segment);
                segment.clear();
                out.push(c);
            }
            _ => segment.push(c),
        }
    }
    out.push_str(&segment);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_counts() {
        let m = Metric::counter("in_count");
        m.inc();
        m.inc();
        m.add(3);
        assert_eq!(m.get(), 5);
        assert_eq!(m.kind(), MetricKind::Counter);
    }

    #[test]
    fn gauge_sets() {
        let m = Metric::gauge("commit_chain_size");
        m.set(17);
        m.set(4);
        assert_eq!(m.get(), 4);
    }

    #[test]
    fn escape_covers_space_comma_equals() {
        assert_eq!(escape_tag_value("a b"), "a\\ b");
        assert_eq!(escape_tag_value("a,b"), "a\\,b");
        assert_eq!(escape_tag_value("a=b"), "a\\=b");
        assert_eq!(escape_tag_value("plain"), "plain");
    }

    #[test]
    fn tags_render_sorted() {
        let tags = MetricTags::new()
            .with("topology", "t-0")
            .with("app_id", "my app");
        assert_eq!(
            tags.render("in_count"),
            "in_count,app_id=my\\ app,topology=t-0"
        );
    }

    #[test]
    fn logged_name_defaults_to_bare_name() {
        let m = Metric::counter("out_count");
        assert_eq!(m.logged_name(), "out_count");
        m.set_logged_name("out_count,partition=0".to_string());
        assert_eq!(m.logged_name(), "out_count,partition=0");
    }

    #[test]
    fn short_type_name_strips_paths() {
        assert_eq!(short_type_name::<String>(), "String");
        assert_eq!(short_type_name::<i64>(), "i64");
        assert_eq!(short_type_name::<Option<String>>(), "Option<String>");
        assert_eq!(
            short_type_name::<(String, Option<i64>)>(),
            "(String, Option<i64>)"
        );
        assert_eq!(short_type_name::<()>(), "()");
    }
}
