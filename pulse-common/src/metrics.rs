//! Process-wide metrics registry
//!
//! Counters keyed by name plus optional labels, rendered in Prometheus
//! text exposition format. Fed by the HTTP layer and the worker runner;
//! exposed on `/metrics` in development deployments.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Registry {
    counters: BTreeMap<String, Arc<AtomicU64>>,
}

/// Cheap-to-clone handle to the shared registry.
#[derive(Clone, Default)]
pub struct Metrics {
    registry: Arc<RwLock<Registry>>,
}

fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let rendered: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", v.replace('"', "'")))
        .collect();
    format!("{name}{{{}}}", rendered.join(","))
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a labelled counter by one.
    pub async fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        self.add(name, labels, 1).await;
    }

    pub async fn add(&self, name: &str, labels: &[(&str, &str)], delta: u64) {
        let key = series_key(name, labels);
        {
            let registry = self.registry.read().await;
            if let Some(counter) = registry.counters.get(&key) {
                counter.fetch_add(delta, Ordering::Relaxed);
                return;
            }
        }
        let mut registry = self.registry.write().await;
        registry
            .counters
            .entry(key)
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub async fn value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = series_key(name, labels);
        let registry = self.registry.read().await;
        registry
            .counters
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Render all series in Prometheus text format, sorted by key.
    pub async fn render(&self) -> String {
        let registry = self.registry.read().await;
        let mut out = String::new();
        for (key, counter) in &registry.counters {
            out.push_str(key);
            out.push(' ');
            out.push_str(&counter.load(Ordering::Relaxed).to_string());
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increment_and_render() {
        let metrics = Metrics::new();
        metrics
            .increment("http_requests_total", &[("method", "GET"), ("status", "200")])
            .await;
        metrics
            .increment("http_requests_total", &[("method", "GET"), ("status", "200")])
            .await;
        metrics.increment("jobs_processed_total", &[]).await;

        assert_eq!(
            metrics
                .value("http_requests_total", &[("method", "GET"), ("status", "200")])
                .await,
            2
        );

        let text = metrics.render().await;
        assert!(text.contains("http_requests_total{method=\"GET\",status=\"200\"} 2"));
        assert!(text.contains("jobs_processed_total 1"));
    }
}
