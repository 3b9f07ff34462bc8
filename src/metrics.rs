//! Metrics collection and export for resource pools

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Snapshot of a pool's counters and gauges
///
/// # Examples
///
/// ```
/// use respool::{Pool, PoolConfiguration};
///
/// let pool = Pool::new(
///     PoolConfiguration::new().with_max_pool_size(2),
///     || Ok::<_, std::io::Error>(7),
///     |_| {},
/// );
///
/// let value = pool.get().unwrap();
/// let metrics = pool.get_metrics();
/// assert_eq!(metrics.total_constructed, 1);
/// assert_eq!(metrics.checked_out, 1);
/// assert!(pool.put(value).is_ok());
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PoolMetrics {
    /// Resources built by the constructor
    pub total_constructed: usize,

    /// Constructor calls that failed
    pub construction_failures: usize,

    /// Acquires served from the idle set
    pub total_reused: usize,

    /// Acquires that had to wait for a returned resource
    pub total_waited: usize,

    /// Waiting acquires that received a resource
    pub waits_fulfilled: usize,

    /// Waiting acquires that timed out
    pub wait_timeouts: usize,

    /// Releases admitted into the idle set
    pub total_returned: usize,

    /// Releases rejected for lack of capacity
    pub total_rejected: usize,

    /// Resources handed to the destructor
    pub total_destroyed: usize,

    /// Resources currently idle
    pub idle: usize,

    /// Resources currently checked out
    pub checked_out: usize,

    /// Pool utilization ratio (0.0 to 1.0), zero when unbounded
    pub utilization: f64,

    /// Capacity bound, if any
    pub max_capacity: Option<usize>,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_constructed".to_string(), self.total_constructed.to_string());
        metrics.insert("construction_failures".to_string(), self.construction_failures.to_string());
        metrics.insert("total_reused".to_string(), self.total_reused.to_string());
        metrics.insert("total_waited".to_string(), self.total_waited.to_string());
        metrics.insert("waits_fulfilled".to_string(), self.waits_fulfilled.to_string());
        metrics.insert("wait_timeouts".to_string(), self.wait_timeouts.to_string());
        metrics.insert("total_returned".to_string(), self.total_returned.to_string());
        metrics.insert("total_rejected".to_string(), self.total_rejected.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("idle".to_string(), self.idle.to_string());
        metrics.insert("checked_out".to_string(), self.checked_out.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert(
            "max_capacity".to_string(),
            self.max_capacity.map_or_else(|| "unbounded".to_string(), |max| max.to_string()),
        );
        metrics
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use respool::{Pool, PoolConfiguration};
    /// use std::collections::HashMap;
    ///
    /// let pool = Pool::new(PoolConfiguration::new(), || Ok::<_, std::io::Error>(1), |_| {});
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "broker".to_string());
    ///
    /// let output = pool.export_metrics_prometheus("channels", Some(&tags));
    /// assert!(output.contains("respool_resources_idle"));
    /// assert!(output.contains("service=\"broker\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> String {
        let mut output = String::new();
        let labels = Self::format_labels(pool_name, tags);

        let gauges = [
            ("respool_resources_idle", "Resources currently idle", metrics.idle as f64),
            ("respool_resources_checked_out", "Resources currently checked out", metrics.checked_out as f64),
            ("respool_utilization", "Pool utilization ratio", metrics.utilization),
        ];
        for (name, help, value) in gauges {
            Self::write_metric(&mut output, name, help, "gauge", &labels, &format!("{:.2}", value));
        }

        let counters = [
            ("respool_constructed_total", "Resources built by the constructor", metrics.total_constructed),
            ("respool_construction_failures_total", "Failed constructor calls", metrics.construction_failures),
            ("respool_reused_total", "Acquires served from idle resources", metrics.total_reused),
            ("respool_waited_total", "Acquires that waited on a saturated pool", metrics.total_waited),
            ("respool_waits_fulfilled_total", "Waiting acquires that received a resource", metrics.waits_fulfilled),
            ("respool_wait_timeouts_total", "Waiting acquires that timed out", metrics.wait_timeouts),
            ("respool_returned_total", "Releases admitted to the pool", metrics.total_returned),
            ("respool_rejected_total", "Releases rejected for lack of capacity", metrics.total_rejected),
            ("respool_destroyed_total", "Resources handed to the destructor", metrics.total_destroyed),
        ];
        for (name, help, value) in counters {
            Self::write_metric(&mut output, name, help, "counter", &labels, &value.to_string());
        }

        output
    }

    fn write_metric(output: &mut String, name: &str, help: &str, kind: &str, labels: &str, value: &str) {
        let _ = writeln!(output, "# HELP {name} {help}");
        let _ = writeln!(output, "# TYPE {name} {kind}");
        let _ = writeln!(output, "{name}{{{labels}}} {value}");
    }

    fn format_labels(pool_name: &str, tags: Option<&HashMap<String, String>>) -> String {
        let mut labels = vec![format!("pool=\"{}\"", pool_name)];

        if let Some(tags) = tags {
            let mut tags: Vec<_> = tags.iter().collect();
            tags.sort();
            for (key, value) in tags {
                labels.push(format!("{}=\"{}\"", key, value));
            }
        }

        labels.join(",")
    }
}

/// Internal metrics tracker
#[derive(Default)]
pub(crate) struct MetricsTracker {
    pub constructed: AtomicUsize,
    pub construction_failures: AtomicUsize,
    pub reused: AtomicUsize,
    pub waited: AtomicUsize,
    pub waits_fulfilled: AtomicUsize,
    pub wait_timeouts: AtomicUsize,
    pub returned: AtomicUsize,
    pub rejected: AtomicUsize,
    pub destroyed: AtomicUsize,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_metrics(&self, idle: usize, checked_out: usize, capacity: Option<usize>) -> PoolMetrics {
        let utilization = match capacity {
            Some(max) if max > 0 => (idle + checked_out) as f64 / max as f64,
            _ => 0.0,
        };

        PoolMetrics {
            total_constructed: self.constructed.load(Ordering::Relaxed),
            construction_failures: self.construction_failures.load(Ordering::Relaxed),
            total_reused: self.reused.load(Ordering::Relaxed),
            total_waited: self.waited.load(Ordering::Relaxed),
            waits_fulfilled: self.waits_fulfilled.load(Ordering::Relaxed),
            wait_timeouts: self.wait_timeouts.load(Ordering::Relaxed),
            total_returned: self.returned.load(Ordering::Relaxed),
            total_rejected: self.rejected.load(Ordering::Relaxed),
            total_destroyed: self.destroyed.load(Ordering::Relaxed),
            idle,
            checked_out,
            utilization,
            max_capacity: capacity,
        }
    }
}
