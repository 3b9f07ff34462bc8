//! Health monitoring for resource pools

/// Health status of a resource pool
///
/// # Examples
///
/// ```
/// use respool::{Pool, PoolConfiguration};
///
/// let pool = Pool::new(
///     PoolConfiguration::new().with_max_pool_size(3),
///     || Ok::<_, std::io::Error>(0u8),
///     |_| {},
/// );
/// assert!(pool.put(1).is_ok());
///
/// let health = pool.get_health_status();
/// assert!(health.is_healthy());
/// assert_eq!(health.idle_resources, 1);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Share of the capacity in use (0.0 to 1.0), zero when unbounded
    pub utilization: f64,

    pub idle_resources: usize,

    pub checked_out_resources: usize,

    /// Capacity bound, if any
    pub total_capacity: Option<usize>,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    pub fn new(idle: usize, checked_out: usize, capacity: Option<usize>) -> Self {
        let utilization = match capacity {
            Some(max) if max > 0 => (idle + checked_out) as f64 / max as f64,
            _ => 0.0,
        };

        let mut warnings = Vec::new();
        let mut is_healthy = true;

        // Saturated: the next acquire without an idle resource blocks
        if let Some(max) = capacity {
            if idle == 0 && checked_out >= max {
                warnings.push("Pool is saturated, acquires will wait".to_string());
                is_healthy = false;
            } else if utilization > 0.9 {
                warnings.push(format!("High utilization: {:.1}%", utilization * 100.0));
            }
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization,
            idle_resources: idle,
            checked_out_resources: checked_out,
            total_capacity: capacity,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}
