//! # respool
//!
//! Generic, thread-safe pool for expensive reusable resources such as
//! broker channels or database sessions.
//!
//! ## Features
//!
//! - Lazy construction through a caller-supplied constructor
//! - Bounded or unbounded capacity
//! - Blocking acquire with a wait timeout on a saturated pool, plus an async variant
//! - Background maintainer matching returned resources to waiting acquires
//! - Destructor run on every idle resource at cleanup
//! - Metrics with Prometheus export, health status
//!
//! ## Quick Start
//!
//! ```rust
//! use respool::{Pool, PoolConfiguration};
//! use std::time::Duration;
//!
//! let pool = Pool::new(
//!     PoolConfiguration::new()
//!         .with_max_pool_size(5)
//!         .with_wait_timeout(Duration::from_secs(3)),
//!     || Ok::<_, std::io::Error>(vec![0u8; 1024]),
//!     |buffer| drop(buffer),
//! );
//!
//! let buffer = pool.get().unwrap();
//! assert!(pool.put(buffer).is_ok());
//! pool.cleanup();
//! ```

mod config;
mod errors;
mod health;
mod maintainer;
mod metrics;
mod pool;

pub use config::{Capacity, PoolConfiguration};
pub use errors::{PoolError, PoolResult};
pub use health::HealthStatus;
pub use metrics::{MetricsExporter, PoolMetrics};
pub use pool::Pool;
