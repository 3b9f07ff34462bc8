//! Pool configuration options

use std::num::NonZeroUsize;
use std::time::Duration;

/// Upper bound on the number of resources a pool tracks at once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Capacity {
    /// At most this many resources, idle and checked out together
    Bounded(NonZeroUsize),

    /// No limit; acquiring never blocks
    Unbounded,
}

impl Capacity {
    /// Bounded capacity of `max` resources; zero means unbounded
    pub fn new(max: usize) -> Self {
        NonZeroUsize::new(max).map_or(Capacity::Unbounded, Capacity::Bounded)
    }

    pub fn limit(&self) -> Option<usize> {
        match self {
            Capacity::Bounded(max) => Some(max.get()),
            Capacity::Unbounded => None,
        }
    }

    pub fn is_bounded(&self) -> bool {
        matches!(self, Capacity::Bounded(_))
    }

    /// Whether `count` tracked resources leave room for one more
    pub(crate) fn has_room(&self, count: usize) -> bool {
        self.limit().is_none_or(|max| count < max)
    }
}

impl Default for Capacity {
    fn default() -> Self {
        Capacity::new(100)
    }
}

/// Configuration for resource pool behavior
///
/// # Examples
///
/// ```
/// use respool::{Capacity, PoolConfiguration};
/// use std::time::Duration;
///
/// let config = PoolConfiguration::new()
///     .with_max_pool_size(5)
///     .with_wait_timeout(Duration::from_secs(3))
///     .with_preallocation(true);
///
/// assert_eq!(config.capacity, Capacity::new(5));
/// assert_eq!(config.wait_timeout, Duration::from_secs(3));
/// ```
#[derive(Debug, Clone)]
pub struct PoolConfiguration {
    /// Maximum number of resources the pool tracks
    pub capacity: Capacity,

    /// How long a blocked acquire waits for a returned resource
    pub wait_timeout: Duration,

    /// Size the idle container up front to the capacity bound
    pub preallocate: bool,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            capacity: Capacity::default(),
            wait_timeout: Duration::from_secs(30),
            preallocate: false,
        }
    }
}

impl PoolConfiguration {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum pool size
    ///
    /// # Examples
    ///
    /// ```
    /// use respool::{Capacity, PoolConfiguration};
    ///
    /// let config = PoolConfiguration::new().with_max_pool_size(0);
    /// assert_eq!(config.capacity, Capacity::Unbounded);
    /// ```
    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.capacity = Capacity::new(size);
        self
    }

    pub fn with_capacity(mut self, capacity: Capacity) -> Self {
        self.capacity = capacity;
        self
    }

    /// Remove the capacity bound
    pub fn unbounded(mut self) -> Self {
        self.capacity = Capacity::Unbounded;
        self
    }

    /// Set how long a saturated acquire waits
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Preallocate the idle container. Ignored for unbounded pools.
    pub fn with_preallocation(mut self, preallocate: bool) -> Self {
        self.preallocate = preallocate;
        self
    }

    pub(crate) fn initial_idle_capacity(&self) -> usize {
        match (self.preallocate, self.capacity.limit()) {
            (true, Some(max)) => max,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_room() {
        let bounded = Capacity::new(2);
        assert!(bounded.has_room(0));
        assert!(bounded.has_room(1));
        assert!(!bounded.has_room(2));
        assert!(Capacity::Unbounded.has_room(usize::MAX - 1));
    }

    #[test]
    fn preallocation_only_for_bounded() {
        let config = PoolConfiguration::new().with_max_pool_size(8).with_preallocation(true);
        assert_eq!(config.initial_idle_capacity(), 8);

        let config = config.unbounded();
        assert_eq!(config.initial_idle_capacity(), 0);

        let config = PoolConfiguration::new().with_max_pool_size(8);
        assert_eq!(config.initial_idle_capacity(), 0);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn capacity_serializes() {
        let json = serde_json::to_string(&Capacity::new(3)).unwrap();
        assert_eq!(json, r#"{"Bounded":3}"#);
        let back: Capacity = serde_json::from_str(r#""Unbounded""#).unwrap();
        assert_eq!(back, Capacity::Unbounded);
    }
}
