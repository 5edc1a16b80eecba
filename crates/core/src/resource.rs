//! Resource vectors: milli-CPU, memory bytes, and named scalar resources.

use crate::error::DomainError;
use gangway_apis::{parse_quantity, Pod, ResourceList};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Tolerance for floating comparisons between resource dimensions.
pub const DEFAULT_TOLERANCE: f64 = 1e-3;

/// A resource vector. CPU is tracked in milli-units, memory in bytes, and
/// everything else as named scalars.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub milli_cpu: f64,
    pub memory: f64,
    #[serde(default)]
    pub scalar_resources: HashMap<String, f64>,
}

impl Resource {
    pub fn empty() -> Self {
        Resource::default()
    }

    /// Build a resource vector from a stored resource list.
    /// Unparseable quantities are skipped with a warning, matching how the
    /// store-facing handlers tolerate malformed objects.
    pub fn from_resource_list(list: &ResourceList) -> Self {
        let mut r = Resource::empty();
        for (name, quantity) in list {
            let value = match parse_quantity(quantity) {
                Ok(v) => v,
                Err(err) => {
                    tracing::warn!(resource = %name, %err, "skipping malformed quantity");
                    continue;
                }
            };
            match name.as_str() {
                "cpu" => r.milli_cpu += value * 1000.0,
                "memory" => r.memory += value,
                _ => {
                    *r.scalar_resources.entry(name.clone()).or_insert(0.0) += value;
                }
            }
        }
        r
    }

    /// Aggregate resource request of a pod: the sum of its container
    /// requests, raised to the per-dimension maximum of any init container.
    pub fn from_pod_request(pod: &Pod) -> Self {
        let mut total = Resource::empty();
        for container in &pod.spec.containers {
            total.add(&Resource::from_resource_list(&container.requests));
        }
        for init in &pod.spec.init_containers {
            total.set_max_resource(&Resource::from_resource_list(&init.requests));
        }
        total
    }

    pub fn is_empty(&self) -> bool {
        self.milli_cpu < DEFAULT_TOLERANCE
            && self.memory < DEFAULT_TOLERANCE
            && self
                .scalar_resources
                .values()
                .all(|v| *v < DEFAULT_TOLERANCE)
    }

    pub fn get(&self, name: &str) -> f64 {
        match name {
            "cpu" => self.milli_cpu,
            "memory" => self.memory,
            _ => self.scalar_resources.get(name).copied().unwrap_or(0.0),
        }
    }

    pub fn set_scalar(&mut self, name: &str, value: f64) {
        self.scalar_resources.insert(name.to_string(), value);
    }

    /// Names of every dimension present in this vector.
    pub fn resource_names(&self) -> Vec<String> {
        let mut names = vec!["cpu".to_string(), "memory".to_string()];
        names.extend(self.scalar_resources.keys().cloned());
        names
    }

    pub fn add(&mut self, other: &Resource) -> &mut Self {
        self.milli_cpu += other.milli_cpu;
        self.memory += other.memory;
        for (name, value) in &other.scalar_resources {
            *self.scalar_resources.entry(name.clone()).or_insert(0.0) += value;
        }
        self
    }

    /// Componentwise subtraction. Fails when any dimension would go
    /// negative beyond tolerance, leaving `self` unchanged.
    pub fn sub(&mut self, other: &Resource) -> Result<&mut Self, DomainError> {
        if !other.less_equal(self) {
            let shortfall = other.fit_delta(self);
            return Err(DomainError::ResourceUnderflow {
                shortfall: shortfall.to_string(),
            });
        }
        self.milli_cpu = (self.milli_cpu - other.milli_cpu).max(0.0);
        self.memory = (self.memory - other.memory).max(0.0);
        for (name, value) in &other.scalar_resources {
            let entry = self.scalar_resources.entry(name.clone()).or_insert(0.0);
            *entry = (*entry - value).max(0.0);
        }
        Ok(self)
    }

    /// Componentwise subtraction floored at zero. Used for projections
    /// where the subtrahend may legitimately exceed the pool.
    pub fn sub_floor(&mut self, other: &Resource) -> &mut Self {
        self.milli_cpu = (self.milli_cpu - other.milli_cpu).max(0.0);
        self.memory = (self.memory - other.memory).max(0.0);
        for (name, value) in &other.scalar_resources {
            let entry = self.scalar_resources.entry(name.clone()).or_insert(0.0);
            *entry = (*entry - value).max(0.0);
        }
        self
    }

    /// Whether every dimension of `self` fits into `other` within the
    /// default tolerance.
    pub fn less_equal(&self, other: &Resource) -> bool {
        self.less_equal_with_tolerance(other, DEFAULT_TOLERANCE)
    }

    pub fn less_equal_with_tolerance(&self, other: &Resource, tolerance: f64) -> bool {
        if self.milli_cpu > other.milli_cpu + tolerance {
            return false;
        }
        if self.memory > other.memory + tolerance {
            return false;
        }
        self.scalar_resources
            .iter()
            .all(|(name, value)| *value <= other.get(name) + tolerance)
    }

    /// Per-dimension shortfall of `self` (a request) against `available`.
    /// Dimensions that fit contribute zero. Used for fit-error reporting.
    pub fn fit_delta(&self, available: &Resource) -> Resource {
        let mut delta = Resource::empty();
        if self.milli_cpu > available.milli_cpu + DEFAULT_TOLERANCE {
            delta.milli_cpu = self.milli_cpu - available.milli_cpu;
        }
        if self.memory > available.memory + DEFAULT_TOLERANCE {
            delta.memory = self.memory - available.memory;
        }
        for (name, value) in &self.scalar_resources {
            let avail = available.get(name);
            if *value > avail + DEFAULT_TOLERANCE {
                delta.set_scalar(name, value - avail);
            }
        }
        delta
    }

    /// Multiply every dimension by a non-negative factor.
    pub fn scaled(&self, factor: f64) -> Resource {
        let mut r = self.clone();
        r.milli_cpu *= factor;
        r.memory *= factor;
        for value in r.scalar_resources.values_mut() {
            *value *= factor;
        }
        r
    }

    /// Lower each dimension of `self` to at most the value in `other`.
    pub fn min_dimension(&mut self, other: &Resource) -> &mut Self {
        self.milli_cpu = self.milli_cpu.min(other.milli_cpu);
        self.memory = self.memory.min(other.memory);
        for (name, value) in self.scalar_resources.iter_mut() {
            *value = value.min(other.scalar_resources.get(name).copied().unwrap_or(0.0));
        }
        self
    }

    /// Raise each dimension of `self` to at least the value in `other`.
    pub fn set_max_resource(&mut self, other: &Resource) -> &mut Self {
        self.milli_cpu = self.milli_cpu.max(other.milli_cpu);
        self.memory = self.memory.max(other.memory);
        for (name, value) in &other.scalar_resources {
            let entry = self.scalar_resources.entry(name.clone()).or_insert(0.0);
            *entry = entry.max(*value);
        }
        self
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cpu {:.0}m, memory {:.0}", self.milli_cpu, self.memory)?;
        let mut names: Vec<_> = self.scalar_resources.keys().collect();
        names.sort();
        for name in names {
            write!(f, ", {} {:.0}", name, self.scalar_resources[name])?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gangway_apis::quantity::build_resource_list;

    fn res(cpu: &str, memory: &str) -> Resource {
        Resource::from_resource_list(&build_resource_list(cpu, memory))
    }

    #[test]
    fn parses_cpu_to_milli_and_memory_to_bytes() {
        let r = res("500m", "1Gi");
        assert_eq!(r.milli_cpu, 500.0);
        assert_eq!(r.memory, 1024.0 * 1024.0 * 1024.0);
    }

    #[test]
    fn add_then_sub_is_identity_within_tolerance() {
        let original = res("2", "4Gi");
        let delta = res("1500m", "1Gi");

        let mut r = original.clone();
        r.add(&delta);
        r.sub(&delta).unwrap();

        assert!(r.less_equal(&original) && original.less_equal(&r));
    }

    #[test]
    fn sub_underflow_leaves_value_unchanged() {
        let mut r = res("1", "1Gi");
        let before = r.clone();
        assert!(r.sub(&res("2", "1Gi")).is_err());
        assert_eq!(r, before);
    }

    #[test]
    fn fit_delta_reports_only_short_dimensions() {
        let request = res("2", "1Gi");
        let available = res("1", "2Gi");
        let delta = request.fit_delta(&available);
        assert_eq!(delta.milli_cpu, 1000.0);
        assert_eq!(delta.memory, 0.0);
    }

    #[test]
    fn empty_request_is_empty() {
        assert!(Resource::empty().is_empty());
        assert!(!res("1", "1Gi").is_empty());
    }

    #[test]
    fn scalar_resources_compare_componentwise() {
        let mut small = res("1", "1Gi");
        small.set_scalar("nvidia.com/gpu", 1.0);
        let mut big = res("2", "2Gi");
        assert!(!small.less_equal(&big));
        big.set_scalar("nvidia.com/gpu", 2.0);
        assert!(small.less_equal(&big));
    }
}
