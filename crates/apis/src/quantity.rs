//! Resource quantity strings and their numeric interpretation.
//!
//! Quantities follow the usual cluster conventions: decimal suffixes
//! (`K`, `M`, `G`, `T`), binary suffixes (`Ki`, `Mi`, `Gi`, `Ti`) and the
//! milli suffix (`m`). A bare number is taken at face value.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Resource name to quantity string, e.g. `{"cpu": "500m", "memory": "1Gi"}`.
pub type ResourceList = BTreeMap<String, String>;

#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QuantityError {
    #[error("cannot parse quantity {0:?}")]
    Malformed(String),
}

/// Parse a quantity string into its base-unit numeric value.
///
/// `"500m"` → 0.5, `"2"` → 2.0, `"1Gi"` → 1073741824.0, `"1G"` → 1e9.
pub fn parse_quantity(s: &str) -> Result<f64, QuantityError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(QuantityError::Malformed(s.to_string()));
    }

    let (digits, multiplier) = if let Some(rest) = s.strip_suffix("Ki") {
        (rest, 1024f64)
    } else if let Some(rest) = s.strip_suffix("Mi") {
        (rest, 1024f64.powi(2))
    } else if let Some(rest) = s.strip_suffix("Gi") {
        (rest, 1024f64.powi(3))
    } else if let Some(rest) = s.strip_suffix("Ti") {
        (rest, 1024f64.powi(4))
    } else if let Some(rest) = s.strip_suffix('K') {
        (rest, 1e3)
    } else if let Some(rest) = s.strip_suffix('M') {
        (rest, 1e6)
    } else if let Some(rest) = s.strip_suffix('G') {
        (rest, 1e9)
    } else if let Some(rest) = s.strip_suffix('T') {
        (rest, 1e12)
    } else if let Some(rest) = s.strip_suffix('m') {
        (rest, 1e-3)
    } else {
        (s, 1f64)
    };

    digits
        .trim()
        .parse::<f64>()
        .map(|v| v * multiplier)
        .map_err(|_| QuantityError::Malformed(s.to_string()))
}

/// Build a `ResourceList` from cpu/memory quantity strings, the shape most
/// test fixtures need.
pub fn build_resource_list(cpu: &str, memory: &str) -> ResourceList {
    let mut list = ResourceList::new();
    list.insert("cpu".to_string(), cpu.to_string());
    list.insert("memory".to_string(), memory.to_string());
    list
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_suffixed_values() {
        assert_eq!(parse_quantity("2").unwrap(), 2.0);
        assert_eq!(parse_quantity("500m").unwrap(), 0.5);
        assert_eq!(parse_quantity("1Gi").unwrap(), 1024.0 * 1024.0 * 1024.0);
        assert_eq!(parse_quantity("1G").unwrap(), 1e9);
        assert_eq!(parse_quantity("16Ki").unwrap(), 16.0 * 1024.0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_quantity("").is_err());
        assert!(parse_quantity("four").is_err());
        assert!(parse_quantity("1Qi").is_err());
    }
}
