//! Linear constraints over collected loop indices.
//!
//! A tile constraint bounds a linear combination of loop indices from above:
//! `coeffs . idx < bound`. The indices are positional, in the order an
//! access pattern lists its strides.

use serde::{Serialize, Deserialize};
use std::fmt;

/// A strict upper bound on a linear combination of loop indices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileConstraint {
    /// One coefficient per collected index
    pub coeffs: Vec<i64>,
    /// Exclusive upper bound
    pub bound: i64,
}

impl TileConstraint {
    pub fn new(coeffs: Vec<i64>, bound: i64) -> Self {
        Self { coeffs, bound }
    }

    /// Value of the left-hand side at the given index values.
    pub fn lhs(&self, values: &[i64]) -> i64 {
        self.coeffs
            .iter()
            .zip(values)
            .map(|(&c, &v)| c * v)
            .sum()
    }

    /// Check if the constraint holds at the given index values.
    pub fn is_satisfied(&self, values: &[i64]) -> bool {
        self.lhs(values) < self.bound
    }

    /// Extend the coefficient vector with zeros up to `len` entries.
    pub fn padded(&self, len: usize) -> Self {
        let mut coeffs = self.coeffs.clone();
        if coeffs.len() < len {
            coeffs.resize(len, 0);
        }
        Self { coeffs, bound: self.bound }
    }

    /// Render with index names, e.g. `2*k + k < 5`.
    pub fn to_string_with_names(&self, names: &[String]) -> String {
        let mut parts = Vec::new();
        for (i, &c) in self.coeffs.iter().enumerate() {
            if c == 0 {
                continue;
            }
            let default_name = format!("i{}", i);
            let name = names.get(i).map(|s| s.as_str()).unwrap_or(&default_name);
            if c == 1 {
                parts.push(name.to_string());
            } else if c == -1 {
                parts.push(format!("-{}", name));
            } else {
                parts.push(format!("{}*{}", c, name));
            }
        }
        let lhs = if parts.is_empty() {
            "0".to_string()
        } else {
            parts.join(" + ").replace("+ -", "- ")
        };
        format!("{} < {}", lhs, self.bound)
    }
}

impl fmt::Display for TileConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_string_with_names(&[]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_boundary() {
        // 2*k_o + k_i < 5
        let c = TileConstraint::new(vec![2, 1], 5);
        assert!(c.is_satisfied(&[0, 1]));
        assert!(c.is_satisfied(&[2, 0]));
        assert!(!c.is_satisfied(&[2, 1]));
    }

    #[test]
    fn test_padded() {
        let c = TileConstraint::new(vec![2, 0, 1], 5).padded(6);
        assert_eq!(c.coeffs, vec![2, 0, 1, 0, 0, 0]);
        assert_eq!(c.bound, 5);
    }

    #[test]
    fn test_display_with_names() {
        let c = TileConstraint::new(vec![2, 0, -1], 5);
        let names = vec!["k".to_string(), "m".to_string(), "n".to_string()];
        assert_eq!(c.to_string_with_names(&names), "2*k - n < 5");
        assert_eq!(c.to_string(), "2*i0 - i2 < 5");
    }
}
