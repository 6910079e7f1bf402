//! Affine expressions over named loop indices.
//!
//! An affine expression is a linear combination of indices plus a constant:
//! `aff(x) = c0 + c1*x1 + c2*x2 + ... + cn*xn`
//!
//! Indices are referred to by name, so the same expression stays meaningful
//! when blocks are split and indices are added or removed around it.

use serde::{Serialize, Deserialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::{Add, Sub, Mul, Neg};

/// An affine expression: constant + sum(coeff[name] * name)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Affine {
    /// Constant term
    pub constant: i64,
    /// Non-zero coefficients keyed by index name
    terms: BTreeMap<String, i64>,
}

impl Affine {
    /// The zero expression.
    pub fn zero() -> Self {
        Self::default()
    }

    /// A constant expression.
    pub fn constant(value: i64) -> Self {
        Self { constant: value, terms: BTreeMap::new() }
    }

    /// A single index with coefficient 1.
    pub fn var(name: &str) -> Self {
        Self::term(name, 1)
    }

    /// A single index scaled by `coeff`.
    pub fn term(name: &str, coeff: i64) -> Self {
        let mut expr = Self::zero();
        expr.add_term(name, coeff);
        expr
    }

    /// Add `coeff * name` to this expression in place.
    pub fn add_term(&mut self, name: &str, coeff: i64) {
        if coeff == 0 {
            return;
        }
        let entry = self.terms.entry(name.to_string()).or_insert(0);
        *entry += coeff;
        if *entry == 0 {
            self.terms.remove(name);
        }
    }

    pub fn is_constant(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn is_zero(&self) -> bool {
        self.constant == 0 && self.is_constant()
    }

    /// The constant value, if no index appears.
    pub fn as_constant(&self) -> Option<i64> {
        if self.is_constant() {
            Some(self.constant)
        } else {
            None
        }
    }

    /// The single index this expression is equal to, if it is exactly `1*name`.
    pub fn as_var(&self) -> Option<&str> {
        if self.constant != 0 || self.terms.len() != 1 {
            return None;
        }
        self.terms
            .iter()
            .next()
            .filter(|(_, c)| **c == 1)
            .map(|(name, _)| name.as_str())
    }

    /// Coefficient of `name` (0 if absent).
    pub fn coeff(&self, name: &str) -> i64 {
        self.terms.get(name).copied().unwrap_or(0)
    }

    /// Iterate over `(name, coeff)` pairs in name order.
    pub fn terms(&self) -> impl Iterator<Item = (&str, i64)> {
        self.terms.iter().map(|(name, &c)| (name.as_str(), c))
    }

    /// Names of the indices this expression depends on.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.terms.keys().map(|s| s.as_str())
    }

    pub fn depends_on(&self, name: &str) -> bool {
        self.terms.contains_key(name)
    }

    /// Scale the expression by a constant.
    pub fn scale(&self, factor: i64) -> Self {
        if factor == 0 {
            return Self::zero();
        }
        Self {
            constant: self.constant * factor,
            terms: self.terms.iter().map(|(n, &c)| (n.clone(), c * factor)).collect(),
        }
    }

    /// Same expression without its constant term.
    pub fn without_constant(&self) -> Self {
        Self { constant: 0, terms: self.terms.clone() }
    }

    /// Keep only the terms whose index satisfies `keep`.
    pub fn filter_terms(&self, keep: impl Fn(&str) -> bool) -> Self {
        Self {
            constant: self.constant,
            terms: self.terms
                .iter()
                .filter(|(n, _)| keep(n))
                .map(|(n, &c)| (n.clone(), c))
                .collect(),
        }
    }

    /// Replace indices by expressions; indices missing from `map` are kept.
    pub fn substitute(&self, map: &HashMap<String, Affine>) -> Self {
        let mut result = Self::constant(self.constant);
        for (name, &c) in &self.terms {
            match map.get(name) {
                Some(replacement) => result = result + replacement.scale(c),
                None => result.add_term(name, c),
            }
        }
        result
    }

    /// Evaluate under concrete index values. Returns `None` if an index is unbound.
    pub fn evaluate(&self, values: &HashMap<String, i64>) -> Option<i64> {
        let mut result = self.constant;
        for (name, &c) in &self.terms {
            result += c * values.get(name)?;
        }
        Some(result)
    }

    /// Smallest and largest value over indices ranging in `[0, range)`.
    ///
    /// Returns `None` if an index has no range or an empty range.
    pub fn bounds(&self, ranges: &HashMap<String, u64>) -> Option<(i64, i64)> {
        let mut lo = self.constant;
        let mut hi = self.constant;
        for (name, &c) in &self.terms {
            let range = *ranges.get(name)?;
            if range == 0 {
                return None;
            }
            let top = c * (range as i64 - 1);
            if c > 0 {
                hi += top;
            } else {
                lo += top;
            }
        }
        Some((lo, hi))
    }
}

impl Add for Affine {
    type Output = Self;

    fn add(mut self, other: Self) -> Self {
        self.constant += other.constant;
        for (name, c) in other.terms {
            self.add_term(&name, c);
        }
        self
    }
}

impl Sub for Affine {
    type Output = Self;

    fn sub(self, other: Self) -> Self {
        self + (-other)
    }
}

impl Neg for Affine {
    type Output = Self;

    fn neg(self) -> Self {
        self.scale(-1)
    }
}

impl Mul<i64> for Affine {
    type Output = Self;

    fn mul(self, factor: i64) -> Self {
        self.scale(factor)
    }
}

impl From<i64> for Affine {
    fn from(value: i64) -> Self {
        Self::constant(value)
    }
}

impl fmt::Display for Affine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.terms.is_empty() {
            return write!(f, "{}", self.constant);
        }
        let mut first = true;
        for (name, &c) in &self.terms {
            let (sign, mag) = if c < 0 { ("-", -c) } else { ("+", c) };
            if first {
                if c < 0 {
                    write!(f, "-")?;
                }
            } else {
                write!(f, " {} ", sign)?;
            }
            if mag == 1 {
                write!(f, "{}", name)?;
            } else {
                write!(f, "{}*{}", mag, name)?;
            }
            first = false;
        }
        if self.constant > 0 {
            write!(f, " + {}", self.constant)?;
        } else if self.constant < 0 {
            write!(f, " - {}", -self.constant)?;
        }
        Ok(())
    }
}
