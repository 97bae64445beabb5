//! Exhaustive enum-keyed tables.
//!
//! A `KeySpace` is an ordered list of enumerations. Its keys are the
//! cartesian product of the variants, in declaration order. A `Table` holds
//! exactly one value per key; completeness is checked when the table is
//! built, never at first read.

use super::Value;
use crate::path::{check_key_part, TableKey};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("Invalid key space: {reason}")]
    InvalidKeySpace { reason: String },
    #[error("Invalid variant '{variant}' in enumeration '{domain}': {reason}")]
    InvalidVariant { domain: String, variant: String, reason: String },
    #[error("Table is missing keys: {}", missing.join(", "))]
    IncompleteTable { missing: Vec<String> },
    #[error("Table has unexpected key '{key}'")]
    UnexpectedKey { key: String },
    #[error("Table key '{key}' supplied more than once")]
    DuplicateKey { key: String },
    #[error("Key '{key}' not found in table")]
    KeyNotFound { key: String },
}

/// A closed, ordered set of variant names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumDomain {
    name: String,
    variants: Vec<String>,
}

impl EnumDomain {
    /// Every variant must be usable inside a path's `[...]` index.
    pub fn new<I, S>(name: impl Into<String>, variants: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let variants: Vec<String> = variants.into_iter().map(Into::into).collect();
        for variant in &variants {
            check_key_part(variant).map_err(|e| TableError::InvalidVariant {
                domain: name.clone(),
                variant: variant.clone(),
                reason: e.reason,
            })?;
        }
        Ok(Self { name, variants })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variants(&self) -> &[String] {
        &self.variants
    }

    fn position(&self, variant: &str) -> Option<usize> {
        self.variants.iter().position(|v| v == variant)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeySpace {
    dims: Vec<EnumDomain>,
}

impl KeySpace {
    pub fn new(dims: Vec<EnumDomain>) -> Result<Arc<Self>, TableError> {
        if dims.is_empty() {
            return Err(TableError::InvalidKeySpace { reason: "no key dimensions".into() });
        }
        for dim in &dims {
            if dim.variants.is_empty() {
                return Err(TableError::InvalidKeySpace {
                    reason: format!("enumeration '{}' has no variants", dim.name),
                });
            }
            for (i, v) in dim.variants.iter().enumerate() {
                if dim.variants[..i].contains(v) {
                    return Err(TableError::InvalidKeySpace {
                        reason: format!("enumeration '{}' repeats variant '{}'", dim.name, v),
                    });
                }
            }
        }
        Ok(Arc::new(Self { dims }))
    }

    /// Shorthand for a one-dimensional key space.
    pub fn single(domain: EnumDomain) -> Result<Arc<Self>, TableError> {
        Self::new(vec![domain])
    }

    pub fn dims(&self) -> &[EnumDomain] {
        &self.dims
    }

    pub fn len(&self) -> usize {
        self.dims.iter().map(|d| d.variants.len()).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Offset of `key` in canonical (row-major) order.
    pub fn position(&self, key: &TableKey) -> Option<usize> {
        if key.arity() != self.dims.len() {
            return None;
        }
        let mut pos = 0;
        for (dim, part) in self.dims.iter().zip(key.parts()) {
            pos = pos * dim.variants.len() + dim.position(part)?;
        }
        Some(pos)
    }

    pub fn contains(&self, key: &TableKey) -> bool {
        self.position(key).is_some()
    }

    pub fn key_at(&self, mut pos: usize) -> TableKey {
        let mut parts = vec![String::new(); self.dims.len()];
        for (slot, dim) in parts.iter_mut().zip(&self.dims).rev() {
            let n = dim.variants.len();
            *slot = dim.variants[pos % n].clone();
            pos /= n;
        }
        TableKey::from_variants(parts)
    }

    pub fn keys(&self) -> impl Iterator<Item = TableKey> + '_ {
        (0..self.len()).map(move |i| self.key_at(i))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    space: Arc<KeySpace>,
    /// One value per key, in canonical key order.
    values: Vec<Value>,
}

impl Table {
    /// Builds a table from explicit entries. Every key of the space must be
    /// supplied exactly once. Keys may be given as `TableKey`s or as `a,b` text.
    pub fn from_entries<I, K>(space: Arc<KeySpace>, entries: I) -> Result<Self, TableError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: TryInto<TableKey> + fmt::Display,
    {
        let mut slots: Vec<Option<Value>> = vec![None; space.len()];
        for (key, value) in entries {
            let shown = key.to_string();
            let pos = key
                .try_into()
                .ok()
                .and_then(|k| space.position(&k))
                .ok_or(TableError::UnexpectedKey { key: shown.clone() })?;
            if slots[pos].is_some() {
                return Err(TableError::DuplicateKey { key: shown });
            }
            slots[pos] = Some(value);
        }

        let missing: Vec<String> = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_none())
            .map(|(i, _)| space.key_at(i).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(TableError::IncompleteTable { missing });
        }

        let values = slots.into_iter().flatten().collect();
        Ok(Self { space, values })
    }

    /// Builds a table by calling `f` once per key, in canonical order.
    pub fn from_fn<E>(
        space: Arc<KeySpace>,
        mut f: impl FnMut(&TableKey) -> Result<Value, E>,
    ) -> Result<Self, E> {
        let values = space.keys().map(|k| f(&k)).collect::<Result<Vec<_>, E>>()?;
        Ok(Self { space, values })
    }

    pub fn space(&self) -> &Arc<KeySpace> {
        &self.space
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, key: &TableKey) -> Result<&Value, TableError> {
        self.space
            .position(key)
            .map(|pos| &self.values[pos])
            .ok_or_else(|| TableError::KeyNotFound { key: key.to_string() })
    }

    pub fn iter(&self) -> impl Iterator<Item = (TableKey, &Value)> + '_ {
        self.values.iter().enumerate().map(move |(i, v)| (self.space.key_at(i), v))
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Builds a table over the same key space by transforming every cell.
    pub fn map<E>(&self, mut f: impl FnMut(&TableKey, &Value) -> Result<Value, E>) -> Result<Table, E> {
        let values = self
            .iter()
            .map(|(k, v)| f(&k, v))
            .collect::<Result<Vec<_>, E>>()?;
        Ok(Table { space: self.space.clone(), values })
    }
}
