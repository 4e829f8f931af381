//! Equality filters and sort specifications over serialized records.
//!
//! Both operate on the serde representation of a record, so field names are
//! the snake_case names that appear in stored JSON (`certificate_id`,
//! `created_date`, `status`, ...).

use super::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::str::FromStr;

/// Conjunction of `field == value` clauses
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    clauses: BTreeMap<String, Value>,
}

impl Query {
    /// Matches every record
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(field, value)
    }

    pub fn and(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.insert(field.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// A missing field compares equal to `null`
    pub fn matches<T: Serialize>(&self, record: &T) -> StoreResult<bool> {
        if self.clauses.is_empty() {
            return Ok(true);
        }
        let value = serde_json::to_value(record)?;
        Ok(self.clauses.iter().all(|(field, expected)| {
            value.get(field).unwrap_or(&Value::Null) == expected
        }))
    }

    pub fn apply<T: Serialize>(&self, records: impl IntoIterator<Item = T>) -> StoreResult<Vec<T>> {
        let mut matched = Vec::new();
        for record in records {
            if self.matches(&record)? {
                matched.push(record);
            }
        }
        Ok(matched)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Sort by one field. Textual form: `"field"` ascending, `"-field"`
/// descending, empty string for storage order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortSpec {
    pub field: Option<String>,
    pub order: SortOrder,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self::unsorted()
    }
}

impl SortSpec {
    pub fn unsorted() -> Self {
        Self {
            field: None,
            order: SortOrder::Ascending,
        }
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            order: SortOrder::Ascending,
        }
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: Some(field.into()),
            order: SortOrder::Descending,
        }
    }

    /// `"-created_date"`, the order every listing screen uses
    pub fn newest_first() -> Self {
        Self::descending("created_date")
    }

    /// Stable sort; records with equal keys keep storage order
    pub fn apply<T: Serialize>(&self, records: &mut Vec<T>) -> StoreResult<()> {
        let Some(field) = &self.field else {
            return Ok(());
        };

        let keys = records
            .iter()
            .map(|r| {
                serde_json::to_value(r).map(|v| v.get(field).cloned().unwrap_or(Value::Null))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut keyed: Vec<(Value, T)> = keys.into_iter().zip(records.drain(..)).collect();
        keyed.sort_by(|(a, _), (b, _)| {
            let ordering = compare_values(a, b);
            match self.order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            }
        });

        records.extend(keyed.into_iter().map(|(_, r)| r));
        Ok(())
    }
}

impl FromStr for SortSpec {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::unsorted());
        }

        let (order, field) = match s.strip_prefix('-') {
            Some(rest) => (SortOrder::Descending, rest),
            None => (SortOrder::Ascending, s),
        };

        let valid = !field.is_empty()
            && field
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(StoreError::InvalidSort(s.to_string()));
        }

        Ok(Self {
            field: Some(field.to_string()),
            order,
        })
    }
}

/// Total order over JSON scalars: null sorts first, timestamps compare as
/// instants, numbers numerically, everything else lexically.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Less,
        (_, Value::Null) => Ordering::Greater,
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => {
            match (x.parse::<DateTime<Utc>>(), y.parse::<DateTime<Utc>>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                _ => x.cmp(y),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
