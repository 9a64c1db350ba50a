//! Query vocabulary shared by the row store and the change feed.

use crate::types::Row;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// A single predicate on one column.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Condition {
    fn matches(&self, row: &Row) -> bool {
        match self {
            Condition::Eq(column, value) => row.get(column) == Some(value),
            Condition::In(column, values) => row
                .get(column)
                .map(|v| values.contains(v))
                .unwrap_or(false),
        }
    }
}

/// Conjunction of conditions. The empty filter matches every row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    /// Match every row.
    pub fn all() -> Self {
        Self::default()
    }

    /// `column = value`.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(column, value)
    }

    /// `column in (values)`.
    pub fn is_in(column: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            conditions: vec![Condition::In(column.into(), values)],
        }
    }

    pub fn and_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq(column.into(), value.into()));
        self
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| c.matches(row))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, condition) in self.conditions.iter().enumerate() {
            if i > 0 {
                f.write_str("&")?;
            }
            match condition {
                Condition::Eq(column, value) => write!(f, "{}=eq.{}", column, render(value))?,
                Condition::In(column, values) => {
                    let rendered: Vec<String> = values.iter().map(render).collect();
                    write!(f, "{}=in.({})", column, rendered.join(","))?
                }
            }
        }
        Ok(())
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Sort order for a row fetch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: true,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            ascending: false,
        }
    }

    /// Compare two rows under this order. Missing/null values sort last.
    pub fn compare(&self, a: &Row, b: &Row) -> Ordering {
        let ord = match (a.get(&self.column), b.get(&self.column)) {
            (Some(x), Some(y)) if !x.is_null() && !y.is_null() => compare_values(x, y),
            (Some(x), _) if !x.is_null() => return Ordering::Less,
            (_, Some(y)) if !y.is_null() => return Ordering::Greater,
            _ => Ordering::Equal,
        };
        if self.ascending {
            ord
        } else {
            ord.reverse()
        }
    }
}

/// Lookup key for a single row.
#[derive(Clone, Debug, PartialEq)]
pub struct RowKey {
    pub column: String,
    pub value: Value,
}

impl RowKey {
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Key on the conventional `id` column.
    pub fn id(value: impl Into<Value>) -> Self {
        Self::new("id", value)
    }

    pub fn matches(&self, row: &Row) -> bool {
        row.get(&self.column) == Some(&self.value)
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
