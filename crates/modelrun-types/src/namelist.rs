//! Namelist value model.
//!
//! A namelist document is a two-level ordered mapping: section name to
//! (key to value). Values are a single scalar or an ordered sequence of
//! scalars. Order is preserved so that writing a document back out keeps the
//! layout of the file it was read from.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// One key's settings inside a namelist section.
pub type NamelistSection = IndexMap<String, NamelistValue>;

/// A complete namelist document, keyed by section name.
pub type NamelistDocument = IndexMap<String, NamelistSection>;

/// A single namelist scalar.
///
/// Untagged so that JSON/YAML documents map naturally: `true`, `4`, `0.5`,
/// `"text"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NamelistScalar {
    Logical(bool),
    Integer(i64),
    Real(f64),
    Text(String),
}

/// A namelist value: a scalar or an ordered sequence of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NamelistValue {
    Scalar(NamelistScalar),
    Sequence(Vec<NamelistScalar>),
}

impl NamelistValue {
    /// View the value as a slice of scalars (a scalar is a one-element slice).
    #[must_use]
    pub fn as_slice(&self) -> &[NamelistScalar] {
        match self {
            Self::Scalar(s) => std::slice::from_ref(s),
            Self::Sequence(seq) => seq,
        }
    }

    /// Collapse a parsed list of scalars: one element becomes a scalar.
    #[must_use]
    pub fn from_scalars(mut scalars: Vec<NamelistScalar>) -> Self {
        if scalars.len() == 1 {
            Self::Scalar(scalars.remove(0))
        } else {
            Self::Sequence(scalars)
        }
    }
}

impl From<bool> for NamelistScalar {
    fn from(value: bool) -> Self {
        Self::Logical(value)
    }
}

impl From<i64> for NamelistScalar {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for NamelistScalar {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl From<&str> for NamelistScalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for NamelistScalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

macro_rules! scalar_value_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for NamelistValue {
                fn from(value: $ty) -> Self {
                    Self::Scalar(value.into())
                }
            }
        )*
    };
}

scalar_value_from!(bool, i64, f64, &str, String);

impl From<NamelistScalar> for NamelistValue {
    fn from(value: NamelistScalar) -> Self {
        Self::Scalar(value)
    }
}

impl<T: Into<NamelistScalar>> FromIterator<T> for NamelistValue {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::Sequence(iter.into_iter().map(Into::into).collect())
    }
}
