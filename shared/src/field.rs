//! Positional arguments carried by a field update.
//!
//! The argument list is serialized with bincode and travels as a single
//! blob next to the field name.

use crate::error::FieldError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Str(String),
    Bytes(Vec<u8>),
}

impl FieldValue {
    fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Bool(_) => "bool",
            FieldValue::Int(_) => "int",
            FieldValue::UInt(_) => "uint",
            FieldValue::Str(_) => "string",
            FieldValue::Bytes(_) => "bytes",
        }
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<u16> for FieldValue {
    fn from(value: u16) -> Self {
        FieldValue::UInt(value as u64)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::UInt(value as u64)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::UInt(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Str(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Str(value)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldArgs(Vec<FieldValue>);

/// Builds a [`FieldArgs`] from values convertible into [`FieldValue`].
#[macro_export]
macro_rules! field_args {
    () => {
        $crate::field::FieldArgs::default()
    };
    ($($value:expr),+ $(,)?) => {
        $crate::field::FieldArgs::new(vec![$($crate::field::FieldValue::from($value)),+])
    };
}

impl FieldArgs {
    pub fn new(values: Vec<FieldValue>) -> Self {
        Self(values)
    }

    pub fn encode(&self) -> Result<Vec<u8>, FieldError> {
        Ok(bincode::serialize(&self.0)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FieldError> {
        Ok(Self(bincode::deserialize(bytes)?))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.0
    }

    fn get(&self, index: usize) -> Result<&FieldValue, FieldError> {
        self.0.get(index).ok_or(FieldError::Missing { index })
    }

    fn wrong_type(index: usize, expected: &'static str, found: &FieldValue) -> FieldError {
        FieldError::WrongType {
            index,
            expected,
            found: found.type_name(),
        }
    }

    pub fn bool_at(&self, index: usize) -> Result<bool, FieldError> {
        match self.get(index)? {
            FieldValue::Bool(value) => Ok(*value),
            // Legacy senders encode flags as 0/1 integers.
            FieldValue::UInt(value) => Ok(*value != 0),
            FieldValue::Int(value) => Ok(*value != 0),
            other => Err(Self::wrong_type(index, "bool", other)),
        }
    }

    pub fn uint_at(&self, index: usize) -> Result<u64, FieldError> {
        match self.get(index)? {
            FieldValue::UInt(value) => Ok(*value),
            FieldValue::Int(value) if *value >= 0 => Ok(*value as u64),
            other => Err(Self::wrong_type(index, "uint", other)),
        }
    }

    pub fn str_at(&self, index: usize) -> Result<&str, FieldError> {
        match self.get(index)? {
            FieldValue::Str(value) => Ok(value),
            other => Err(Self::wrong_type(index, "string", other)),
        }
    }
}
