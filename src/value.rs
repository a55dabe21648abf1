//! Typed argument values, signature strings, and decoded messages.
//!
//! A [`Message`] is the unit a transport delivers and accepts: a path-like
//! address plus an ordered list of [`ControlValue`]s. Signatures such as
//! `"fissif"` describe the expected tag sequence of a data-path message.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Wire type tag of a single argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    /// `i` - 32-bit integer
    Int32,
    /// `h` - 64-bit integer
    Int64,
    /// `f` - 32-bit float
    Float32,
    /// `d` - 64-bit float
    Float64,
    /// `s` - string
    Str,
}

impl TypeTag {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            'i' => Some(TypeTag::Int32),
            'h' => Some(TypeTag::Int64),
            'f' => Some(TypeTag::Float32),
            'd' => Some(TypeTag::Float64),
            's' => Some(TypeTag::Str),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            TypeTag::Int32 => 'i',
            TypeTag::Int64 => 'h',
            TypeTag::Float32 => 'f',
            TypeTag::Float64 => 'd',
            TypeTag::Str => 's',
        }
    }
}

/// A single typed argument value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlValue {
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Str(String),
}

impl ControlValue {
    pub fn tag(&self) -> TypeTag {
        match self {
            ControlValue::Int32(_) => TypeTag::Int32,
            ControlValue::Int64(_) => TypeTag::Int64,
            ControlValue::Float32(_) => TypeTag::Float32,
            ControlValue::Float64(_) => TypeTag::Float64,
            ControlValue::Str(_) => TypeTag::Str,
        }
    }

    /// Numeric coercion for the control path. Strings do not coerce.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ControlValue::Int32(v) => Some(*v as f64),
            ControlValue::Int64(v) => Some(*v as f64),
            ControlValue::Float32(v) => Some(*v as f64),
            ControlValue::Float64(v) => Some(*v),
            ControlValue::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ControlValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl From<i32> for ControlValue {
    fn from(v: i32) -> Self {
        ControlValue::Int32(v)
    }
}

impl From<i64> for ControlValue {
    fn from(v: i64) -> Self {
        ControlValue::Int64(v)
    }
}

impl From<f32> for ControlValue {
    fn from(v: f32) -> Self {
        ControlValue::Float32(v)
    }
}

impl From<f64> for ControlValue {
    fn from(v: f64) -> Self {
        ControlValue::Float64(v)
    }
}

impl From<&str> for ControlValue {
    fn from(v: &str) -> Self {
        ControlValue::Str(v.to_string())
    }
}

impl From<String> for ControlValue {
    fn from(v: String) -> Self {
        ControlValue::Str(v)
    }
}

/// Parsed, validated form of a signature string such as `"fissif"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSignature {
    tags: Vec<TypeTag>,
}

impl TypeSignature {
    /// Parse a signature string. Unknown tag characters refuse construction.
    pub fn parse(signature: &str) -> Result<Self> {
        let tags = signature
            .chars()
            .map(|c| {
                TypeTag::from_char(c)
                    .ok_or_else(|| Error::InvalidConfig(format!("unsupported type tag '{c}'")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { tags })
    }

    pub fn tags(&self) -> &[TypeTag] {
        &self.tags
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    /// Validate arity and per-position tags of an argument list.
    pub fn check(&self, values: &[ControlValue]) -> Result<()> {
        if values.len() != self.tags.len() {
            return Err(Error::ArityMismatch {
                expected: self.tags.len(),
                got: values.len(),
            });
        }
        for (position, (tag, value)) in self.tags.iter().zip(values).enumerate() {
            if value.tag() != *tag {
                return Err(Error::SignatureMismatch {
                    position,
                    expected: tag.as_char(),
                    got: value.tag().as_char(),
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for tag in &self.tags {
            write!(f, "{}", tag.as_char())?;
        }
        Ok(())
    }
}

/// A decoded message: address pattern plus ordered typed arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub address: String,
    pub args: Vec<ControlValue>,
}

impl Message {
    pub fn new(address: impl Into<String>, args: Vec<ControlValue>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }
}
