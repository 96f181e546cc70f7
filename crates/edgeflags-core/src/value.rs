// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Flag values and structural equality.
//!
//! Change detection compares values by structure, never by identity. The
//! comparison covers the closed set of JSON shapes (`null`, booleans,
//! numbers, strings, ordered arrays and unordered objects). Cyclic
//! structures cannot be built from [`serde_json::Value`] and are not
//! supported.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// The value of a feature flag as evaluated by the server.
///
/// Flags are restricted to booleans, numbers, strings and structured
/// records. The wire form is plain JSON, so `true`, `42`, `"dark"` and
/// `{"limit": 3}` all decode directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
	Bool(bool),
	Number(Number),
	String(String),
	Object(Map<String, Value>),
}

impl FlagValue {
	/// Builds a numeric flag value. Returns `None` for NaN and infinities.
	pub fn number(n: f64) -> Option<Self> {
		Number::from_f64(n).map(FlagValue::Number)
	}

	/// Returns the value as a boolean if it is one.
	pub fn as_bool(&self) -> Option<bool> {
		match self {
			FlagValue::Bool(b) => Some(*b),
			_ => None,
		}
	}

	/// Returns the value as a string slice if it is one.
	pub fn as_str(&self) -> Option<&str> {
		match self {
			FlagValue::String(s) => Some(s),
			_ => None,
		}
	}

	/// Returns the value as an `f64` if it is numeric.
	pub fn as_f64(&self) -> Option<f64> {
		match self {
			FlagValue::Number(n) => n.as_f64(),
			_ => None,
		}
	}

	/// Returns the value as an `i64` if it is an integer that fits.
	pub fn as_i64(&self) -> Option<i64> {
		match self {
			FlagValue::Number(n) => n.as_i64(),
			_ => None,
		}
	}

	/// Returns the structured record if the value is one.
	pub fn as_object(&self) -> Option<&Map<String, Value>> {
		match self {
			FlagValue::Object(m) => Some(m),
			_ => None,
		}
	}

	/// Short name of the value's shape, used in log output.
	pub fn type_name(&self) -> &'static str {
		match self {
			FlagValue::Bool(_) => "bool",
			FlagValue::Number(_) => "number",
			FlagValue::String(_) => "string",
			FlagValue::Object(_) => "object",
		}
	}
}

impl PartialEq for FlagValue {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(FlagValue::Bool(a), FlagValue::Bool(b)) => a == b,
			(FlagValue::Number(a), FlagValue::Number(b)) => numbers_equal(a, b),
			(FlagValue::String(a), FlagValue::String(b)) => a == b,
			(FlagValue::Object(a), FlagValue::Object(b)) => objects_equal(a, b),
			_ => false,
		}
	}
}

impl fmt::Display for FlagValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			FlagValue::Bool(b) => write!(f, "{b}"),
			FlagValue::Number(n) => write!(f, "{n}"),
			FlagValue::String(s) => write!(f, "{s}"),
			FlagValue::Object(m) => write!(f, "{}", Value::Object(m.clone())),
		}
	}
}

impl From<bool> for FlagValue {
	fn from(b: bool) -> Self {
		FlagValue::Bool(b)
	}
}

impl From<&str> for FlagValue {
	fn from(s: &str) -> Self {
		FlagValue::String(s.to_string())
	}
}

impl From<String> for FlagValue {
	fn from(s: String) -> Self {
		FlagValue::String(s)
	}
}

impl From<i64> for FlagValue {
	fn from(n: i64) -> Self {
		FlagValue::Number(n.into())
	}
}

impl From<i32> for FlagValue {
	fn from(n: i32) -> Self {
		FlagValue::Number(n.into())
	}
}

impl From<Map<String, Value>> for FlagValue {
	fn from(m: Map<String, Value>) -> Self {
		FlagValue::Object(m)
	}
}

impl From<FlagValue> for Value {
	fn from(v: FlagValue) -> Self {
		match v {
			FlagValue::Bool(b) => Value::Bool(b),
			FlagValue::Number(n) => Value::Number(n),
			FlagValue::String(s) => Value::String(s),
			FlagValue::Object(m) => Value::Object(m),
		}
	}
}

/// Returned when a JSON value has a shape that flags cannot take.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidFlagValue(pub &'static str);

impl fmt::Display for InvalidFlagValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} is not a valid flag value", self.0)
	}
}

impl std::error::Error for InvalidFlagValue {}

impl TryFrom<Value> for FlagValue {
	type Error = InvalidFlagValue;

	fn try_from(value: Value) -> Result<Self, Self::Error> {
		match value {
			Value::Bool(b) => Ok(FlagValue::Bool(b)),
			Value::Number(n) => Ok(FlagValue::Number(n)),
			Value::String(s) => Ok(FlagValue::String(s)),
			Value::Object(m) => Ok(FlagValue::Object(m)),
			Value::Null => Err(InvalidFlagValue("null")),
			Value::Array(_) => Err(InvalidFlagValue("array")),
		}
	}
}

/// Recursive structural equality over JSON values.
///
/// Objects are equal when they have the same key set and equal values at
/// every key, regardless of key order. Arrays compare element-wise in order.
/// Values of different shapes are never equal, so `0`, `false`, `""` and
/// `null` are all distinct.
pub fn structural_eq(a: &Value, b: &Value) -> bool {
	match (a, b) {
		(Value::Null, Value::Null) => true,
		(Value::Bool(x), Value::Bool(y)) => x == y,
		(Value::Number(x), Value::Number(y)) => numbers_equal(x, y),
		(Value::String(x), Value::String(y)) => x == y,
		(Value::Array(x), Value::Array(y)) => {
			x.len() == y.len() && x.iter().zip(y).all(|(l, r)| structural_eq(l, r))
		}
		(Value::Object(x), Value::Object(y)) => objects_equal(x, y),
		_ => false,
	}
}

fn objects_equal(a: &Map<String, Value>, b: &Map<String, Value>) -> bool {
	if a.len() != b.len() {
		return false;
	}
	a.iter().all(|(key, left)| match b.get(key) {
		Some(right) => structural_eq(left, right),
		None => false,
	})
}

// Integers compare exactly; anything involving a float compares by value,
// so `1` and `1.0` are the same number.
fn numbers_equal(a: &Number, b: &Number) -> bool {
	if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
		return x == y;
	}
	if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
		return x == y;
	}
	if a.is_f64() || b.is_f64() {
		return match (a.as_f64(), b.as_f64()) {
			(Some(x), Some(y)) => x == y,
			_ => false,
		};
	}
	false
}
