//!
//! Typed constructor arguments of a covenant template.
//!
//! Stored parameters arrive as loose `{"type": .., "value": ..}` JSON tuples.
//! They are converted into [ConstructorArg]s and checked against the
//! template's declared [ParamType]s before any derivation happens.
//!

use std::fmt;
use std::str::FromStr;

use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::hex::{DisplayHex, FromHex};
use serde::{Deserialize, Deserializer, Serialize, Serializer};


#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
	#[error("unknown parameter type: {0}")]
	UnknownType(String),
	#[error("parameter {index}: expected {expected}, got {got}")]
	TypeMismatch {
		index: usize,
		expected: ParamType,
		got: String,
	},
	#[error("parameter {index}: expected {expected} bytes, got {actual}")]
	Length {
		index: usize,
		expected: usize,
		actual: usize,
	},
	#[error("parameter {index}: invalid value: {msg}")]
	InvalidValue {
		index: usize,
		msg: String,
	},
	#[error("expected {expected} parameters, got {actual}")]
	Count {
		expected: usize,
		actual: usize,
	},
}

/// The declared type of a constructor input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
	/// A byte string of exactly 20 bytes, usually a public key hash.
	Bytes20,
	/// A byte string of exactly 32 bytes, usually a token category or a root.
	Bytes32,
	/// A byte string of any length.
	Bytes,
	Int,
	Bool,
}

impl ParamType {
	pub fn as_str(&self) -> &'static str {
		match self {
			ParamType::Bytes20 => "bytes20",
			ParamType::Bytes32 => "bytes32",
			ParamType::Bytes => "bytes",
			ParamType::Int => "int",
			ParamType::Bool => "bool",
		}
	}

	fn fixed_len(&self) -> Option<usize> {
		match self {
			ParamType::Bytes20 => Some(20),
			ParamType::Bytes32 => Some(32),
			_ => None,
		}
	}

	/// Check that the argument at position `index` is of this type.
	pub fn check(&self, index: usize, arg: &ConstructorArg) -> Result<(), ParamError> {
		match (self, arg) {
			(ParamType::Int, ConstructorArg::Int(_)) => Ok(()),
			(ParamType::Bool, ConstructorArg::Bool(_)) => Ok(()),
			(ParamType::Bytes20 | ParamType::Bytes32 | ParamType::Bytes, ConstructorArg::Bytes(b)) => {
				match self.fixed_len() {
					Some(len) if len != b.len() => Err(ParamError::Length {
						index, expected: len, actual: b.len(),
					}),
					_ => Ok(()),
				}
			},
			(expected, got) => Err(ParamError::TypeMismatch {
				index,
				expected: *expected,
				got: got.type_name().to_owned(),
			}),
		}
	}
}

impl fmt::Display for ParamType {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ParamType {
	type Err = ParamError;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"bytes20" | "pubkeyhash" => Ok(ParamType::Bytes20),
			"bytes32" => Ok(ParamType::Bytes32),
			"bytes" => Ok(ParamType::Bytes),
			"int" => Ok(ParamType::Int),
			"bool" => Ok(ParamType::Bool),
			_ => Err(ParamError::UnknownType(s.to_owned())),
		}
	}
}

impl Serialize for ParamType {
	fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
		s.serialize_str(self.as_str())
	}
}

impl<'de> Deserialize<'de> for ParamType {
	fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
		let s = String::deserialize(d)?;
		ParamType::from_str(&s).map_err(serde::de::Error::custom)
	}
}

/// A typed constructor argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConstructorArg {
	Bytes(Vec<u8>),
	Int(i64),
	Bool(bool),
}

impl ConstructorArg {
	fn type_name(&self) -> &'static str {
		match self {
			ConstructorArg::Bytes(b) if b.len() == 20 => "bytes20",
			ConstructorArg::Bytes(b) if b.len() == 32 => "bytes32",
			ConstructorArg::Bytes(_) => "bytes",
			ConstructorArg::Int(_) => "int",
			ConstructorArg::Bool(_) => "bool",
		}
	}

	/// Convert a loose stored tuple into a typed argument.
	pub fn from_raw(index: usize, raw: &RawParam) -> Result<ConstructorArg, ParamError> {
		let ty = ParamType::from_str(&raw.ty)?;
		let invalid = |msg: String| ParamError::InvalidValue { index, msg };
		let arg = match ty {
			ParamType::Bytes20 | ParamType::Bytes32 | ParamType::Bytes => {
				let s = raw.value.as_str()
					.ok_or_else(|| invalid("bytes must be a hex string".into()))?;
				let s = s.strip_prefix("0x").unwrap_or(s);
				ConstructorArg::Bytes(Vec::<u8>::from_hex(s).map_err(|e| invalid(e.to_string()))?)
			},
			ParamType::Int => match raw.value {
				serde_json::Value::Number(ref n) => ConstructorArg::Int(
					n.as_i64().ok_or_else(|| invalid(format!("{} is out of range", n)))?,
				),
				serde_json::Value::String(ref s) => ConstructorArg::Int(
					s.trim_end_matches('n').parse().map_err(|e| invalid(format!("{}", e)))?,
				),
				ref v => return Err(invalid(format!("not an integer: {}", v))),
			},
			ParamType::Bool => match raw.value {
				serde_json::Value::Bool(b) => ConstructorArg::Bool(b),
				serde_json::Value::String(ref s) if s == "true" => ConstructorArg::Bool(true),
				serde_json::Value::String(ref s) if s == "false" => ConstructorArg::Bool(false),
				ref v => return Err(invalid(format!("not a boolean: {}", v))),
			},
		};
		ty.check(index, &arg)?;
		Ok(arg)
	}

	pub fn to_raw(&self) -> RawParam {
		let value = match self {
			ConstructorArg::Bytes(b) => serde_json::Value::String(b.to_lower_hex_string()),
			ConstructorArg::Int(i) => serde_json::Value::from(*i),
			ConstructorArg::Bool(b) => serde_json::Value::Bool(*b),
		};
		RawParam { ty: self.type_name().to_owned(), value }
	}

	/// Push this argument onto the script being built.
	pub fn push_to(&self, builder: Builder) -> Builder {
		match self {
			ConstructorArg::Bytes(b) => {
				// script pushes are limited to 4 GiB, far beyond any argument
				let push = PushBytesBuf::try_from(b.clone()).unwrap_or_default();
				builder.push_slice(push)
			},
			ConstructorArg::Int(i) => builder.push_int(*i),
			ConstructorArg::Bool(b) => builder.push_int(*b as i64),
		}
	}
}

impl From<bitcoin::hashes::hash160::Hash> for ConstructorArg {
	fn from(h: bitcoin::hashes::hash160::Hash) -> Self {
		ConstructorArg::Bytes(bitcoin::hashes::Hash::to_byte_array(h).to_vec())
	}
}

impl From<i64> for ConstructorArg {
	fn from(v: i64) -> Self {
		ConstructorArg::Int(v)
	}
}

impl From<bool> for ConstructorArg {
	fn from(v: bool) -> Self {
		ConstructorArg::Bool(v)
	}
}

impl Serialize for ConstructorArg {
	fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
		self.to_raw().serialize(s)
	}
}

impl<'de> Deserialize<'de> for ConstructorArg {
	fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
		let raw = RawParam::deserialize(d)?;
		ConstructorArg::from_raw(0, &raw).map_err(serde::de::Error::custom)
	}
}

/// A stored parameter as it is persisted next to a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawParam {
	#[serde(rename = "type")]
	pub ty: String,
	pub value: serde_json::Value,
}

/// Convert and check a list of stored parameters against the declared types.
pub fn parse_args(types: &[ParamType], raw: &[RawParam]) -> Result<Vec<ConstructorArg>, ParamError> {
	if types.len() != raw.len() {
		return Err(ParamError::Count { expected: types.len(), actual: raw.len() });
	}
	types.iter().zip(raw).enumerate().map(|(i, (ty, raw))| {
		let arg = ConstructorArg::from_raw(i, raw)?;
		ty.check(i, &arg)?;
		Ok(arg)
	}).collect()
}

/// Check already typed arguments against the declared types.
pub fn check_args(types: &[ParamType], args: &[ConstructorArg]) -> Result<(), ParamError> {
	if types.len() != args.len() {
		return Err(ParamError::Count { expected: types.len(), actual: args.len() });
	}
	for (i, (ty, arg)) in types.iter().zip(args).enumerate() {
		ty.check(i, arg)?;
	}
	Ok(())
}

#[cfg(test)]
mod test {
	use super::*;

	fn raw(ty: &str, value: serde_json::Value) -> RawParam {
		RawParam { ty: ty.into(), value }
	}

	#[test]
	fn parse_stored_params() {
		let types = [ParamType::Bytes20, ParamType::Int, ParamType::Bool];
		let stored = vec![
			raw("bytes20", "76a04053bda0a88bda5177b86a15c3b29f559873".into()),
			raw("int", "1767225600".into()),
			raw("bool", true.into()),
		];
		let args = parse_args(&types, &stored).unwrap();
		assert_eq!(args[1], ConstructorArg::Int(1_767_225_600));
		assert_eq!(args[2], ConstructorArg::Bool(true));
		match args[0] {
			ConstructorArg::Bytes(ref b) => assert_eq!(b.len(), 20),
			_ => panic!("not bytes"),
		}
	}

	#[test]
	fn reject_wrong_params() {
		let err = parse_args(&[ParamType::Bytes20], &[raw("bytes20", "aabb".into())]).unwrap_err();
		assert_eq!(err, ParamError::Length { index: 0, expected: 20, actual: 2 });

		let err = parse_args(&[ParamType::Int], &[raw("bool", true.into())]).unwrap_err();
		assert!(matches!(err, ParamError::TypeMismatch { index: 0, .. }), "{}", err);

		let err = parse_args(&[ParamType::Int, ParamType::Int], &[raw("int", 1.into())]).unwrap_err();
		assert_eq!(err, ParamError::Count { expected: 2, actual: 1 });

		let err = ConstructorArg::from_raw(3, &raw("uint", 1.into())).unwrap_err();
		assert_eq!(err, ParamError::UnknownType("uint".into()));
	}

	#[test]
	fn json_shape() {
		let arg = ConstructorArg::Bytes(vec![0xab; 32]);
		let json = serde_json::to_value(&arg).unwrap();
		assert_eq!(json["type"], "bytes32");
		assert_eq!(json["value"], "ab".repeat(32));
		let back = serde_json::from_value::<ConstructorArg>(json).unwrap();
		assert_eq!(back, arg);
	}

	#[test]
	fn push_encoding() {
		let script = ConstructorArg::Int(0).push_to(Builder::new())
			.push_int(16)
			.into_script();
		assert_eq!(script.as_bytes(), &[0x00, 0x60]);
		let script = ConstructorArg::Bool(true).push_to(Builder::new()).into_script();
		assert_eq!(script.as_bytes(), &[0x51]);
		let script = ConstructorArg::Bytes(vec![1, 2, 3]).push_to(Builder::new()).into_script();
		assert_eq!(script.as_bytes(), &[0x03, 1, 2, 3]);
	}
}
