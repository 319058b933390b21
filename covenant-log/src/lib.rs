#[macro_use] extern crate serde;

#[macro_use]
mod macros;
mod msgs;

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::ser::{Serialize, SerializeMap, Serializer};
pub use crate::msgs::*;


/// The "target" field used for structured logging.
pub const SLOG_TARGET: &str = "covenant-slog";

const SLOG_ID_FIELD: &str = "slog_id";
const SLOG_DATA_FIELD: &str = "slog_data_json";

/// Trait implemented by all our structured log messages.
pub trait LogMsg: Sized + Send + fmt::Debug + Serialize + DeserializeOwned + 'static {
	const LOGID: &'static str;
	const LEVEL: log::Level;
	const MSG: &'static str;
}

/// Whether a message of type `T` would currently be logged.
pub fn enabled<T: LogMsg>() -> bool {
	log::log_enabled!(target: SLOG_TARGET, T::LEVEL)
}

/// Emit a structured message. Use the [slog!] macro instead.
pub fn log<T: LogMsg>(msg: &T, module: &str, file: &str, line: u32) {
	let data = serde_json::to_string(msg)
		.unwrap_or_else(|_| "json serialization error".into());
	let kv = SlogSource { id: T::LOGID, data: &data };
	log::logger().log(&log::Record::builder()
		.args(format_args!("{}", T::MSG))
		.level(T::LEVEL)
		.target(SLOG_TARGET)
		.module_path(Some(module))
		.file(Some(file))
		.line(Some(line))
		.key_values(&kv)
		.build());
}

struct SlogSource<'a> {
	id: &'static str,
	data: &'a str,
}

impl<'a> log::kv::Source for SlogSource<'a> {
	fn visit<'kvs>(
		&'kvs self,
		visitor: &mut dyn log::kv::VisitSource<'kvs>,
	) -> Result<(), log::kv::Error> {
		visitor.visit_pair(SLOG_ID_FIELD.into(), self.id.into())?;
		visitor.visit_pair(SLOG_DATA_FIELD.into(), self.data.into())?;
		Ok(())
	}
}

/// A wrapper around a [log::Record] that serializes it as one JSON log line.
///
/// The output can be read back with [parse_record].
pub struct RecordSerializeWrapper<'a>(pub &'a log::Record<'a>);

impl<'a> Serialize for RecordSerializeWrapper<'a> {
	fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
		let rec = self.0;
		let mut m = s.serialize_map(None)?;
		m.serialize_entry("timestamp", &chrono::Local::now())?;
		m.serialize_entry("message", &rec.args().to_string())?;
		m.serialize_entry("level", rec.level().as_str())?;
		m.serialize_entry("target", rec.target())?;
		if let Some(module) = rec.module_path() {
			m.serialize_entry("module", module)?;
		}
		if let Some(file) = rec.file() {
			m.serialize_entry("filename", file)?;
		}
		if let Some(line) = rec.line() {
			m.serialize_entry("line_number", &line)?;
		}
		let kv = rec.key_values();
		for field in [SLOG_ID_FIELD, SLOG_DATA_FIELD] {
			if let Some(v) = kv.get(log::kv::Key::from_str(field)) {
				m.serialize_entry(field, &v.to_string())?;
			}
		}
		m.end()
	}
}

#[derive(Debug)]
pub enum RecordParseError {
	WrongType,
	Json(serde_json::Error),
}

impl fmt::Display for RecordParseError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self {
			RecordParseError::WrongType => f.write_str("log record is of a different type"),
			RecordParseError::Json(e) => write!(f, "invalid log record json: {}", e),
		}
	}
}

impl std::error::Error for RecordParseError {}

pub fn parse_record(record: &str) -> Result<ParsedRecord<'_>, RecordParseError> {
	Ok(serde_json::from_str(record).map_err(RecordParseError::Json)?)
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ParsedRecord<'a> {
	pub timestamp: chrono::DateTime<chrono::Local>,
	#[serde(borrow)]
	pub message: Cow<'a, str>,
	#[serde(borrow)]
	pub level: Cow<'a, str>,
	pub target: Option<Cow<'a, str>>,
	pub module: Option<Cow<'a, str>>,
	pub filename: Option<Cow<'a, str>>,
	pub line_number: Option<u32>,
	pub slog_id: Option<Cow<'a, str>>,
	pub slog_data_json: Option<String>,
	#[serde(flatten)]
	pub extra: HashMap<String, serde_json::Value>,
}

impl ParsedRecord<'_> {
	/// Whether this is a structured log message
	pub fn is_slog(&self) -> bool {
		self.slog_id.is_some()
	}

	/// Check whether this log message if of the given structure log type.
	pub fn is<T: LogMsg>(&self) -> bool {
		self.slog_id.as_deref() == Some(T::LOGID)
	}

	/// Try to parse the log message into the given structured log type.
	pub fn try_as<T: LogMsg>(&self) -> Result<T, RecordParseError> {
		if !self.is::<T>() {
			return Err(RecordParseError::WrongType);
		}

		let json = self.slog_data_json.as_deref().unwrap_or("{}");
		Ok(serde_json::from_str(json).map_err(RecordParseError::Json)?)
	}
}


#[cfg(test)]
mod test {
	use super::*;

	#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
	struct TestLog {
		nb: usize,
		name: String,
	}
	impl_slog!(TestLog, Info, "test log message");

	#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
	struct EmptyLog {}
	impl_slog!(EmptyLog, Debug, "empty log");

	#[test]
	fn test_log_msg_trait() {
		assert_eq!(TestLog::LOGID, "TestLog");
		assert_eq!(TestLog::LEVEL, log::Level::Info);
		assert_eq!(TestLog::MSG, "test log message");

		assert_eq!(EmptyLog::LOGID, "EmptyLog");
		assert_eq!(EmptyLog::LEVEL, log::Level::Debug);
		assert_eq!(EmptyLog::MSG, "empty log");

		assert_eq!(SessionCompleted::LOGID, "SessionCompleted");
		assert_eq!(BroadcastRejected::LEVEL, log::Level::Warn);
	}

	#[test]
	fn record_roundtrip() {
		let msg = TestLog { nb: 42, name: "test".to_string() };
		let data = serde_json::to_string(&msg).unwrap();
		let kv = SlogSource { id: TestLog::LOGID, data: &data };
		let line = serde_json::to_string(&RecordSerializeWrapper(&log::Record::builder()
			.args(format_args!("{}", TestLog::MSG))
			.level(TestLog::LEVEL)
			.target(SLOG_TARGET)
			.file(Some("test.rs"))
			.line(Some(35))
			.key_values(&kv)
			.build()
		)).unwrap();

		let parsed = parse_record(&line).unwrap();
		assert!(parsed.is_slog());
		assert!(parsed.is::<TestLog>());
		assert!(!parsed.is::<EmptyLog>());
		assert_eq!(parsed.level, "INFO");
		assert_eq!(parsed.target.as_deref(), Some(SLOG_TARGET));
		assert_eq!(parsed.line_number, Some(35));
		assert_eq!(parsed.try_as::<TestLog>().unwrap(), msg);
		assert!(matches!(parsed.try_as::<EmptyLog>(), Err(RecordParseError::WrongType)));
	}

	#[test]
	fn json_parse() {
		let slog_data = serde_json::json!({
			"name": "test",
			"nb": 35
		});
		let json = serde_json::to_string(&serde_json::json!({
			"timestamp": "2026-01-01T17:06:57.586378832+01:00",
			"message": "test",
			"level": "INFO",
			"filename": "test.rs",
			"line_number": 35,
			"slog_id": "TestLog",
			"slog_data_json": slog_data.to_string(),
			"extra": {"extra": 3},
		})).unwrap();
		let parsed = parse_record(&json).unwrap();
		assert!(parsed.is::<TestLog>());
		let tl = parsed.try_as::<TestLog>().unwrap();
		assert_eq!(tl.nb, 35);
		assert_eq!(tl.name, "test".to_string());
		assert!(parsed.extra.contains_key("extra"));

		// And without slog stuff
		let json = serde_json::to_string(&serde_json::json!({
			"timestamp": "2026-01-01T17:06:57.586378832+01:00",
			"message": "test",
			"level": "INFO",
		})).unwrap();
		let parsed = parse_record(&json).unwrap();
		assert!(!parsed.is_slog());
		assert!(!parsed.is::<TestLog>());
	}

	#[test]
	fn slog_macro_compiles_without_logger() {
		slog!(LedgerQueryFailed, query: "utxos".into(), error: "timeout".into());
	}
}
