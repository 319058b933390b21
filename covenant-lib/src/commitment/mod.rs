//!
//! Fixed-width binary state carried by a covenant's mutable output.
//!
//! Every resource kind has its own byte layout, described by a [Layout] table
//! of [Field]s. All multi-byte integers are little-endian. Amounts use 8 bytes,
//! times and cursors use 5 bytes ([U40]) and owner hashes use 20 bytes.
//!

mod airdrop;
mod recurring;
mod vesting;
mod votelock;

pub use self::airdrop::AirdropState;
pub use self::recurring::RecurringState;
pub use self::vesting::VestingState;
pub use self::votelock::VoteLockState;

use std::fmt;
use std::str::FromStr;

use bitcoin::hashes::{hash160, Hash};
use bitcoin::hex::{DisplayHex, FromHex};


/// Width in bytes of a cumulative amount field.
pub const AMOUNT_WIDTH: usize = 8;

/// Width in bytes of a time or cursor field.
pub const U40_WIDTH: usize = 5;

/// Width in bytes of an owner or recipient hash field.
pub const HASH_WIDTH: usize = 20;

/// The status byte, shared by all layouts.
pub const STATUS_FIELD: Field = Field::new("status", 0, 1);

/// The flags byte, shared by all layouts.
pub const FLAGS_FIELD: Field = Field::new("flags", 1, 1);


/// Error returned when a state blob can't be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidCommitment {
	#[error("invalid commitment: {kind} state must be {expected} bytes, got {actual}")]
	Length {
		kind: ResourceKind,
		expected: usize,
		actual: usize,
	},
	#[error("invalid commitment: unknown status byte {0:#04x}")]
	Status(u8),
	#[error("invalid commitment: unknown flag bits in {0:#04x}")]
	Flags(u8),
	#[error("invalid commitment: bad hex: {0}")]
	Hex(String),
}

/// The kind of resource a covenant manages.
///
/// This closed set is used both for commitment layouts and for script templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
	Vesting,
	RecurringPayment,
	VoteLock,
	Airdrop,
}

impl ResourceKind {
	pub const ALL: [ResourceKind; 4] = [
		ResourceKind::Vesting,
		ResourceKind::RecurringPayment,
		ResourceKind::VoteLock,
		ResourceKind::Airdrop,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			ResourceKind::Vesting => "vesting",
			ResourceKind::RecurringPayment => "recurring-payment",
			ResourceKind::VoteLock => "vote-lock",
			ResourceKind::Airdrop => "airdrop",
		}
	}

	/// The commitment layout for this kind.
	pub fn layout(&self) -> &'static Layout {
		match self {
			ResourceKind::Vesting => &VestingState::LAYOUT,
			ResourceKind::RecurringPayment => &RecurringState::LAYOUT,
			ResourceKind::VoteLock => &VoteLockState::LAYOUT,
			ResourceKind::Airdrop => &AirdropState::LAYOUT,
		}
	}
}

impl fmt::Display for ResourceKind {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ResourceKind {
	type Err = String;
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"vesting" | "budget" => Ok(ResourceKind::Vesting),
			"recurring-payment" | "recurring" => Ok(ResourceKind::RecurringPayment),
			"vote-lock" | "votelock" => Ok(ResourceKind::VoteLock),
			"airdrop" => Ok(ResourceKind::Airdrop),
			_ => Err(format!("unknown resource kind: {}", s)),
		}
	}
}

/// Lifecycle status of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
	Active = 0,
	Paused = 1,
	Cancelled = 2,
	Completed = 3,
}

impl Status {
	pub fn to_u8(self) -> u8 {
		self as u8
	}

	/// Whether no further transitions can happen from this status.
	pub fn is_terminal(self) -> bool {
		match self {
			Status::Active | Status::Paused => false,
			Status::Cancelled | Status::Completed => true,
		}
	}
}

impl TryFrom<u8> for Status {
	type Error = InvalidCommitment;
	fn try_from(v: u8) -> Result<Self, Self::Error> {
		match v {
			0 => Ok(Status::Active),
			1 => Ok(Status::Paused),
			2 => Ok(Status::Cancelled),
			3 => Ok(Status::Completed),
			v => Err(InvalidCommitment::Status(v)),
		}
	}
}

/// Per-bit boolean options of a resource.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Flags(u8);

impl Flags {
	pub const NONE: Flags = Flags(0);
	pub const CANCELABLE: Flags = Flags(0x01);
	pub const TRANSFERABLE: Flags = Flags(0x02);
	pub const USES_TOKEN: Flags = Flags(0x04);
	pub const PAUSABLE: Flags = Flags(0x08);

	const ALL_BITS: u8 = 0x0f;

	pub fn from_bits(bits: u8) -> Option<Flags> {
		if bits & !Self::ALL_BITS == 0 {
			Some(Flags(bits))
		} else {
			None
		}
	}

	pub fn bits(self) -> u8 {
		self.0
	}

	pub fn contains(self, other: Flags) -> bool {
		self.0 & other.0 == other.0
	}

	pub fn with(self, other: Flags) -> Flags {
		Flags(self.0 | other.0)
	}

	pub fn set(&mut self, other: Flags, on: bool) {
		if on {
			self.0 |= other.0;
		} else {
			self.0 &= !other.0;
		}
	}
}

impl fmt::Debug for Flags {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let names = [
			(Flags::CANCELABLE, "CANCELABLE"),
			(Flags::TRANSFERABLE, "TRANSFERABLE"),
			(Flags::USES_TOKEN, "USES_TOKEN"),
			(Flags::PAUSABLE, "PAUSABLE"),
		];
		let set = names.iter().filter(|(flag, _)| self.contains(*flag)).map(|(_, n)| *n);
		f.debug_list().entries(set).finish()
	}
}

impl TryFrom<u8> for Flags {
	type Error = InvalidCommitment;
	fn try_from(v: u8) -> Result<Self, Self::Error> {
		Flags::from_bits(v).ok_or(InvalidCommitment::Flags(v))
	}
}

impl From<Flags> for u8 {
	fn from(f: Flags) -> u8 {
		f.0
	}
}

/// A value that fits in 40 bits, encoded as 5 little-endian bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct U40(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("value {0} doesn't fit in 40 bits")]
pub struct U40Overflow(pub u64);

impl U40 {
	pub const ZERO: U40 = U40(0);
	pub const MAX: U40 = U40((1 << 40) - 1);

	pub const fn new(v: u64) -> Option<U40> {
		if v <= Self::MAX.0 {
			Some(U40(v))
		} else {
			None
		}
	}

	pub const fn get(self) -> u64 {
		self.0
	}

	pub fn checked_add(self, v: u64) -> Option<U40> {
		self.0.checked_add(v).and_then(U40::new)
	}

	pub fn to_le_bytes(self) -> [u8; U40_WIDTH] {
		let b = self.0.to_le_bytes();
		[b[0], b[1], b[2], b[3], b[4]]
	}

	pub fn from_le_bytes(b: [u8; U40_WIDTH]) -> U40 {
		U40(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], 0, 0, 0]))
	}
}

impl TryFrom<u64> for U40 {
	type Error = U40Overflow;
	fn try_from(v: u64) -> Result<Self, Self::Error> {
		U40::new(v).ok_or(U40Overflow(v))
	}
}

impl From<U40> for u64 {
	fn from(v: U40) -> u64 {
		v.0
	}
}

impl fmt::Display for U40 {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		fmt::Display::fmt(&self.0, f)
	}
}

/// A single named field in a [Layout].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
	pub name: &'static str,
	pub offset: usize,
	pub width: usize,
}

impl Field {
	pub const fn new(name: &'static str, offset: usize, width: usize) -> Field {
		Field { name, offset, width }
	}

	pub const fn end(&self) -> usize {
		self.offset + self.width
	}
}

/// The byte-offset table of a commitment kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
	pub kind: ResourceKind,
	pub len: usize,
	pub fields: &'static [Field],
}

impl Layout {
	pub fn field(&self, name: &str) -> Option<&Field> {
		self.fields.iter().find(|f| f.name == name)
	}

	/// Whether the fields cover the whole layout without gaps or overlap.
	pub fn is_contiguous(&self) -> bool {
		let mut cursor = 0;
		for field in self.fields {
			if field.offset != cursor {
				return false;
			}
			cursor = field.end();
		}
		cursor == self.len
	}
}

/// Writes fields into a fixed-size buffer for a layout.
pub struct CommitmentWriter {
	layout: Layout,
	buf: Vec<u8>,
}

impl CommitmentWriter {
	fn new(layout: Layout) -> CommitmentWriter {
		CommitmentWriter {
			layout,
			buf: vec![0; layout.len],
		}
	}

	fn slot(&mut self, field: &Field, width: usize) -> &mut [u8] {
		debug_assert_eq!(field.width, width, "field {} has wrong width", field.name);
		debug_assert!(field.end() <= self.layout.len);
		&mut self.buf[field.offset..field.end()]
	}

	pub fn put_u8(&mut self, field: &Field, v: u8) {
		self.slot(field, 1)[0] = v;
	}

	pub fn put_u64(&mut self, field: &Field, v: u64) {
		self.slot(field, AMOUNT_WIDTH).copy_from_slice(&v.to_le_bytes());
	}

	pub fn put_u40(&mut self, field: &Field, v: U40) {
		self.slot(field, U40_WIDTH).copy_from_slice(&v.to_le_bytes());
	}

	pub fn put_hash(&mut self, field: &Field, v: &hash160::Hash) {
		self.slot(field, HASH_WIDTH).copy_from_slice(v.as_byte_array());
	}

	fn finish(self) -> Vec<u8> {
		self.buf
	}
}

/// Reads fields from a blob whose length has been validated for a layout.
pub struct CommitmentReader<'a> {
	bytes: &'a [u8],
}

impl<'a> CommitmentReader<'a> {
	fn new(layout: &Layout, bytes: &'a [u8]) -> Result<CommitmentReader<'a>, InvalidCommitment> {
		if bytes.len() != layout.len {
			return Err(InvalidCommitment::Length {
				kind: layout.kind,
				expected: layout.len,
				actual: bytes.len(),
			});
		}
		Ok(CommitmentReader { bytes })
	}

	fn slot(&self, field: &Field) -> &'a [u8] {
		&self.bytes[field.offset..field.end()]
	}

	pub fn u8(&self, field: &Field) -> u8 {
		self.slot(field)[0]
	}

	pub fn u64(&self, field: &Field) -> u64 {
		let mut buf = [0; AMOUNT_WIDTH];
		buf.copy_from_slice(self.slot(field));
		u64::from_le_bytes(buf)
	}

	pub fn u40(&self, field: &Field) -> U40 {
		let mut buf = [0; U40_WIDTH];
		buf.copy_from_slice(self.slot(field));
		U40::from_le_bytes(buf)
	}

	pub fn hash(&self, field: &Field) -> hash160::Hash {
		let mut buf = [0; HASH_WIDTH];
		buf.copy_from_slice(self.slot(field));
		hash160::Hash::from_byte_array(buf)
	}

	pub fn status(&self) -> Result<Status, InvalidCommitment> {
		Status::try_from(self.u8(&STATUS_FIELD))
	}

	pub fn flags(&self) -> Result<Flags, InvalidCommitment> {
		Flags::try_from(self.u8(&FLAGS_FIELD))
	}
}

/// Trait implemented by all commitment states.
pub trait Commitment: Sized {
	/// The byte-offset table of this state.
	const LAYOUT: Layout;

	/// Write all fields of the state.
	fn write_fields(&self, w: &mut CommitmentWriter);

	/// Read all fields of the state.
	fn read_fields(r: &CommitmentReader) -> Result<Self, InvalidCommitment>;

	fn status(&self) -> Status;

	/// Encode the state. The result always has the layout's length.
	fn encode(&self) -> Vec<u8> {
		let mut w = CommitmentWriter::new(Self::LAYOUT);
		w.put_u8(&STATUS_FIELD, self.status().to_u8());
		self.write_fields(&mut w);
		w.finish()
	}

	/// Decode the state, failing unless the blob has exactly the layout's length.
	fn decode(bytes: &[u8]) -> Result<Self, InvalidCommitment> {
		let r = CommitmentReader::new(&Self::LAYOUT, bytes)?;
		Self::read_fields(&r)
	}

	fn encode_hex(&self) -> String {
		self.encode().to_lower_hex_string()
	}

	fn decode_hex(s: &str) -> Result<Self, InvalidCommitment> {
		let bytes = Vec::<u8>::from_hex(s).map_err(|e| InvalidCommitment::Hex(e.to_string()))?;
		Self::decode(&bytes)
	}
}

/// A commitment of any kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AnyCommitment {
	Vesting(VestingState),
	RecurringPayment(RecurringState),
	VoteLock(VoteLockState),
	Airdrop(AirdropState),
}

impl AnyCommitment {
	pub fn decode(kind: ResourceKind, bytes: &[u8]) -> Result<AnyCommitment, InvalidCommitment> {
		Ok(match kind {
			ResourceKind::Vesting => AnyCommitment::Vesting(VestingState::decode(bytes)?),
			ResourceKind::RecurringPayment => {
				AnyCommitment::RecurringPayment(RecurringState::decode(bytes)?)
			},
			ResourceKind::VoteLock => AnyCommitment::VoteLock(VoteLockState::decode(bytes)?),
			ResourceKind::Airdrop => AnyCommitment::Airdrop(AirdropState::decode(bytes)?),
		})
	}

	pub fn decode_hex(kind: ResourceKind, s: &str) -> Result<AnyCommitment, InvalidCommitment> {
		let bytes = Vec::<u8>::from_hex(s).map_err(|e| InvalidCommitment::Hex(e.to_string()))?;
		AnyCommitment::decode(kind, &bytes)
	}

	pub fn encode(&self) -> Vec<u8> {
		match self {
			AnyCommitment::Vesting(s) => s.encode(),
			AnyCommitment::RecurringPayment(s) => s.encode(),
			AnyCommitment::VoteLock(s) => s.encode(),
			AnyCommitment::Airdrop(s) => s.encode(),
		}
	}

	pub fn kind(&self) -> ResourceKind {
		match self {
			AnyCommitment::Vesting(_) => ResourceKind::Vesting,
			AnyCommitment::RecurringPayment(_) => ResourceKind::RecurringPayment,
			AnyCommitment::VoteLock(_) => ResourceKind::VoteLock,
			AnyCommitment::Airdrop(_) => ResourceKind::Airdrop,
		}
	}

	pub fn status(&self) -> Status {
		match self {
			AnyCommitment::Vesting(s) => s.status,
			AnyCommitment::RecurringPayment(s) => s.status,
			AnyCommitment::VoteLock(s) => s.status,
			AnyCommitment::Airdrop(s) => s.status,
		}
	}
}

impl From<VestingState> for AnyCommitment {
	fn from(s: VestingState) -> Self {
		AnyCommitment::Vesting(s)
	}
}

impl From<RecurringState> for AnyCommitment {
	fn from(s: RecurringState) -> Self {
		AnyCommitment::RecurringPayment(s)
	}
}

impl From<VoteLockState> for AnyCommitment {
	fn from(s: VoteLockState) -> Self {
		AnyCommitment::VoteLock(s)
	}
}

impl From<AirdropState> for AnyCommitment {
	fn from(s: AirdropState) -> Self {
		AnyCommitment::Airdrop(s)
	}
}

#[cfg(test)]
mod test {
	use bitcoin::hashes::Hash;
	use rand::{Rng, SeedableRng};
	use rand::rngs::SmallRng;

	use super::*;

	fn random_state(rng: &mut SmallRng, kind: ResourceKind) -> AnyCommitment {
		let status = Status::try_from(rng.random_range(0..4u8)).unwrap();
		let flags = Flags::try_from(rng.random_range(0..16u8)).unwrap();
		let mut u40 = || U40::new(rng.random_range(0..=U40::MAX.get())).unwrap();
		let (a, b, c) = (u40(), u40(), u40());
		let amount = rng.random::<u64>();
		let hash = hash160::Hash::from_byte_array(rng.random());
		match kind {
			ResourceKind::Vesting => VestingState {
				status, flags, total_released: amount, last_release: a, milestone_index: b,
				recipient_hash: hash,
			}.into(),
			ResourceKind::RecurringPayment => RecurringState {
				status, flags, total_paid: amount, next_payment: a, payment_count: b, paused_at: c,
			}.into(),
			ResourceKind::VoteLock => VoteLockState {
				status, flags, locked_amount: amount, unlock_time: a, voter_hash: hash,
			}.into(),
			ResourceKind::Airdrop => AirdropState {
				status, flags, total_claimed: amount, claim_count: a, last_claim: b,
			}.into(),
		}
	}

	#[test]
	fn random_states_survive_encoding() {
		let mut rng = SmallRng::seed_from_u64(0xc0de);
		for _ in 0..250 {
			for kind in ResourceKind::ALL {
				let state = random_state(&mut rng, kind);
				let bytes = state.encode();
				assert_eq!(bytes.len(), kind.layout().len);
				assert_eq!(AnyCommitment::decode(kind, &bytes).unwrap(), state);
			}
		}
	}

	#[test]
	fn layouts_are_contiguous() {
		for kind in ResourceKind::ALL {
			let layout = kind.layout();
			assert_eq!(layout.kind, kind);
			assert!(layout.is_contiguous(), "{} layout has gaps", kind);
			assert_eq!(layout.fields[0], STATUS_FIELD);
			assert_eq!(layout.fields[1], FLAGS_FIELD);
		}
	}

	#[test]
	fn u40_bounds() {
		assert_eq!(U40::new(1 << 40), None);
		assert_eq!(U40::MAX.get(), 0xff_ffff_ffff);
		assert_eq!(U40::MAX.checked_add(1), None);

		let v = U40::new(1_767_225_600).unwrap();
		assert_eq!(U40::from_le_bytes(v.to_le_bytes()), v);
		assert_eq!(v.to_le_bytes(), [0x00, 0xb9, 0x55, 0x69, 0x00]);
	}

	#[test]
	fn flags_reject_unknown_bits() {
		assert_eq!(Flags::try_from(0x10), Err(InvalidCommitment::Flags(0x10)));
		let f = Flags::try_from(0x05).unwrap();
		assert!(f.contains(Flags::CANCELABLE));
		assert!(f.contains(Flags::USES_TOKEN));
		assert!(!f.contains(Flags::TRANSFERABLE));
	}

	#[test]
	fn status_reject_unknown() {
		assert_eq!(Status::try_from(4), Err(InvalidCommitment::Status(4)));
		assert_eq!(Status::try_from(3), Ok(Status::Completed));
	}

	#[test]
	fn short_blob_fails_for_every_kind() {
		for kind in ResourceKind::ALL {
			let len = kind.layout().len;
			let err = AnyCommitment::decode(kind, &vec![0; len - 1]).unwrap_err();
			assert_eq!(err, InvalidCommitment::Length { kind, expected: len, actual: len - 1 });
			AnyCommitment::decode(kind, &vec![0; len]).unwrap();
			assert!(AnyCommitment::decode(kind, &vec![0; len + 1]).is_err());
		}
	}

	#[test]
	fn resource_kind_from_str() {
		for kind in ResourceKind::ALL {
			assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
		}
		assert!("nope".parse::<ResourceKind>().is_err());
	}
}
