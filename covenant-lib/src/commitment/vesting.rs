
use bitcoin::hashes::hash160;

use super::*;


/// State of a vesting or milestone budget covenant.
///
/// | field           | offset | width |
/// |-----------------|--------|-------|
/// | status          | 0      | 1     |
/// | flags           | 1      | 1     |
/// | total_released  | 2      | 8     |
/// | last_release    | 10     | 5     |
/// | milestone_index | 15     | 5     |
/// | recipient_hash  | 20     | 20    |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingState {
	pub status: Status,
	pub flags: Flags,
	pub total_released: u64,
	pub last_release: U40,
	pub milestone_index: U40,
	pub recipient_hash: hash160::Hash,
}

impl VestingState {
	pub const TOTAL_RELEASED: Field = Field::new("total_released", 2, AMOUNT_WIDTH);
	pub const LAST_RELEASE: Field = Field::new("last_release", 10, U40_WIDTH);
	pub const MILESTONE_INDEX: Field = Field::new("milestone_index", 15, U40_WIDTH);
	pub const RECIPIENT_HASH: Field = Field::new("recipient_hash", 20, HASH_WIDTH);

	/// Initial state for a freshly funded covenant.
	pub fn initial(flags: Flags, recipient_hash: hash160::Hash) -> VestingState {
		VestingState {
			status: Status::Active,
			flags,
			total_released: 0,
			last_release: U40::ZERO,
			milestone_index: U40::ZERO,
			recipient_hash,
		}
	}
}

impl Commitment for VestingState {
	const LAYOUT: Layout = Layout {
		kind: ResourceKind::Vesting,
		len: 40,
		fields: &[
			STATUS_FIELD,
			FLAGS_FIELD,
			Self::TOTAL_RELEASED,
			Self::LAST_RELEASE,
			Self::MILESTONE_INDEX,
			Self::RECIPIENT_HASH,
		],
	};

	fn status(&self) -> Status {
		self.status
	}

	fn write_fields(&self, w: &mut CommitmentWriter) {
		w.put_u8(&FLAGS_FIELD, self.flags.bits());
		w.put_u64(&Self::TOTAL_RELEASED, self.total_released);
		w.put_u40(&Self::LAST_RELEASE, self.last_release);
		w.put_u40(&Self::MILESTONE_INDEX, self.milestone_index);
		w.put_hash(&Self::RECIPIENT_HASH, &self.recipient_hash);
	}

	fn read_fields(r: &CommitmentReader) -> Result<Self, InvalidCommitment> {
		Ok(VestingState {
			status: r.status()?,
			flags: r.flags()?,
			total_released: r.u64(&Self::TOTAL_RELEASED),
			last_release: r.u40(&Self::LAST_RELEASE),
			milestone_index: r.u40(&Self::MILESTONE_INDEX),
			recipient_hash: r.hash(&Self::RECIPIENT_HASH),
		})
	}
}

#[cfg(test)]
mod test {
	use bitcoin::hashes::Hash;
	use bitcoin::hex::FromHex;

	use super::*;

	#[test]
	fn vesting_known_encoding() {
		let state = VestingState {
			status: Status::Active,
			flags: Flags::CANCELABLE.with(Flags::TRANSFERABLE),
			total_released: 20_000,
			last_release: U40::new(1_767_225_600).unwrap(),
			milestone_index: U40::new(1).unwrap(),
			recipient_hash: hash160::Hash::from_byte_array([0x11; 20]),
		};
		let expected = Vec::<u8>::from_hex(concat!(
			"00", "03", "204e000000000000", "00b9556900", "0100000000",
			"1111111111111111111111111111111111111111",
		)).unwrap();
		assert_eq!(state.encode(), expected);
		assert_eq!(VestingState::decode(&expected).unwrap(), state);
		assert_eq!(VestingState::decode_hex(&state.encode_hex()).unwrap(), state);
	}

	#[test]
	fn vesting_rejects_bad_status() {
		let mut bytes = VestingState::initial(Flags::NONE, hash160::Hash::all_zeros()).encode();
		bytes[0] = 7;
		assert_eq!(VestingState::decode(&bytes), Err(InvalidCommitment::Status(7)));
	}
}
