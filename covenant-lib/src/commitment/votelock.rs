
use bitcoin::hashes::hash160;

use super::*;


/// State of a token vote-lock covenant.
///
/// | field         | offset | width |
/// |---------------|--------|-------|
/// | status        | 0      | 1     |
/// | flags         | 1      | 1     |
/// | locked_amount | 2      | 8     |
/// | unlock_time   | 10     | 5     |
/// | voter_hash    | 15     | 20    |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteLockState {
	pub status: Status,
	pub flags: Flags,
	/// Cumulative amount of tokens locked.
	pub locked_amount: u64,
	pub unlock_time: U40,
	pub voter_hash: hash160::Hash,
}

impl VoteLockState {
	pub const LOCKED_AMOUNT: Field = Field::new("locked_amount", 2, AMOUNT_WIDTH);
	pub const UNLOCK_TIME: Field = Field::new("unlock_time", 10, U40_WIDTH);
	pub const VOTER_HASH: Field = Field::new("voter_hash", 15, HASH_WIDTH);
}

impl Commitment for VoteLockState {
	const LAYOUT: Layout = Layout {
		kind: ResourceKind::VoteLock,
		len: 35,
		fields: &[
			STATUS_FIELD,
			FLAGS_FIELD,
			Self::LOCKED_AMOUNT,
			Self::UNLOCK_TIME,
			Self::VOTER_HASH,
		],
	};

	fn status(&self) -> Status {
		self.status
	}

	fn write_fields(&self, w: &mut CommitmentWriter) {
		w.put_u8(&FLAGS_FIELD, self.flags.bits());
		w.put_u64(&Self::LOCKED_AMOUNT, self.locked_amount);
		w.put_u40(&Self::UNLOCK_TIME, self.unlock_time);
		w.put_hash(&Self::VOTER_HASH, &self.voter_hash);
	}

	fn read_fields(r: &CommitmentReader) -> Result<Self, InvalidCommitment> {
		Ok(VoteLockState {
			status: r.status()?,
			flags: r.flags()?,
			locked_amount: r.u64(&Self::LOCKED_AMOUNT),
			unlock_time: r.u40(&Self::UNLOCK_TIME),
			voter_hash: r.hash(&Self::VOTER_HASH),
		})
	}
}
