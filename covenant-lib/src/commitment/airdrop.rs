
use super::*;


/// State of a claim-based distribution covenant.
///
/// | field         | offset | width |
/// |---------------|--------|-------|
/// | status        | 0      | 1     |
/// | flags         | 1      | 1     |
/// | total_claimed | 2      | 8     |
/// | claim_count   | 10     | 5     |
/// | last_claim    | 15     | 5     |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirdropState {
	pub status: Status,
	pub flags: Flags,
	pub total_claimed: u64,
	pub claim_count: U40,
	pub last_claim: U40,
}

impl AirdropState {
	pub const TOTAL_CLAIMED: Field = Field::new("total_claimed", 2, AMOUNT_WIDTH);
	pub const CLAIM_COUNT: Field = Field::new("claim_count", 10, U40_WIDTH);
	pub const LAST_CLAIM: Field = Field::new("last_claim", 15, U40_WIDTH);
}

impl Commitment for AirdropState {
	const LAYOUT: Layout = Layout {
		kind: ResourceKind::Airdrop,
		len: 20,
		fields: &[
			STATUS_FIELD,
			FLAGS_FIELD,
			Self::TOTAL_CLAIMED,
			Self::CLAIM_COUNT,
			Self::LAST_CLAIM,
		],
	};

	fn status(&self) -> Status {
		self.status
	}

	fn write_fields(&self, w: &mut CommitmentWriter) {
		w.put_u8(&FLAGS_FIELD, self.flags.bits());
		w.put_u64(&Self::TOTAL_CLAIMED, self.total_claimed);
		w.put_u40(&Self::CLAIM_COUNT, self.claim_count);
		w.put_u40(&Self::LAST_CLAIM, self.last_claim);
	}

	fn read_fields(r: &CommitmentReader) -> Result<Self, InvalidCommitment> {
		Ok(AirdropState {
			status: r.status()?,
			flags: r.flags()?,
			total_claimed: r.u64(&Self::TOTAL_CLAIMED),
			claim_count: r.u40(&Self::CLAIM_COUNT),
			last_claim: r.u40(&Self::LAST_CLAIM),
		})
	}
}

#[cfg(test)]
mod test {
	use bitcoin::hex::FromHex;

	use super::*;

	#[test]
	fn airdrop_known_encoding() {
		let state = AirdropState {
			status: Status::Completed,
			flags: Flags::CANCELABLE,
			total_claimed: 75_000,
			claim_count: U40::new(3).unwrap(),
			last_claim: U40::new(1_767_484_800).unwrap(),
		};
		let expected = Vec::<u8>::from_hex(concat!(
			"03", "01", "f824010000000000", "0300000000", "80ad596900",
		)).unwrap();
		assert_eq!(expected.len(), 20);
		assert_eq!(state.encode(), expected);
		assert_eq!(AirdropState::decode(&expected).unwrap(), state);
		assert_eq!(AirdropState::decode_hex(&state.encode_hex()).unwrap(), state);

		let mut longer = expected.clone();
		longer.push(0);
		assert!(AirdropState::decode(&longer).is_err());
	}
}
