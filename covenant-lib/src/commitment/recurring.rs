
use super::*;


/// State of a recurring payment covenant.
///
/// | field         | offset | width |
/// |---------------|--------|-------|
/// | status        | 0      | 1     |
/// | flags         | 1      | 1     |
/// | total_paid    | 2      | 8     |
/// | next_payment  | 10     | 5     |
/// | payment_count | 15     | 5     |
/// | paused_at     | 20     | 5     |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurringState {
	pub status: Status,
	pub flags: Flags,
	pub total_paid: u64,
	/// Time at which the next payment becomes claimable.
	pub next_payment: U40,
	pub payment_count: U40,
	/// Time at which the resource was paused, zero when not paused.
	pub paused_at: U40,
}

impl RecurringState {
	pub const TOTAL_PAID: Field = Field::new("total_paid", 2, AMOUNT_WIDTH);
	pub const NEXT_PAYMENT: Field = Field::new("next_payment", 10, U40_WIDTH);
	pub const PAYMENT_COUNT: Field = Field::new("payment_count", 15, U40_WIDTH);
	pub const PAUSED_AT: Field = Field::new("paused_at", 20, U40_WIDTH);

	pub fn initial(flags: Flags, first_payment: U40) -> RecurringState {
		RecurringState {
			status: Status::Active,
			flags,
			total_paid: 0,
			next_payment: first_payment,
			payment_count: U40::ZERO,
			paused_at: U40::ZERO,
		}
	}
}

impl Commitment for RecurringState {
	const LAYOUT: Layout = Layout {
		kind: ResourceKind::RecurringPayment,
		len: 25,
		fields: &[
			STATUS_FIELD,
			FLAGS_FIELD,
			Self::TOTAL_PAID,
			Self::NEXT_PAYMENT,
			Self::PAYMENT_COUNT,
			Self::PAUSED_AT,
		],
	};

	fn status(&self) -> Status {
		self.status
	}

	fn write_fields(&self, w: &mut CommitmentWriter) {
		w.put_u8(&FLAGS_FIELD, self.flags.bits());
		w.put_u64(&Self::TOTAL_PAID, self.total_paid);
		w.put_u40(&Self::NEXT_PAYMENT, self.next_payment);
		w.put_u40(&Self::PAYMENT_COUNT, self.payment_count);
		w.put_u40(&Self::PAUSED_AT, self.paused_at);
	}

	fn read_fields(r: &CommitmentReader) -> Result<Self, InvalidCommitment> {
		Ok(RecurringState {
			status: r.status()?,
			flags: r.flags()?,
			total_paid: r.u64(&Self::TOTAL_PAID),
			next_payment: r.u40(&Self::NEXT_PAYMENT),
			payment_count: r.u40(&Self::PAYMENT_COUNT),
			paused_at: r.u40(&Self::PAUSED_AT),
		})
	}
}
