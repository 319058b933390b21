//!
//! The rule table mapping an operation on a resource to its next state.
//!
//! Status changes are always derived here. Callers request an operation,
//! they never set a status directly.
//!

use bitcoin::ScriptBuf;
use bitcoin::hashes::sha256;

use crate::Timestamp;
use crate::address::p2pkh_script;
use crate::commitment::{
	AirdropState, AnyCommitment, Flags, RecurringState, ResourceKind, Status, U40, VestingState,
	VoteLockState,
};
use crate::merkle;
use crate::terms::{AirdropTerms, RecurringTerms, ResourceTerms, VestingTerms, VoteLockTerms};


#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
	#[error("operation {op} is not supported for {kind} resources")]
	Unsupported {
		kind: ResourceKind,
		op: &'static str,
	},
	#[error("terms are for {terms} but the state is {state}")]
	KindMismatch {
		terms: ResourceKind,
		state: ResourceKind,
	},
	#[error("resource is {0:?}, operation not allowed")]
	InvalidStatus(Status),
	#[error("no payment available before {next_payment}, now is {now}")]
	NoPaymentAvailable {
		next_payment: u64,
		now: Timestamp,
	},
	#[error("milestone {index} unlocks at {unlock_time}, now is {now}")]
	MilestoneNotReached {
		index: u64,
		unlock_time: Timestamp,
		now: Timestamp,
	},
	#[error("nothing left to release")]
	Exhausted,
	#[error("resource is not cancelable")]
	NotCancelable,
	#[error("resource is not pausable")]
	NotPausable,
	#[error("operation not allowed before {until}, now is {now}")]
	TooEarly {
		until: Timestamp,
		now: Timestamp,
	},
	#[error("claims closed at {expiry}, now is {now}")]
	Expired {
		expiry: Timestamp,
		now: Timestamp,
	},
	#[error("allocation proof does not match the committed root")]
	InvalidProof,
	#[error("claim of {requested} exceeds the remaining {remaining}")]
	ClaimExceedsBalance {
		requested: u64,
		remaining: u64,
	},
	#[error("amount must be positive")]
	ZeroAmount,
	#[error("numeric field overflow")]
	Overflow,
}

/// An operation requested on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum Operation {
	/// Release the next vesting milestone.
	Release { now: Timestamp },
	/// Make the next recurring payment.
	Pay { now: Timestamp },
	Pause { now: Timestamp },
	Resume { now: Timestamp },
	/// Return the remaining balance to the owner and end the resource.
	Cancel,
	/// Add tokens to a vote-lock.
	IncreaseLock { amount: u64 },
	/// Return all locked tokens to the voter.
	Unlock { now: Timestamp },
	Claim {
		recipient: ScriptBuf,
		amount: u64,
		proof: Vec<sha256::Hash>,
		now: Timestamp,
	},
	/// Return unclaimed funds to the sender after expiry.
	Reclaim { now: Timestamp },
}

impl Operation {
	/// Name of the covenant function unlocking the state input.
	pub fn function(&self) -> &'static str {
		match self {
			Operation::Release { .. } => "release",
			Operation::Pay { .. } => "pay",
			Operation::Pause { .. } => "pause",
			Operation::Resume { .. } => "resume",
			Operation::Cancel => "cancel",
			Operation::IncreaseLock { .. } => "increase",
			Operation::Unlock { .. } => "unlock",
			Operation::Claim { .. } => "claim",
			Operation::Reclaim { .. } => "reclaim",
		}
	}

	/// The time the tx must be locked to, if time-gated.
	pub fn lock_time(&self) -> Option<Timestamp> {
		match self {
			Operation::Release { now } | Operation::Pay { now } | Operation::Pause { now }
				| Operation::Resume { now } | Operation::Unlock { now }
				| Operation::Claim { now, .. } | Operation::Reclaim { now } => Some(*now),
			Operation::Cancel | Operation::IncreaseLock { .. } => None,
		}
	}
}

/// An amount paid out of the covenant balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
	pub script_pubkey: ScriptBuf,
	pub amount: u64,
}

/// The outcome of applying an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
	pub function: &'static str,
	/// The continuing state, or [None] if the state output is burned.
	pub next_state: Option<AnyCommitment>,
	/// Payouts from the covenant balance.
	pub payouts: Vec<Payout>,
	/// Amount added to the covenant balance by the caller.
	pub deposit: u64,
	/// Where the remaining balance goes when the state is burned.
	pub sweep_to: Option<ScriptBuf>,
	pub lock_time: Option<Timestamp>,
}

impl Transition {
	fn new(op: &Operation) -> Transition {
		Transition {
			function: op.function(),
			next_state: None,
			payouts: Vec::new(),
			deposit: 0,
			sweep_to: None,
			lock_time: op.lock_time(),
		}
	}

	fn continuing(mut self, state: impl Into<AnyCommitment>) -> Transition {
		self.next_state = Some(state.into());
		self
	}

	fn pay(mut self, script_pubkey: ScriptBuf, amount: u64) -> Transition {
		self.payouts.push(Payout { script_pubkey, amount });
		self
	}

	fn burn(mut self, sweep_to: ScriptBuf) -> Transition {
		self.next_state = None;
		self.sweep_to = Some(sweep_to);
		self
	}

	pub fn total_payout(&self) -> u64 {
		self.payouts.iter().map(|p| p.amount).sum()
	}
}

fn u40(v: u64) -> Result<U40, TransitionError> {
	U40::new(v).ok_or(TransitionError::Overflow)
}

fn require_status(actual: Status, required: Status) -> Result<(), TransitionError> {
	if actual != required {
		return Err(TransitionError::InvalidStatus(actual));
	}
	Ok(())
}

fn cancel(flags: Flags, status: Status, owner: ScriptBuf, op: &Operation) -> Result<Transition, TransitionError> {
	if !flags.contains(Flags::CANCELABLE) {
		return Err(TransitionError::NotCancelable);
	}
	if status.is_terminal() {
		return Err(TransitionError::InvalidStatus(status));
	}
	Ok(Transition::new(op).burn(owner))
}

/// Apply `op` to `state` under `terms`.
pub fn apply(
	terms: &ResourceTerms,
	state: &AnyCommitment,
	op: &Operation,
) -> Result<Transition, TransitionError> {
	match (terms, state) {
		(ResourceTerms::Vesting(t), AnyCommitment::Vesting(s)) => vesting(t, s, op),
		(ResourceTerms::RecurringPayment(t), AnyCommitment::RecurringPayment(s)) => recurring(t, s, op),
		(ResourceTerms::VoteLock(t), AnyCommitment::VoteLock(s)) => vote_lock(t, s, op),
		(ResourceTerms::Airdrop(t), AnyCommitment::Airdrop(s)) => airdrop(t, s, op),
		(t, s) => Err(TransitionError::KindMismatch { terms: t.kind(), state: s.kind() }),
	}
}

fn vesting(t: &VestingTerms, s: &VestingState, op: &Operation) -> Result<Transition, TransitionError> {
	match *op {
		Operation::Release { now } => {
			require_status(s.status, Status::Active)?;
			let index = s.milestone_index.get();
			if index >= t.milestone_count || s.total_released >= t.total_amount {
				return Err(TransitionError::Exhausted);
			}
			let unlock_time = t.unlock_time(index);
			if now < unlock_time {
				return Err(TransitionError::MilestoneNotReached { index, unlock_time, now });
			}
			let amount = t.milestone_amount(index, s.total_released);

			let mut next = s.clone();
			next.total_released = s.total_released.checked_add(amount).ok_or(TransitionError::Overflow)?;
			next.milestone_index = u40(index + 1)?;
			next.last_release = u40(now)?;
			if next.total_released >= t.total_amount {
				next.status = Status::Completed;
			}
			Ok(Transition::new(op).pay(p2pkh_script(&s.recipient_hash), amount).continuing(next))
		},
		Operation::Cancel => cancel(s.flags, s.status, p2pkh_script(&t.sender), op),
		_ => Err(TransitionError::Unsupported { kind: ResourceKind::Vesting, op: op.function() }),
	}
}

fn recurring(t: &RecurringTerms, s: &RecurringState, op: &Operation) -> Result<Transition, TransitionError> {
	match *op {
		Operation::Pay { now } => {
			require_status(s.status, Status::Active)?;
			if now < s.next_payment.get() {
				return Err(TransitionError::NoPaymentAvailable {
					next_payment: s.next_payment.get(),
					now,
				});
			}
			let remaining = t.total_amount.saturating_sub(s.total_paid);
			if remaining == 0 {
				return Err(TransitionError::Exhausted);
			}
			let amount = t.amount_per_payment.min(remaining);

			// one interval per payment, missed payments are not caught up
			let mut next = s.clone();
			next.total_paid += amount;
			next.next_payment = s.next_payment.checked_add(t.interval).ok_or(TransitionError::Overflow)?;
			next.payment_count = s.payment_count.checked_add(1).ok_or(TransitionError::Overflow)?;
			if next.total_paid >= t.total_amount {
				next.status = Status::Completed;
			}
			Ok(Transition::new(op).pay(p2pkh_script(&t.recipient), amount).continuing(next))
		},
		Operation::Pause { now } => {
			if !s.flags.contains(Flags::PAUSABLE) {
				return Err(TransitionError::NotPausable);
			}
			require_status(s.status, Status::Active)?;
			let mut next = s.clone();
			next.status = Status::Paused;
			next.paused_at = u40(now)?;
			Ok(Transition::new(op).continuing(next))
		},
		Operation::Resume { now } => {
			require_status(s.status, Status::Paused)?;
			let paused_for = now.saturating_sub(s.paused_at.get());
			let mut next = s.clone();
			next.status = Status::Active;
			next.paused_at = U40::ZERO;
			next.next_payment = s.next_payment.checked_add(paused_for).ok_or(TransitionError::Overflow)?;
			Ok(Transition::new(op).continuing(next))
		},
		Operation::Cancel => cancel(s.flags, s.status, p2pkh_script(&t.sender), op),
		_ => Err(TransitionError::Unsupported { kind: ResourceKind::RecurringPayment, op: op.function() }),
	}
}

fn vote_lock(t: &VoteLockTerms, s: &VoteLockState, op: &Operation) -> Result<Transition, TransitionError> {
	match *op {
		Operation::IncreaseLock { amount } => {
			require_status(s.status, Status::Active)?;
			if amount == 0 {
				return Err(TransitionError::ZeroAmount);
			}
			let mut next = s.clone();
			next.locked_amount = s.locked_amount.checked_add(amount).ok_or(TransitionError::Overflow)?;
			let mut ret = Transition::new(op).continuing(next);
			ret.deposit = amount;
			Ok(ret)
		},
		Operation::Unlock { now } => {
			if s.status.is_terminal() {
				return Err(TransitionError::InvalidStatus(s.status));
			}
			if now < s.unlock_time.get() {
				return Err(TransitionError::TooEarly { until: s.unlock_time.get(), now });
			}
			Ok(Transition::new(op).burn(p2pkh_script(&t.voter)))
		},
		_ => Err(TransitionError::Unsupported { kind: ResourceKind::VoteLock, op: op.function() }),
	}
}

fn airdrop(t: &AirdropTerms, s: &AirdropState, op: &Operation) -> Result<Transition, TransitionError> {
	match *op {
		Operation::Claim { ref recipient, amount, ref proof, now } => {
			require_status(s.status, Status::Active)?;
			if now >= t.expiry {
				return Err(TransitionError::Expired { expiry: t.expiry, now });
			}
			if amount == 0 {
				return Err(TransitionError::ZeroAmount);
			}
			if !merkle::verify(recipient, amount, proof, t.merkle_root) {
				return Err(TransitionError::InvalidProof);
			}
			let remaining = t.total_amount.saturating_sub(s.total_claimed);
			if amount > remaining {
				return Err(TransitionError::ClaimExceedsBalance { requested: amount, remaining });
			}

			let mut next = s.clone();
			next.total_claimed += amount;
			next.claim_count = s.claim_count.checked_add(1).ok_or(TransitionError::Overflow)?;
			next.last_claim = u40(now)?;
			if next.total_claimed >= t.total_amount {
				next.status = Status::Completed;
			}
			Ok(Transition::new(op).pay(recipient.clone(), amount).continuing(next))
		},
		Operation::Reclaim { now } => {
			if now < t.expiry {
				return Err(TransitionError::TooEarly { until: t.expiry, now });
			}
			if s.status == Status::Cancelled {
				return Err(TransitionError::InvalidStatus(s.status));
			}
			Ok(Transition::new(op).burn(p2pkh_script(&t.sender)))
		},
		Operation::Cancel => cancel(s.flags, s.status, p2pkh_script(&t.sender), op),
		_ => Err(TransitionError::Unsupported { kind: ResourceKind::Airdrop, op: op.function() }),
	}
}

/// The amount the next operation could pay out at time `now`.
///
/// Zero means nothing can be paid yet.
pub fn claimable_at(terms: &ResourceTerms, state: &AnyCommitment, now: Timestamp) -> u64 {
	match (terms, state) {
		(ResourceTerms::Vesting(t), AnyCommitment::Vesting(s)) => {
			let index = s.milestone_index.get();
			if s.status != Status::Active || index >= t.milestone_count || now < t.unlock_time(index) {
				0
			} else {
				t.milestone_amount(index, s.total_released)
			}
		},
		(ResourceTerms::RecurringPayment(t), AnyCommitment::RecurringPayment(s)) => {
			if s.status != Status::Active || now < s.next_payment.get() {
				0
			} else {
				t.amount_per_payment.min(t.total_amount.saturating_sub(s.total_paid))
			}
		},
		(ResourceTerms::VoteLock(_), AnyCommitment::VoteLock(s)) => {
			if s.status.is_terminal() || now < s.unlock_time.get() {
				0
			} else {
				s.locked_amount
			}
		},
		(ResourceTerms::Airdrop(t), AnyCommitment::Airdrop(s)) => {
			if s.status != Status::Active || now >= t.expiry {
				0
			} else {
				t.total_amount.saturating_sub(s.total_claimed)
			}
		},
		_ => 0,
	}
}

#[cfg(test)]
mod test {
	use crate::merkle::{Allocation, AllocationTree};
	use crate::terms::MilestoneSchedule;
	use crate::test::dummy::{dummy_hash, dummy_recurring_terms};

	use super::*;

	fn vesting_terms() -> VestingTerms {
		let schedule = MilestoneSchedule::normalize(&[10, 20, 30], 100).unwrap();
		VestingTerms::from_schedule(dummy_hash(1), dummy_hash(2), schedule, 1_000, Flags::CANCELABLE, None)
	}

	#[test]
	fn vesting_releases_steps_then_completes() {
		let terms = ResourceTerms::from(vesting_terms());
		let mut state = terms.initial_state().unwrap();

		let err = apply(&terms, &state, &Operation::Release { now: 1_099 }).unwrap_err();
		assert_eq!(err, TransitionError::MilestoneNotReached { index: 0, unlock_time: 1_100, now: 1_099 });
		assert_eq!(claimable_at(&terms, &state, 1_099), 0);
		assert_eq!(claimable_at(&terms, &state, 1_100), 20);

		let mut paid = 0;
		for (i, now) in [1_100, 1_250, 5_000].into_iter().enumerate() {
			let t = apply(&terms, &state, &Operation::Release { now }).unwrap();
			assert_eq!(t.function, "release");
			assert_eq!(t.lock_time, Some(now));
			paid += t.total_payout();
			state = t.next_state.unwrap();
			match state {
				AnyCommitment::Vesting(ref s) => {
					assert_eq!(s.milestone_index.get(), i as u64 + 1);
					assert_eq!(s.total_released, paid);
				},
				_ => panic!("wrong kind"),
			}
		}
		assert_eq!(paid, 60);
		assert_eq!(state.status(), Status::Completed);
		assert_eq!(
			apply(&terms, &state, &Operation::Release { now: 9_999 }).unwrap_err(),
			TransitionError::InvalidStatus(Status::Completed),
		);
	}

	#[test]
	fn recurring_pay_one_interval() {
		let terms = ResourceTerms::from(dummy_recurring_terms());
		let state = terms.initial_state().unwrap();
		let start = match terms {
			ResourceTerms::RecurringPayment(ref t) => t.start,
			_ => unreachable!(),
		};

		// next payment ten minutes in the future
		let now = start - 600;
		assert_eq!(claimable_at(&terms, &state, now), 0);
		assert_eq!(
			apply(&terms, &state, &Operation::Pay { now }).unwrap_err(),
			TransitionError::NoPaymentAvailable { next_payment: start, now },
		);

		// far past several intervals, still only one interval advance
		let now = start + 10 * 3_600;
		let t = apply(&terms, &state, &Operation::Pay { now }).unwrap();
		match t.next_state.unwrap() {
			AnyCommitment::RecurringPayment(s) => {
				assert_eq!(s.next_payment.get(), start + 3_600);
				assert_eq!(s.payment_count.get(), 1);
				assert_eq!(s.total_paid, 5_000);
			},
			_ => panic!("wrong kind"),
		}
	}

	#[test]
	fn recurring_pause_resume() {
		let terms = ResourceTerms::from(dummy_recurring_terms());
		let state = terms.initial_state().unwrap();
		let start = match state {
			AnyCommitment::RecurringPayment(ref s) => s.next_payment.get(),
			_ => unreachable!(),
		};

		let paused = apply(&terms, &state, &Operation::Pause { now: start - 100 }).unwrap()
			.next_state.unwrap();
		assert_eq!(paused.status(), Status::Paused);
		assert_eq!(
			apply(&terms, &paused, &Operation::Pay { now: start + 1 }).unwrap_err(),
			TransitionError::InvalidStatus(Status::Paused),
		);
		assert_eq!(claimable_at(&terms, &paused, start + 1), 0);

		let resumed = apply(&terms, &paused, &Operation::Resume { now: start + 400 }).unwrap()
			.next_state.unwrap();
		match resumed {
			AnyCommitment::RecurringPayment(ref s) => {
				assert_eq!(s.status, Status::Active);
				assert_eq!(s.paused_at, U40::ZERO);
				assert_eq!(s.next_payment.get(), start + 500);
			},
			_ => panic!("wrong kind"),
		}
	}

	#[test]
	fn cancel_requires_flag() {
		let mut vesting = vesting_terms();
		let terms = ResourceTerms::from(vesting.clone());
		let state = terms.initial_state().unwrap();
		let t = apply(&terms, &state, &Operation::Cancel).unwrap();
		assert!(t.next_state.is_none());
		assert_eq!(t.sweep_to, Some(p2pkh_script(&dummy_hash(2))));

		vesting.flags = Flags::NONE;
		let terms = ResourceTerms::from(vesting);
		let state = terms.initial_state().unwrap();
		assert_eq!(apply(&terms, &state, &Operation::Cancel).unwrap_err(), TransitionError::NotCancelable);
		assert!(matches!(
			apply(&terms, &state, &Operation::Pay { now: 0 }),
			Err(TransitionError::Unsupported { .. }),
		));
	}

	#[test]
	fn airdrop_claims() {
		let allocs = (0..3).map(|i| Allocation::new(p2pkh_script(&dummy_hash(i)), 100)).collect::<Vec<_>>();
		let tree = AllocationTree::build(allocs.clone()).unwrap();
		let terms = ResourceTerms::from(AirdropTerms {
			sender: dummy_hash(9),
			merkle_root: tree.root(),
			total_amount: tree.total_amount(),
			expiry: 10_000,
			flags: Flags::NONE,
			token: None,
		});
		let state = terms.initial_state().unwrap();

		let claim = Operation::Claim {
			recipient: allocs[1].recipient.clone(),
			amount: 100,
			proof: tree.proof(1).unwrap(),
			now: 5_000,
		};
		let t = apply(&terms, &state, &claim).unwrap();
		assert_eq!(t.payouts, vec![Payout { script_pubkey: allocs[1].recipient.clone(), amount: 100 }]);

		let forged = Operation::Claim {
			recipient: allocs[1].recipient.clone(),
			amount: 200,
			proof: tree.proof(1).unwrap(),
			now: 5_000,
		};
		assert_eq!(apply(&terms, &state, &forged).unwrap_err(), TransitionError::InvalidProof);

		assert_eq!(
			apply(&terms, &state, &Operation::Reclaim { now: 9_999 }).unwrap_err(),
			TransitionError::TooEarly { until: 10_000, now: 9_999 },
		);
		let t = apply(&terms, &state, &Operation::Reclaim { now: 10_000 }).unwrap();
		assert_eq!(t.sweep_to, Some(p2pkh_script(&dummy_hash(9))));
	}

	#[test]
	fn vote_lock_increase_and_unlock() {
		let terms = ResourceTerms::from(VoteLockTerms {
			voter: dummy_hash(4),
			token: crate::test::dummy::dummy_category(1),
			unlock_time: 2_000,
			flags: Flags::USES_TOKEN,
		});
		let state = terms.initial_state().unwrap();
		let t = apply(&terms, &state, &Operation::IncreaseLock { amount: 70 }).unwrap();
		assert_eq!(t.deposit, 70);
		assert_eq!(t.lock_time, None);
		let state = t.next_state.unwrap();
		assert_eq!(claimable_at(&terms, &state, 2_000), 70);

		assert!(matches!(
			apply(&terms, &state, &Operation::Unlock { now: 1_999 }),
			Err(TransitionError::TooEarly { .. }),
		));
		let t = apply(&terms, &state, &Operation::Unlock { now: 2_000 }).unwrap();
		assert!(t.next_state.is_none());
	}
}
