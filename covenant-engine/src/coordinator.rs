//!
//! Collection of signatures for threshold-gated spends.
//!
//! A session is opened by the first signer, who also submits their
//! signature. Every other required signer then submits theirs. Once all
//! required signatures are in, the transaction is broadcast and the
//! resource is marked executed, both exactly once.
//!

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use bitcoin::{Transaction, Txid};
use bitcoin::consensus::encode::serialize;
use tokio::sync::Mutex;

use covenant::{SignerId, UnsignedTransactionDescriptor};
use covenant::tx::InputUnlock;
use covenant_log::slog;

use crate::ledger::{LedgerError, LedgerProvider};
use crate::store::{NewSession, SessionEntry, SessionId, SessionStatus, SessionStore, SignatureSession};


/// The state of a session at the time a request was rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProgress {
	pub remaining: Vec<SignerId>,
	pub collected: Vec<SignerId>,
}

impl SessionProgress {
	pub fn of(session: &SignatureSession) -> SessionProgress {
		SessionProgress {
			remaining: session.remaining(),
			collected: session.collected.clone(),
		}
	}
}

impl fmt::Display for SessionProgress {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "collected: {:?}, remaining: {:?}", self.collected, self.remaining)
	}
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
	#[error("{signer} is not allowed to sign ({progress})")]
	UnauthorizedSigner {
		signer: SignerId,
		progress: SessionProgress,
	},
	#[error("{signer} already signed ({progress})")]
	DuplicateSignature {
		signer: SignerId,
		progress: SessionProgress,
	},
	#[error("no pending signature session with id {session_id}")]
	SessionNotFound {
		session_id: SessionId,
		progress: SessionProgress,
	},
	#[error("resource {resource_id} was already executed in tx {txid}")]
	AlreadyExecuted {
		resource_id: String,
		txid: Txid,
		progress: SessionProgress,
	},
	#[error("transaction submitted by {signer} doesn't match the session ({progress})")]
	TransactionMismatch {
		signer: SignerId,
		progress: SessionProgress,
	},
	#[error("{signer} provided unlocking data for input {input} it doesn't control ({progress})")]
	ForeignUnlockingData {
		signer: SignerId,
		input: usize,
		progress: SessionProgress,
	},
	#[error("session {session_id} is still missing signatures ({progress})")]
	Incomplete {
		session_id: SessionId,
		progress: SessionProgress,
	},
	#[error("broadcast of {txid} was rejected: {reason} ({progress})")]
	BroadcastRejected {
		session_id: SessionId,
		txid: Txid,
		reason: String,
		progress: SessionProgress,
	},
	#[error("ledger unavailable during broadcast: {reason} ({progress})")]
	LedgerUnavailable {
		session_id: SessionId,
		reason: String,
		progress: SessionProgress,
	},
	#[error("a threshold of {threshold} can't be met with {available} eligible signers")]
	InsufficientSigners {
		threshold: usize,
		available: usize,
	},
	#[error(transparent)]
	Store(#[from] anyhow::Error),
}

impl CoordinatorError {
	/// The session state carried by a rejection, if any.
	pub fn progress(&self) -> Option<&SessionProgress> {
		match self {
			CoordinatorError::UnauthorizedSigner { progress, .. } => Some(progress),
			CoordinatorError::DuplicateSignature { progress, .. } => Some(progress),
			CoordinatorError::SessionNotFound { progress, .. } => Some(progress),
			CoordinatorError::AlreadyExecuted { progress, .. } => Some(progress),
			CoordinatorError::TransactionMismatch { progress, .. } => Some(progress),
			CoordinatorError::ForeignUnlockingData { progress, .. } => Some(progress),
			CoordinatorError::Incomplete { progress, .. } => Some(progress),
			CoordinatorError::BroadcastRejected { progress, .. } => Some(progress),
			CoordinatorError::LedgerUnavailable { progress, .. } => Some(progress),
			CoordinatorError::InsufficientSigners { .. } => None,
			CoordinatorError::Store(_) => None,
		}
	}
}

/// Who may co-sign the payout of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerPolicy {
	/// All signers allowed to sign, in order of preference.
	pub eligible: Vec<SignerId>,
	/// Signers that approved the underlying decision.
	pub approvals: BTreeSet<SignerId>,
	/// Number of distinct signers needed.
	pub threshold: usize,
}

/// The required signers chosen for a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerSelection {
	pub required: Vec<SignerId>,
	/// Required signers that never approved the decision.
	pub fallback: Vec<SignerId>,
}

impl SignerPolicy {
	/// Deterministically choose the required signers.
	///
	/// The requester always signs. The other slots go to eligible signers
	/// that approved the decision, in order of preference. If those don't
	/// suffice, other eligible signers fill the remaining slots when
	/// `allow_fallback` is set.
	pub fn select(
		&self,
		requester: &SignerId,
		allow_fallback: bool,
	) -> Result<SignerSelection, CoordinatorError> {
		if !self.eligible.contains(requester) {
			return Err(CoordinatorError::UnauthorizedSigner {
				signer: requester.clone(),
				progress: SessionProgress::default(),
			});
		}

		let threshold = self.threshold.max(1);
		let mut required = vec![requester.clone()];
		let mut fallback = Vec::new();
		let others = || self.eligible.iter().filter(move |s| *s != requester);

		required.extend(others()
			.filter(|s| self.approvals.contains(*s))
			.take(threshold - 1)
			.cloned());
		if required.len() < threshold && allow_fallback {
			let missing = threshold - required.len();
			fallback.extend(others()
				.filter(|s| !self.approvals.contains(*s))
				.take(missing)
				.cloned());
			required.extend(fallback.iter().cloned());
		}

		if required.len() < threshold {
			return Err(CoordinatorError::InsufficientSigners {
				threshold,
				available: required.len(),
			});
		}
		Ok(SignerSelection { required, fallback })
	}
}

/// Copy the unlocking data `signer` provided in `update` into `tx`.
///
/// A signer may only unlock its own inputs and covenant inputs that
/// nobody unlocked yet. Data equal to what `tx` holds already is ignored,
/// so a partially signed tx can be passed on between signers.
///
/// On error, returns the index of the first input the signer may not
/// touch and leaves `tx` unchanged.
fn merge_unlocking_data(
	tx: &mut Transaction,
	descriptor: &UnsignedTransactionDescriptor,
	signer: &SignerId,
	update: &Transaction,
) -> Result<(), usize> {
	let mut changed = Vec::new();
	for (idx, (txin, new)) in tx.input.iter().zip(&update.input).enumerate() {
		if new.script_sig.is_empty() || new.script_sig == txin.script_sig {
			continue;
		}
		let allowed = match descriptor.inputs.get(idx).map(|i| &i.unlock) {
			Some(InputUnlock::Signature { signer: owner }) => owner == signer,
			Some(InputUnlock::Covenant { .. }) => txin.script_sig.is_empty(),
			None => false,
		};
		if !allowed {
			return Err(idx);
		}
		changed.push(idx);
	}
	for idx in changed {
		tx.input[idx].script_sig = update.input[idx].script_sig.clone();
	}
	Ok(())
}

pub struct Coordinator {
	store: Arc<dyn SessionStore>,
	ledger: Arc<dyn LedgerProvider>,
	allow_fallback_signer: bool,
	locks: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl Coordinator {
	pub fn new(
		store: Arc<dyn SessionStore>,
		ledger: Arc<dyn LedgerProvider>,
		allow_fallback_signer: bool,
	) -> Coordinator {
		Coordinator {
			store,
			ledger,
			allow_fallback_signer,
			locks: Mutex::new(HashMap::new()),
		}
	}

	async fn session_lock(&self, id: SessionId) -> Arc<Mutex<()>> {
		self.locks.lock().await.entry(id).or_default().clone()
	}

	/// Drop the lock of a session that is gone or completed.
	///
	/// Must be called with the session lock held. The lock stays if
	/// other requests are waiting for it.
	async fn release_lock(&self, id: SessionId, lock: &Arc<Mutex<()>>) {
		let done = match self.store.get(id).await {
			Ok(Some(session)) => session.is_completed(),
			Ok(None) => true,
			Err(e) => {
				debug!("Keeping lock of session {} after store error: {:#}", id, e);
				false
			},
		};
		if !done {
			return;
		}
		let mut locks = self.locks.lock().await;
		// one reference in the map, one held by the caller
		if Arc::strong_count(lock) == 2 {
			locks.remove(&id);
		}
	}

	pub async fn session(&self, id: SessionId) -> Result<Option<SignatureSession>, CoordinatorError> {
		Ok(self.store.get(id).await?)
	}

	/// Open the session for a resource with the signature of `requester`.
	///
	/// If a pending session for the resource exists already, the signature
	/// is submitted to that session instead.
	pub async fn open(
		&self,
		resource_id: &str,
		requester: &SignerId,
		policy: &SignerPolicy,
		descriptor: UnsignedTransactionDescriptor,
		signed_tx: Transaction,
	) -> Result<SignatureSession, CoordinatorError> {
		let selection = policy.select(requester, self.allow_fallback_signer)?;
		if !descriptor.matches(&signed_tx) {
			return Err(CoordinatorError::TransactionMismatch {
				signer: requester.clone(),
				progress: SessionProgress::default(),
			});
		}

		let mut transaction = descriptor.to_transaction();
		merge_unlocking_data(&mut transaction, &descriptor, requester, &signed_tx)
			.map_err(|input| CoordinatorError::ForeignUnlockingData {
				signer: requester.clone(),
				input,
				progress: SessionProgress::default(),
			})?;
		let new = NewSession {
			resource_id: resource_id.to_owned(),
			required_signers: selection.required,
			fallback_signers: selection.fallback,
			first_signer: requester.clone(),
			descriptor,
			transaction,
		};

		match self.store.get_or_create(new).await? {
			SessionEntry::Created(session) => {
				slog!(SessionCreated,
					session_id: session.id,
					resource_id: session.resource_id.clone(),
					required_signers: session.required_signers.clone(),
					threshold: session.threshold(),
				);
				for signer in &session.fallback_signers {
					slog!(FallbackSignerSelected,
						session_id: session.id,
						resource_id: session.resource_id.clone(),
						signer: signer.clone(),
					);
				}

				if session.is_fully_signed() {
					let id = session.id;
					let lock = self.session_lock(id).await;
					let _guard = lock.lock().await;
					let res = self.finalize(session).await;
					self.release_lock(id, &lock).await;
					res
				} else {
					Ok(session)
				}
			},
			SessionEntry::Pending(session) => {
				debug!("Resource {} already has pending session {}", resource_id, session.id);
				self.submit(session.id, requester, signed_tx).await
			},
			SessionEntry::Executed(txid) => Err(CoordinatorError::AlreadyExecuted {
				resource_id: resource_id.to_owned(),
				txid,
				progress: SessionProgress::default(),
			}),
		}
	}

	/// Submit the signature of `signer` to a pending session.
	pub async fn submit(
		&self,
		session_id: SessionId,
		signer: &SignerId,
		signed_tx: Transaction,
	) -> Result<SignatureSession, CoordinatorError> {
		let lock = self.session_lock(session_id).await;
		let _guard = lock.lock().await;
		let res = self.submit_locked(session_id, signer, signed_tx).await;
		self.release_lock(session_id, &lock).await;
		res
	}

	async fn submit_locked(
		&self,
		session_id: SessionId,
		signer: &SignerId,
		signed_tx: Transaction,
	) -> Result<SignatureSession, CoordinatorError> {
		let mut session = self.store.get(session_id).await?
			.ok_or_else(|| CoordinatorError::SessionNotFound {
				session_id,
				progress: SessionProgress::default(),
			})?;
		let progress = SessionProgress::of(&session);

		if session.collected.contains(signer) {
			return Err(CoordinatorError::DuplicateSignature { signer: signer.clone(), progress });
		}
		if session.status == SessionStatus::Completed {
			return Err(CoordinatorError::SessionNotFound { session_id, progress });
		}
		if !session.required_signers.contains(signer) {
			return Err(CoordinatorError::UnauthorizedSigner { signer: signer.clone(), progress });
		}
		if !session.descriptor.matches(&signed_tx) {
			return Err(CoordinatorError::TransactionMismatch { signer: signer.clone(), progress });
		}

		if let Err(input) = merge_unlocking_data(
			&mut session.transaction, &session.descriptor, signer, &signed_tx,
		) {
			return Err(CoordinatorError::ForeignUnlockingData { signer: signer.clone(), input, progress });
		}
		session.collected.push(signer.clone());
		self.store.update(&session).await?;
		slog!(SignatureCollected,
			session_id,
			signer: signer.clone(),
			collected: session.collected.len(),
			threshold: session.threshold(),
		);

		if session.is_fully_signed() {
			self.finalize(session).await
		} else {
			Ok(session)
		}
	}

	/// Broadcast again a fully signed session whose broadcast failed.
	pub async fn retry_broadcast(
		&self,
		session_id: SessionId,
	) -> Result<SignatureSession, CoordinatorError> {
		let lock = self.session_lock(session_id).await;
		let _guard = lock.lock().await;
		let res = self.retry_locked(session_id).await;
		self.release_lock(session_id, &lock).await;
		res
	}

	async fn retry_locked(&self, session_id: SessionId) -> Result<SignatureSession, CoordinatorError> {
		let session = self.store.get(session_id).await?
			.ok_or_else(|| CoordinatorError::SessionNotFound {
				session_id,
				progress: SessionProgress::default(),
			})?;
		let progress = SessionProgress::of(&session);
		if let Some(txid) = session.final_txid {
			return Err(CoordinatorError::AlreadyExecuted {
				resource_id: session.resource_id,
				txid,
				progress,
			});
		}
		if !session.is_fully_signed() {
			return Err(CoordinatorError::Incomplete { session_id, progress });
		}
		self.finalize(session).await
	}

	/// Broadcast and complete a fully signed session.
	///
	/// Must be called with the session lock held.
	async fn finalize(
		&self,
		mut session: SignatureSession,
	) -> Result<SignatureSession, CoordinatorError> {
		let raw_tx = serialize(&session.transaction);
		let txid = session.transaction.compute_txid();

		match self.ledger.broadcast(&raw_tx).await {
			Ok(_) => {},
			Err(LedgerError::Rejected(reason)) => {
				slog!(BroadcastRejected, session_id: session.id, txid, error: reason.clone());
				return Err(CoordinatorError::BroadcastRejected {
					session_id: session.id,
					txid,
					reason,
					progress: SessionProgress::of(&session),
				});
			},
			Err(LedgerError::Unavailable(reason)) => {
				warn!("Ledger unavailable broadcasting tx {} of session {}: {}",
					txid, session.id, reason,
				);
				return Err(CoordinatorError::LedgerUnavailable {
					session_id: session.id,
					reason,
					progress: SessionProgress::of(&session),
				});
			},
		}

		if !self.store.mark_executed(&session.resource_id, txid).await? {
			let executed = self.store.executed(&session.resource_id).await?.unwrap_or(txid);
			error!("Resource {} of session {} was executed outside this session in tx {}",
				session.resource_id, session.id, executed,
			);
			return Err(CoordinatorError::AlreadyExecuted {
				resource_id: session.resource_id.clone(),
				txid: executed,
				progress: SessionProgress::of(&session),
			});
		}

		session.status = SessionStatus::Completed;
		session.final_txid = Some(txid);
		self.store.update(&session).await?;
		slog!(SessionCompleted, session_id: session.id, resource_id: session.resource_id.clone(), txid);
		Ok(session)
	}
}
