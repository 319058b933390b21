//!
//! Persistence of signature sessions.
//!

use std::collections::HashMap;

use anyhow::Context;
use bitcoin::{Transaction, Txid};
use tokio::sync::Mutex;

use covenant::{SignerId, UnsignedTransactionDescriptor};


pub type SessionId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
	Pending,
	Completed,
}

/// One in-flight threshold spend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureSession {
	pub id: SessionId,
	pub resource_id: String,
	/// The signers that have to sign, in selection order.
	pub required_signers: Vec<SignerId>,
	/// The signers that signed so far, in submission order.
	pub collected: Vec<SignerId>,
	/// Required signers that never approved the underlying decision.
	pub fallback_signers: Vec<SignerId>,
	pub descriptor: UnsignedTransactionDescriptor,
	/// The transaction with all unlocking data collected so far.
	pub transaction: Transaction,
	pub status: SessionStatus,
	pub final_txid: Option<Txid>,
	pub created_at: chrono::DateTime<chrono::Utc>,
}

impl SignatureSession {
	pub fn threshold(&self) -> usize {
		self.required_signers.len()
	}

	pub fn remaining(&self) -> Vec<SignerId> {
		self.required_signers.iter()
			.filter(|s| !self.collected.contains(s))
			.cloned()
			.collect()
	}

	pub fn is_fully_signed(&self) -> bool {
		self.collected.len() >= self.threshold()
	}

	pub fn is_completed(&self) -> bool {
		self.status == SessionStatus::Completed
	}
}

/// A session that is about to be created, still without an id.
#[derive(Debug, Clone)]
pub struct NewSession {
	pub resource_id: String,
	pub required_signers: Vec<SignerId>,
	pub fallback_signers: Vec<SignerId>,
	pub first_signer: SignerId,
	pub descriptor: UnsignedTransactionDescriptor,
	pub transaction: Transaction,
}

/// Result of the atomic lookup-or-create of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEntry {
	/// No session existed, this one was created.
	Created(SignatureSession),
	/// A pending session for the resource already existed.
	Pending(SignatureSession),
	/// The resource was already executed with the given tx.
	Executed(Txid),
}

#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
	/// Return the pending session of the resource or create it.
	///
	/// This must be atomic: concurrent calls for the same resource must
	/// never create more than one pending session.
	async fn get_or_create(&self, new: NewSession) -> anyhow::Result<SessionEntry>;

	async fn get(&self, id: SessionId) -> anyhow::Result<Option<SignatureSession>>;

	/// Overwrite a stored session.
	///
	/// Storing a completed session releases the resource's pending slot.
	async fn update(&self, session: &SignatureSession) -> anyhow::Result<()>;

	/// Mark the resource as executed, returns false if it already was.
	async fn mark_executed(&self, resource_id: &str, txid: Txid) -> anyhow::Result<bool>;

	async fn executed(&self, resource_id: &str) -> anyhow::Result<Option<Txid>>;
}

#[derive(Debug, Default)]
struct MemoryState {
	next_id: SessionId,
	sessions: HashMap<SessionId, SignatureSession>,
	pending: HashMap<String, SessionId>,
	executed: HashMap<String, Txid>,
}

/// A [SessionStore] that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
	state: Mutex<MemoryState>,
}

impl MemorySessionStore {
	pub fn new() -> MemorySessionStore {
		MemorySessionStore::default()
	}
}

#[async_trait]
impl SessionStore for MemorySessionStore {
	async fn get_or_create(&self, new: NewSession) -> anyhow::Result<SessionEntry> {
		let mut state = self.state.lock().await;
		if let Some(txid) = state.executed.get(&new.resource_id) {
			return Ok(SessionEntry::Executed(*txid));
		}
		if let Some(id) = state.pending.get(&new.resource_id) {
			let session = state.sessions.get(id)
				.context("pending index points to missing session")?;
			return Ok(SessionEntry::Pending(session.clone()));
		}

		state.next_id += 1;
		let session = SignatureSession {
			id: state.next_id,
			resource_id: new.resource_id,
			required_signers: new.required_signers,
			collected: vec![new.first_signer],
			fallback_signers: new.fallback_signers,
			descriptor: new.descriptor,
			transaction: new.transaction,
			status: SessionStatus::Pending,
			final_txid: None,
			created_at: chrono::Utc::now(),
		};
		state.pending.insert(session.resource_id.clone(), session.id);
		state.sessions.insert(session.id, session.clone());
		Ok(SessionEntry::Created(session))
	}

	async fn get(&self, id: SessionId) -> anyhow::Result<Option<SignatureSession>> {
		Ok(self.state.lock().await.sessions.get(&id).cloned())
	}

	async fn update(&self, session: &SignatureSession) -> anyhow::Result<()> {
		let mut state = self.state.lock().await;
		if !state.sessions.contains_key(&session.id) {
			bail!("session {} was never created", session.id);
		}
		if session.is_completed() {
			state.pending.remove(&session.resource_id);
		}
		state.sessions.insert(session.id, session.clone());
		Ok(())
	}

	async fn mark_executed(&self, resource_id: &str, txid: Txid) -> anyhow::Result<bool> {
		let mut state = self.state.lock().await;
		if state.executed.contains_key(resource_id) {
			return Ok(false);
		}
		state.executed.insert(resource_id.to_owned(), txid);
		Ok(true)
	}

	async fn executed(&self, resource_id: &str) -> anyhow::Result<Option<Txid>> {
		Ok(self.state.lock().await.executed.get(resource_id).copied())
	}
}
