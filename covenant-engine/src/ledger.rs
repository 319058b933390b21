//!
//! The interface to the ledger indexer.
//!
//! Implementations are expected to be thin adapters around an indexer
//! client. The engine never retries a failed call, that is up to the caller.
//!

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bitcoin::{Transaction, Txid};

use covenant::{BlockHeight, CashAddress, Utxo};


#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
	/// The ledger could not be queried, nothing is known about the result.
	#[error("ledger unavailable: {0}")]
	Unavailable(String),
	/// The ledger answered and refused the transaction.
	#[error("transaction rejected by the ledger: {0}")]
	Rejected(String),
}

impl LedgerError {
	pub fn is_unavailable(&self) -> bool {
		matches!(self, LedgerError::Unavailable(_))
	}
}

#[async_trait]
pub trait LedgerProvider: Send + Sync + 'static {
	/// All unspent outputs currently locked to the address.
	async fn unspent_outputs(&self, address: &CashAddress) -> Result<Vec<Utxo>, LedgerError>;

	/// Look up a transaction, [None] if the ledger doesn't know it.
	async fn transaction(&self, txid: Txid) -> Result<Option<Transaction>, LedgerError>;

	/// Submit a fully signed raw transaction.
	async fn broadcast(&self, raw_tx: &[u8]) -> Result<Txid, LedgerError>;

	async fn chain_height(&self) -> Result<BlockHeight, LedgerError>;
}

/// Wraps a [LedgerProvider] and fails every call that takes longer than
/// the timeout with [LedgerError::Unavailable].
pub struct TimeoutLedger {
	inner: Arc<dyn LedgerProvider>,
	timeout: Duration,
}

impl TimeoutLedger {
	pub fn new(inner: Arc<dyn LedgerProvider>, timeout: Duration) -> TimeoutLedger {
		TimeoutLedger { inner, timeout }
	}

	async fn run<T>(
		&self,
		call: &str,
		fut: impl Future<Output = Result<T, LedgerError>> + Send,
	) -> Result<T, LedgerError> {
		match tokio::time::timeout(self.timeout, fut).await {
			Ok(res) => res,
			Err(_) => Err(LedgerError::Unavailable(
				format!("{} timed out after {}", call, humantime::format_duration(self.timeout)),
			)),
		}
	}
}

#[async_trait]
impl LedgerProvider for TimeoutLedger {
	async fn unspent_outputs(&self, address: &CashAddress) -> Result<Vec<Utxo>, LedgerError> {
		self.run("unspent output query", self.inner.unspent_outputs(address)).await
	}

	async fn transaction(&self, txid: Txid) -> Result<Option<Transaction>, LedgerError> {
		self.run("transaction lookup", self.inner.transaction(txid)).await
	}

	async fn broadcast(&self, raw_tx: &[u8]) -> Result<Txid, LedgerError> {
		self.run("broadcast", self.inner.broadcast(raw_tx)).await
	}

	async fn chain_height(&self) -> Result<BlockHeight, LedgerError> {
		self.run("chain height query", self.inner.chain_height()).await
	}
}
