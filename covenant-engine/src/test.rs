//! Test helpers for the engine.
//!
//! Only available with the test-util feature.

use std::collections::HashMap;
use std::sync::Mutex;

use bitcoin::{Amount, ScriptBuf, Transaction, Txid};
use bitcoin::consensus::encode::deserialize;
use bitcoin::script::PushBytesBuf;

use covenant::{BlockHeight, CashAddress, Utxo, UnsignedTransactionDescriptor};
use covenant::address::{p2pkh_script, p2sh32_script};
use covenant::test::dummy::{dummy_hash, dummy_redeem_script, dummy_utxo};
use covenant::tx::{DescriptorInput, DescriptorOutput, InputUnlock};

use crate::ledger::{LedgerError, LedgerProvider};


#[derive(Debug, Default)]
struct MockState {
	utxos: HashMap<String, Vec<Utxo>>,
	transactions: HashMap<Txid, Transaction>,
	broadcasts: Vec<Transaction>,
	utxo_queries: usize,
	height: BlockHeight,
	unavailable: bool,
	reject: Option<String>,
}

/// An in-memory ledger that records broadcasts and can be told to fail.
#[derive(Debug, Default)]
pub struct MockLedger {
	state: Mutex<MockState>,
}

impl MockLedger {
	pub fn new() -> MockLedger {
		MockLedger::default()
	}

	pub fn set_utxos(&self, address: &CashAddress, utxos: Vec<Utxo>) {
		self.state.lock().unwrap().utxos.insert(address.to_string(), utxos);
	}

	pub fn add_transaction(&self, tx: Transaction) {
		self.state.lock().unwrap().transactions.insert(tx.compute_txid(), tx);
	}

	pub fn set_height(&self, height: BlockHeight) {
		self.state.lock().unwrap().height = height;
	}

	/// Make every call fail with [LedgerError::Unavailable].
	pub fn set_unavailable(&self, unavailable: bool) {
		self.state.lock().unwrap().unavailable = unavailable;
	}

	/// Reject all broadcasts with the given reason, [None] to accept again.
	pub fn reject_broadcasts(&self, reason: Option<&str>) {
		self.state.lock().unwrap().reject = reason.map(String::from);
	}

	pub fn broadcasts(&self) -> Vec<Transaction> {
		self.state.lock().unwrap().broadcasts.clone()
	}

	/// The number of times unspent outputs were queried.
	pub fn utxo_queries(&self) -> usize {
		self.state.lock().unwrap().utxo_queries
	}

	fn check_available(state: &MockState) -> Result<(), LedgerError> {
		if state.unavailable {
			Err(LedgerError::Unavailable("mock ledger is down".into()))
		} else {
			Ok(())
		}
	}
}

#[async_trait]
impl LedgerProvider for MockLedger {
	async fn unspent_outputs(&self, address: &CashAddress) -> Result<Vec<Utxo>, LedgerError> {
		let mut state = self.state.lock().unwrap();
		MockLedger::check_available(&state)?;
		state.utxo_queries += 1;
		Ok(state.utxos.get(&address.to_string()).cloned().unwrap_or_default())
	}

	async fn transaction(&self, txid: Txid) -> Result<Option<Transaction>, LedgerError> {
		let state = self.state.lock().unwrap();
		MockLedger::check_available(&state)?;
		Ok(state.transactions.get(&txid).cloned())
	}

	async fn broadcast(&self, raw_tx: &[u8]) -> Result<Txid, LedgerError> {
		let mut state = self.state.lock().unwrap();
		MockLedger::check_available(&state)?;
		if let Some(ref reason) = state.reject {
			return Err(LedgerError::Rejected(reason.clone()));
		}
		let tx = deserialize::<Transaction>(raw_tx)
			.map_err(|e| LedgerError::Rejected(format!("invalid tx: {}", e)))?;
		let txid = tx.compute_txid();
		state.transactions.insert(txid, tx.clone());
		state.broadcasts.push(tx);
		Ok(txid)
	}

	async fn chain_height(&self) -> Result<BlockHeight, LedgerError> {
		let state = self.state.lock().unwrap();
		MockLedger::check_available(&state)?;
		Ok(state.height)
	}
}

/// A covenant release paying 49k sat to a p2pkh, with one signer input
/// for each of the given signers.
pub fn dummy_descriptor(signers: &[&str]) -> UnsignedTransactionDescriptor {
	let redeem_script = dummy_redeem_script();
	let mut inputs = vec![DescriptorInput {
		utxo: dummy_utxo(1, 50_000),
		locking_script: p2sh32_script(&redeem_script),
		unlock: InputUnlock::Covenant { function: "release".into(), redeem_script },
	}];
	for (i, signer) in signers.iter().enumerate() {
		inputs.push(DescriptorInput {
			utxo: dummy_utxo(10 + i as u8, 1_000),
			locking_script: p2pkh_script(&dummy_hash(10 + i as u8)),
			unlock: InputUnlock::Signature { signer: (*signer).into() },
		});
	}
	let fee = Amount::from_sat(1_000);
	let total = inputs.iter().map(|i| i.utxo.value).sum::<Amount>();
	UnsignedTransactionDescriptor {
		outputs: vec![DescriptorOutput::plain(p2pkh_script(&dummy_hash(2)), total - fee)],
		required_signers: signers.iter().map(|s| (*s).into()).collect(),
		inputs,
		fee,
		lock_time: 0,
	}
}

/// Fake a signature of `signer` on all of their inputs.
pub fn dummy_sign(
	descriptor: &UnsignedTransactionDescriptor,
	mut tx: Transaction,
	signer: &str,
) -> Transaction {
	for (input, txin) in descriptor.inputs.iter().zip(tx.input.iter_mut()) {
		if let InputUnlock::Signature { signer: ref s } = input.unlock {
			if s.as_str() == signer {
				let push = PushBytesBuf::try_from(signer.as_bytes().to_vec()).unwrap();
				txin.script_sig = ScriptBuf::builder().push_slice(push).into_script();
			}
		}
	}
	tx
}

/// A ledger whose calls never return.
pub struct StuckLedger;

#[async_trait]
impl LedgerProvider for StuckLedger {
	async fn unspent_outputs(&self, _: &CashAddress) -> Result<Vec<Utxo>, LedgerError> {
		std::future::pending().await
	}

	async fn transaction(&self, _: Txid) -> Result<Option<Transaction>, LedgerError> {
		std::future::pending().await
	}

	async fn broadcast(&self, _: &[u8]) -> Result<Txid, LedgerError> {
		std::future::pending().await
	}

	async fn chain_height(&self) -> Result<BlockHeight, LedgerError> {
		std::future::pending().await
	}
}
