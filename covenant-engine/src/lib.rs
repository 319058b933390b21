
pub extern crate covenant;

#[macro_use] pub extern crate anyhow;
#[macro_use] extern crate async_trait;
#[macro_use] extern crate log;
#[macro_use] extern crate serde;

pub mod config;
pub mod coordinator;
pub mod deploy;
pub mod error;
pub mod ledger;
pub mod store;
mod serde_util;

#[cfg(any(test, feature = "test-util"))]
pub mod test;

pub use crate::config::Config;
pub use crate::coordinator::{Coordinator, CoordinatorError, SessionProgress, SignerPolicy};
pub use crate::deploy::{DeploymentReport, DeploymentVerifier, Evidence};
pub use crate::ledger::{LedgerError, LedgerProvider, TimeoutLedger};
pub use crate::store::{MemorySessionStore, SessionId, SessionStore, SignatureSession};

use std::sync::Arc;

use anyhow::Context;
use bitcoin::{Amount, ScriptBuf, Transaction};

use covenant::{
	AnyCommitment, Assembler, AssembledSpend, CashAddress, CovenantInput, DeploymentRecord,
	Funding, Operation, ResourceTerms, ScriptRegistry, SignerId, TxShape, Timestamp,
	UnsignedTransactionDescriptor, Utxo, UtxoSelection, UtxoSelector,
};
use covenant::transition;
use covenant_log::slog;

use crate::error::ContextExt;


/// A wallet address that pays fees and provides deposits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingSource {
	pub address: CashAddress,
	/// The party that signs for the address.
	pub signer: SignerId,
}

/// A deployed covenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contract {
	pub redeem_script: ScriptBuf,
	pub address: CashAddress,
}

/// The engine ties the pure covenant logic to the ledger and the
/// signature sessions.
///
/// Unspent outputs are never cached, every call that builds a
/// transaction fetches them again.
pub struct Engine {
	config: Config,
	registry: Arc<ScriptRegistry>,
	assembler: Assembler,
	ledger: Arc<dyn LedgerProvider>,
	coordinator: Coordinator,
	verifier: DeploymentVerifier,
}

impl Engine {
	pub fn new(
		config: Config,
		registry: ScriptRegistry,
		ledger: Arc<dyn LedgerProvider>,
		store: Arc<dyn SessionStore>,
	) -> anyhow::Result<Engine> {
		config.validate(false).context("invalid config")?;
		let registry = Arc::new(registry);
		let ledger: Arc<dyn LedgerProvider> = Arc::new(TimeoutLedger::new(ledger, config.ledger_timeout));
		let assembler = Assembler {
			selector: UtxoSelector::new(config.fee),
			dust: config.dust,
			token_dust: config.token_dust,
		};
		let coordinator = Coordinator::new(store, ledger.clone(), config.allow_fallback_signer);
		let verifier = DeploymentVerifier::new(registry.clone(), config.network, ledger.clone());
		Ok(Engine { config, registry, assembler, ledger, coordinator, verifier })
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn registry(&self) -> &ScriptRegistry {
		&self.registry
	}

	pub fn coordinator(&self) -> &Coordinator {
		&self.coordinator
	}

	/// The redeem script and address of the covenant for the terms.
	pub fn contract(&self, terms: &ResourceTerms) -> anyhow::Result<Contract> {
		terms.validate().badarg("invalid resource terms")?;
		let redeem_script = self.registry.redeem_script(terms.kind(), &terms.constructor_args())
			.with_context(|| format!("no usable {} script template", terms.kind()))?;
		let address = CashAddress::p2sh32(self.config.network, &redeem_script);
		Ok(Contract { redeem_script, address })
	}

	async fn fetch_utxos(&self, address: &CashAddress) -> anyhow::Result<Vec<Utxo>> {
		match self.ledger.unspent_outputs(address).await {
			Ok(utxos) => Ok(utxos),
			Err(e) => {
				slog!(LedgerQueryFailed, query: format!("utxos of {}", address), error: e.to_string());
				Err(e).with_context(|| format!("failed to fetch unspent outputs of {}", address))
			},
		}
	}

	async fn funding(&self, source: &FundingSource) -> anyhow::Result<Funding> {
		let spk = source.address.script_pubkey();
		Ok(Funding {
			utxos: self.fetch_utxos(&source.address).await?,
			change_script: spk.clone(),
			locking_script: spk,
			signer: source.signer.clone(),
		})
	}

	/// Select plain outputs of the address to pay `target` plus the fee.
	pub async fn select_utxos(
		&self,
		address: &CashAddress,
		target: Amount,
		shape: TxShape,
	) -> anyhow::Result<UtxoSelection> {
		let utxos = self.fetch_utxos(address).await?;
		Ok(self.assembler.selector.select_funds(&utxos, target, shape)?)
	}

	/// The covenant input carrying the current state of the contract
	/// and all other outputs held by the contract.
	async fn covenant_input(
		&self,
		terms: &ResourceTerms,
	) -> anyhow::Result<(CovenantInput, Vec<Utxo>)> {
		let contract = self.contract(terms)?;
		let mut utxos = self.fetch_utxos(&contract.address).await?;
		let idx = utxos.iter().position(|u| u.state_commitment().is_some())
			.not_found([contract.address.to_string()], "no state output at contract address")?;
		let utxo = utxos.swap_remove(idx);
		let input = CovenantInput {
			utxo,
			redeem_script: contract.redeem_script,
			terms: terms.clone(),
		};
		Ok((input, utxos))
	}

	/// The current on-chain state of the contract.
	pub async fn current_state(&self, terms: &ResourceTerms) -> anyhow::Result<AnyCommitment> {
		let (input, _) = self.covenant_input(terms).await?;
		Ok(input.state()?)
	}

	/// The amount that can be claimed right now.
	pub async fn claimable_at(&self, terms: &ResourceTerms, now: Timestamp) -> anyhow::Result<u64> {
		let state = self.current_state(terms).await?;
		Ok(transition::claimable_at(terms, &state, now))
	}

	fn log_assembled(&self, resource_id: &str, terms: &ResourceTerms, spend: &AssembledSpend) {
		slog!(TransitionAssembled,
			resource_id: resource_id.to_owned(),
			kind: terms.kind(),
			function: spend.function.to_owned(),
			nb_inputs: spend.descriptor.inputs.len(),
			nb_outputs: spend.descriptor.outputs.len(),
			fee: spend.descriptor.fee,
			new_state: spend.new_state_hex(),
		);
	}

	/// Build the genesis transaction funding a new contract with `amount`.
	pub async fn build_funding(
		&self,
		resource_id: &str,
		terms: &ResourceTerms,
		source: &FundingSource,
		amount: u64,
	) -> anyhow::Result<AssembledSpend> {
		let contract = self.contract(terms)?;
		let funding = self.funding(source).await?;
		let spend = self.assembler.fund(terms, &contract.redeem_script, &funding, amount)
			.with_context(|| format!("failed to build funding of {}", resource_id))?;
		self.log_assembled(resource_id, terms, &spend);
		Ok(spend)
	}

	/// Build the transaction performing `op` on the contract.
	///
	/// A funding source is needed for token denominated contracts.
	pub async fn build_transition(
		&self,
		resource_id: &str,
		terms: &ResourceTerms,
		op: &Operation,
		source: Option<&FundingSource>,
	) -> anyhow::Result<AssembledSpend> {
		let (input, covenant_utxos) = self.covenant_input(terms).await?;
		let funding = match source {
			Some(s) => Some(self.funding(s).await?),
			None => None,
		};
		let spend = self.assembler.assemble(&input, op, &covenant_utxos, funding.as_ref())
			.with_context(|| format!("failed to build {} of {}", op.function(), resource_id))?;
		self.log_assembled(resource_id, terms, &spend);
		Ok(spend)
	}

	/// Open or join the signature session of a resource.
	pub async fn open_session(
		&self,
		resource_id: &str,
		requester: &SignerId,
		policy: &SignerPolicy,
		descriptor: UnsignedTransactionDescriptor,
		signed_tx: Transaction,
	) -> Result<SignatureSession, CoordinatorError> {
		self.coordinator.open(resource_id, requester, policy, descriptor, signed_tx).await
	}

	pub async fn submit_signature(
		&self,
		session_id: SessionId,
		signer: &SignerId,
		signed_tx: Transaction,
	) -> Result<SignatureSession, CoordinatorError> {
		self.coordinator.submit(session_id, signer, signed_tx).await
	}

	pub async fn retry_broadcast(
		&self,
		session_id: SessionId,
	) -> Result<SignatureSession, CoordinatorError> {
		self.coordinator.retry_broadcast(session_id).await
	}

	pub async fn verify_deployment(
		&self,
		record: &DeploymentRecord,
	) -> anyhow::Result<DeploymentReport> {
		self.verifier.verify(record).await
	}
}

#[cfg(test)]
mod test_engine {
	use bitcoin::{OutPoint, Txid};
	use bitcoin::hashes::Hash;

	use covenant::{Network, TokenData};
	use covenant::commitment::{Commitment, VestingState};
	use covenant::test::dummy::{
		dummy_category, dummy_hash, dummy_registry, dummy_utxo, dummy_vesting_terms, DUMMY_START,
	};

	use std::time::Duration;

	use crate::test::{MockLedger, StuckLedger};

	use super::*;

	fn engine(ledger: Arc<MockLedger>) -> Engine {
		let cfg = Config { network: Network::Regtest, ..Default::default() };
		Engine::new(cfg, dummy_registry(), ledger, Arc::new(MemorySessionStore::new())).unwrap()
	}

	fn wallet() -> FundingSource {
		FundingSource {
			address: CashAddress::p2pkh(Network::Regtest, dummy_hash(5)),
			signer: "treasurer".into(),
		}
	}

	#[tokio::test]
	async fn release_refetches_utxos() {
		let ledger = Arc::new(MockLedger::new());
		let engine = engine(ledger.clone());
		let terms = ResourceTerms::from(dummy_vesting_terms());
		let contract = engine.contract(&terms).unwrap();
		assert!(contract.address.to_string().starts_with("bchreg:"));

		let state = terms.initial_state().unwrap();
		ledger.set_utxos(&contract.address, vec![Utxo::with_token(
			dummy_utxo(1, 0).outpoint,
			Amount::from_sat(300_000),
			TokenData::state(dummy_category(1), state.encode()),
		)]);

		let now = DUMMY_START + 86_400;
		assert_eq!(engine.claimable_at(&terms, now).await.unwrap(), 100_000);
		assert_eq!(engine.claimable_at(&terms, now - 1).await.unwrap(), 0);

		let op = Operation::Release { now };
		let spend = engine.build_transition("plan-1", &terms, &op, None).await.unwrap();
		assert!(spend.descriptor.is_balanced());
		let next = VestingState::decode_hex(&spend.new_state_hex().unwrap()).unwrap();
		assert_eq!(next.milestone_index.get(), 1);
		assert_eq!(next.total_released, 100_000);

		let queries = ledger.utxo_queries();
		engine.build_transition("plan-1", &terms, &op, None).await.unwrap();
		assert_eq!(ledger.utxo_queries(), queries + 1);
	}

	#[tokio::test]
	async fn missing_state_output() {
		let ledger = Arc::new(MockLedger::new());
		let engine = engine(ledger.clone());
		let terms = ResourceTerms::from(dummy_vesting_terms());
		let contract = engine.contract(&terms).unwrap();
		ledger.set_utxos(&contract.address, vec![dummy_utxo(1, 300_000)]);

		let err = engine.build_transition(
			"plan-1", &terms, &Operation::Release { now: DUMMY_START + 86_400 }, None,
		).await.unwrap_err();
		assert!(err.downcast_ref::<crate::error::NotFound>().is_some(), "{:?}", err);

		ledger.set_unavailable(true);
		let err = engine.current_state(&terms).await.unwrap_err();
		assert!(err.downcast_ref::<LedgerError>().unwrap().is_unavailable());
	}

	#[tokio::test]
	async fn funding_and_threshold_payout() {
		let ledger = Arc::new(MockLedger::new());
		let engine = engine(ledger.clone());
		let terms = ResourceTerms::from(dummy_vesting_terms());
		let anchor = OutPoint::new(Txid::from_byte_array([7; 32]), 0);
		ledger.set_utxos(&wallet().address, vec![
			Utxo::new(anchor, Amount::from_sat(500_000)),
			dummy_utxo(2, 10_000),
		]);

		let spend = engine.build_funding("plan-1", &terms, &wallet(), 300_000).await.unwrap();
		let desc = spend.descriptor;
		assert!(desc.is_balanced());
		assert_eq!(desc.inputs[0].utxo.outpoint, anchor);
		assert_eq!(spend.category.to_byte_array(), anchor.txid.to_byte_array());
		assert_eq!(desc.required_signers.len(), 1);
		assert!(desc.required_signers.contains(&SignerId::from("treasurer")));

		let policy = SignerPolicy {
			eligible: vec!["treasurer".into(), "auditor".into()],
			approvals: ["auditor".into()].into_iter().collect(),
			threshold: 2,
		};
		let unsigned = desc.to_transaction();
		let session = engine.open_session(
			"plan-1", &"treasurer".into(), &policy, desc.clone(), unsigned.clone(),
		).await.unwrap();
		assert_eq!(session.remaining(), vec![SignerId::from("auditor")]);

		let session = engine.submit_signature(session.id, &"auditor".into(), unsigned).await.unwrap();
		assert!(session.is_completed());
		assert_eq!(ledger.broadcasts().len(), 1);
		assert_eq!(ledger.broadcasts()[0].compute_txid(), session.final_txid.unwrap());
	}

	#[tokio::test]
	async fn insufficient_funds_surface_verbatim() {
		let ledger = Arc::new(MockLedger::new());
		let engine = engine(ledger.clone());
		ledger.set_utxos(&wallet().address, vec![dummy_utxo(2, 1_000)]);

		let err = engine.select_utxos(&wallet().address, Amount::from_sat(5_000), TxShape::new(0, 1))
			.await.unwrap_err();
		match err.downcast_ref::<covenant::SelectionError>() {
			Some(covenant::SelectionError::InsufficientFunds { available, .. }) => {
				assert_eq!(*available, Amount::from_sat(1_000));
			},
			e => panic!("unexpected error: {:?}", e),
		}
	}

	#[tokio::test]
	async fn ledger_timeout_applies() {
		let cfg = Config {
			network: Network::Regtest,
			ledger_timeout: Duration::from_millis(20),
			..Default::default()
		};
		let engine = Engine::new(
			cfg, dummy_registry(), Arc::new(StuckLedger), Arc::new(MemorySessionStore::new()),
		).unwrap();
		let terms = ResourceTerms::from(dummy_vesting_terms());
		let err = engine.current_state(&terms).await.unwrap_err();
		assert!(err.downcast_ref::<LedgerError>().unwrap().is_unavailable(), "{:?}", err);
	}
}
