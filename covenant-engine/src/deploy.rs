//!
//! Cross-checking recorded deployments against the script templates and
//! the ledger.
//!
//! The check is advisory. Ledger failures never fail the verification,
//! they make the on-chain evidence [Evidence::Unknown].
//!

use std::sync::Arc;

use anyhow::Context;
use bitcoin::Amount;

use covenant::{CashAddress, DeploymentRecord, Network, ScriptRegistry};
use covenant::deploy;
use covenant_log::slog;

use crate::error::ContextExt;
use crate::ledger::{LedgerError, LedgerProvider};


/// Whether something was found on chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Evidence {
	#[serde(rename = "true")]
	Found,
	#[serde(rename = "false")]
	Absent,
	/// The ledger couldn't be queried.
	#[serde(rename = "unknown")]
	Unknown,
}

impl Evidence {
	/// Combine two independent pieces of evidence.
	///
	/// Anything found wins. Otherwise, absence is only confirmed if
	/// both queries succeeded.
	pub fn or(self, other: Evidence) -> Evidence {
		match (self, other) {
			(Evidence::Found, _) | (_, Evidence::Found) => Evidence::Found,
			(Evidence::Unknown, _) | (_, Evidence::Unknown) => Evidence::Unknown,
			(Evidence::Absent, Evidence::Absent) => Evidence::Absent,
		}
	}

	fn from_query<T>(res: Result<T, LedgerError>, found: impl FnOnce(&T) -> bool) -> Evidence {
		match res {
			Ok(ref v) if found(v) => Evidence::Found,
			Ok(_) => Evidence::Absent,
			Err(_) => Evidence::Unknown,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentReport {
	pub resource_id: String,
	pub recorded_address: String,
	/// Address derived with the current template version.
	pub derived_address: CashAddress,
	pub address_matches_current_artifact: bool,
	pub suspected_legacy_bytecode: bool,
	/// The template version the record was deployed with, if known.
	pub matched_version: Option<semver::Version>,
	pub unspent_outputs: Evidence,
	#[serde(with = "bitcoin::amount::serde::as_sat::opt")]
	pub balance: Option<Amount>,
	pub funding_transaction: Evidence,
	pub has_on_chain_evidence: Evidence,
}

pub struct DeploymentVerifier {
	registry: Arc<ScriptRegistry>,
	network: Network,
	ledger: Arc<dyn LedgerProvider>,
}

impl DeploymentVerifier {
	pub fn new(
		registry: Arc<ScriptRegistry>,
		network: Network,
		ledger: Arc<dyn LedgerProvider>,
	) -> DeploymentVerifier {
		DeploymentVerifier { registry, network, ledger }
	}

	pub async fn verify(&self, record: &DeploymentRecord) -> anyhow::Result<DeploymentReport> {
		let check = deploy::check_record(&self.registry, self.network, record)
			.with_context(|| format!("can't derive address of {}", record.resource_id))?;
		if check.suspected_legacy_bytecode() {
			slog!(DeploymentDrift,
				resource_id: record.resource_id.clone(),
				recorded_address: record.recorded_address.clone(),
				derived_address: check.derived.to_string(),
				matched_version: check.matched_version.clone(),
			);
		}

		let recorded = record.recorded_address.parse::<CashAddress>()
			.badarg("recorded address is not a valid cashaddr")?;

		let utxos = self.ledger.unspent_outputs(&recorded).await;
		if let Err(ref e) = utxos {
			slog!(LedgerQueryFailed, query: format!("utxos of {}", recorded), error: e.to_string());
		}
		let balance = utxos.as_ref().ok().map(|u| covenant::utxo::total_value(u));
		let unspent_outputs = Evidence::from_query(utxos, |u| !u.is_empty());

		let funding_transaction = match record.funding_txid {
			Some(txid) => {
				let tx = self.ledger.transaction(txid).await;
				if let Err(ref e) = tx {
					slog!(LedgerQueryFailed, query: format!("tx {}", txid), error: e.to_string());
				}
				Evidence::from_query(tx, |t| t.is_some())
			},
			None => Evidence::Absent,
		};

		Ok(DeploymentReport {
			resource_id: record.resource_id.clone(),
			recorded_address: record.recorded_address.clone(),
			address_matches_current_artifact: check.matches_current,
			suspected_legacy_bytecode: check.suspected_legacy_bytecode(),
			matched_version: check.matched_version,
			derived_address: check.derived,
			unspent_outputs,
			balance,
			funding_transaction,
			has_on_chain_evidence: unspent_outputs.or(funding_transaction),
		})
	}
}
