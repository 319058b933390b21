//!
//! Re-deriving the address of a recorded deployment.
//!

use bitcoin::Txid;

use crate::address::{self, CashAddress, Network};
use crate::commitment::ResourceKind;
use crate::params::{ConstructorArg, ParamError};
use crate::script::{RegistryError, ScriptRegistry, ScriptTemplate};


#[derive(Debug, thiserror::Error)]
pub enum DeploymentError {
	#[error("recorded address {recorded} does not match derived address {derived}")]
	AddressMismatch {
		recorded: String,
		derived: CashAddress,
	},
	#[error("no script template for {0}")]
	UnknownTemplate(ResourceKind),
	#[error("stored parameters don't fit the template: {0}")]
	Params(#[from] ParamError),
	#[error(transparent)]
	Registry(RegistryError),
}

impl From<RegistryError> for DeploymentError {
	fn from(e: RegistryError) -> Self {
		match e {
			RegistryError::UnknownTemplate(kind) => DeploymentError::UnknownTemplate(kind),
			RegistryError::Params(e) => DeploymentError::Params(e),
			e => DeploymentError::Registry(e),
		}
	}
}

/// What was recorded when a resource was deployed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
	pub resource_id: String,
	pub kind: ResourceKind,
	pub params: Vec<ConstructorArg>,
	pub recorded_address: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub funding_txid: Option<Txid>,
}

/// The outcome of comparing a record against the known templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressCheck {
	/// Address derived with the current template version.
	pub derived: CashAddress,
	pub matches_current: bool,
	/// The template version whose address matches the record, if any.
	pub matched_version: Option<semver::Version>,
}

impl AddressCheck {
	/// A mismatch with the current version hints at an older bytecode.
	pub fn suspected_legacy_bytecode(&self) -> bool {
		!self.matches_current
	}
}

/// Whether the recorded address string denotes `derived`.
///
/// Both the token-aware and the plain form are accepted, case-insensitively.
pub fn address_matches(recorded: &str, derived: &CashAddress) -> bool {
	let token_aware = derived.with_token_support(true).to_string();
	let plain = derived.with_token_support(false).to_string();
	address::same_address(recorded, &token_aware) || address::same_address(recorded, &plain)
}

pub fn derive_address(
	template: &ScriptTemplate,
	network: Network,
	args: &[ConstructorArg],
) -> Result<CashAddress, DeploymentError> {
	Ok(template.address(network, args)?)
}

/// Compare the record with the address derived from the current template,
/// and search older versions for the one it was deployed with.
pub fn check_record(
	registry: &ScriptRegistry,
	network: Network,
	record: &DeploymentRecord,
) -> Result<AddressCheck, DeploymentError> {
	let current = registry.current(record.kind)?;
	let derived = derive_address(current, network, &record.params)?;
	let matches_current = address_matches(&record.recorded_address, &derived);

	let matched_version = if matches_current {
		Some(current.version.clone())
	} else {
		registry.versions(record.kind)
			.filter(|t| t.version != current.version)
			.find(|t| {
				t.address(network, &record.params)
					.map(|a| address_matches(&record.recorded_address, &a))
					.unwrap_or(false)
			})
			.map(|t| t.version.clone())
	};

	Ok(AddressCheck { derived, matches_current, matched_version })
}

/// Like [check_record] but failing on any mismatch.
pub fn verify_record(
	registry: &ScriptRegistry,
	network: Network,
	record: &DeploymentRecord,
) -> Result<CashAddress, DeploymentError> {
	let check = check_record(registry, network, record)?;
	if !check.matches_current {
		return Err(DeploymentError::AddressMismatch {
			recorded: record.recorded_address.clone(),
			derived: check.derived,
		});
	}
	Ok(check.derived)
}
