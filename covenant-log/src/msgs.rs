
use bitcoin::{Amount, Txid};
use covenant::{ResourceKind, SignerId};


#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionAssembled {
	pub resource_id: String,
	pub kind: ResourceKind,
	pub function: String,
	pub nb_inputs: usize,
	pub nb_outputs: usize,
	pub fee: Amount,
	/// Hex of the commitment carried forward, none if the state was burned.
	pub new_state: Option<String>,
}
impl_slog!(TransitionAssembled, Debug, "assembled an unsigned covenant transaction");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCreated {
	pub session_id: u64,
	pub resource_id: String,
	pub required_signers: Vec<SignerId>,
	pub threshold: usize,
}
impl_slog!(SessionCreated, Info, "created a new signature session");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackSignerSelected {
	pub session_id: u64,
	pub resource_id: String,
	pub signer: SignerId,
}
impl_slog!(FallbackSignerSelected, Warn, "no approving signer available, selected a fallback co-signer");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureCollected {
	pub session_id: u64,
	pub signer: SignerId,
	pub collected: usize,
	pub threshold: usize,
}
impl_slog!(SignatureCollected, Debug, "collected a signature for a session");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCompleted {
	pub session_id: u64,
	pub resource_id: String,
	pub txid: Txid,
}
impl_slog!(SessionCompleted, Info, "signature session completed and transaction broadcast");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastRejected {
	pub session_id: u64,
	pub txid: Txid,
	pub error: String,
}
impl_slog!(BroadcastRejected, Warn, "the ledger did not accept a fully signed transaction");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentDrift {
	pub resource_id: String,
	pub recorded_address: String,
	pub derived_address: String,
	pub matched_version: Option<semver::Version>,
}
impl_slog!(DeploymentDrift, Warn, "recorded address doesn't match the current script template");

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerQueryFailed {
	pub query: String,
	pub error: String,
}
impl_slog!(LedgerQueryFailed, Warn, "ledger query failed");
