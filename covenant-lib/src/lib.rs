
pub extern crate bitcoin;

#[macro_use] extern crate serde;
#[macro_use] extern crate lazy_static;

pub mod address;
pub mod assemble;
pub mod commitment;
pub mod deploy;
pub mod fee;
pub mod merkle;
pub mod params;
pub mod script;
pub mod selection;
pub mod terms;
pub mod token;
pub mod transition;
pub mod tx;
pub mod utxo;

#[cfg(any(test, feature = "test-util"))]
pub mod test;

pub use crate::address::{CashAddress, Network};
pub use crate::assemble::{AssembleError, Assembler, AssembledSpend, CovenantInput, Funding};
pub use crate::commitment::{
	AnyCommitment, Commitment, Flags, InvalidCommitment, ResourceKind, Status, U40,
};
pub use crate::deploy::{AddressCheck, DeploymentError, DeploymentRecord};
pub use crate::fee::FeeModel;
pub use crate::merkle::{Allocation, AllocationTree, MerkleError};
pub use crate::params::{ConstructorArg, ParamError, ParamType, RawParam};
pub use crate::script::{RegistryError, ScriptRegistry, ScriptTemplate};
pub use crate::selection::{SelectionError, TxShape, UtxoSelection, UtxoSelector};
pub use crate::terms::{InvalidTerms, MilestoneSchedule, ResourceTerms};
pub use crate::token::{NftCapability, TokenCategory, TokenData};
pub use crate::transition::{Operation, Transition, TransitionError};
pub use crate::tx::{SignerId, SigningBundle, UnsignedTransactionDescriptor};
pub use crate::utxo::Utxo;


/// Unix timestamp in seconds.
pub type Timestamp = u64;

/// Type representing a block height in the ledger.
pub type BlockHeight = u32;
