//!
//! Merkle commitment to a list of (recipient, amount) allocations.
//!
//! Leaves and inner nodes are domain separated. Children are combined in
//! sorted order instead of by position, so a proof is just the list of
//! siblings and the root doesn't depend on the order allocations were given
//! in. A trailing node without sibling is promoted unchanged.
//!

use bitcoin::{Script, ScriptBuf};
use bitcoin::consensus::encode::{serialize, VarInt};
use bitcoin::hashes::{sha256, Hash, HashEngine};


const LEAF_TAG: &[u8] = b"CovenantAllocationLeaf";
const NODE_TAG: &[u8] = b"CovenantAllocationNode";

lazy_static! {
	static ref LEAF_ENGINE: sha256::HashEngine = tag_engine(LEAF_TAG);
	static ref NODE_ENGINE: sha256::HashEngine = tag_engine(NODE_TAG);
}

fn tag_engine(tag: &[u8]) -> sha256::HashEngine {
	let tag_hash = sha256::Hash::hash(tag);
	let mut engine = sha256::Hash::engine();
	engine.input(tag_hash.as_byte_array());
	engine.input(tag_hash.as_byte_array());
	engine
}


#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
	#[error("cannot build an allocation tree without recipients")]
	EmptyAllocationSet,
	#[error("allocation index {index} out of range, tree has {len} leaves")]
	IndexOutOfRange {
		index: usize,
		len: usize,
	},
	#[error("allocated amounts add up to more than {}", u64::MAX)]
	AmountOverflow,
}

/// An inclusion proof: the sibling hashes from leaf to root.
pub type MerkleProof = Vec<sha256::Hash>;

/// An amount allocated to a recipient.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Allocation {
	/// Locking bytecode the allocation is paid to.
	pub recipient: ScriptBuf,
	pub amount: u64,
}

impl Allocation {
	pub fn new(recipient: ScriptBuf, amount: u64) -> Allocation {
		Allocation { recipient, amount }
	}

	pub fn leaf_hash(&self) -> sha256::Hash {
		leaf_hash(&self.recipient, self.amount)
	}
}

/// The domain-separated hash of an allocation.
pub fn leaf_hash(recipient: &Script, amount: u64) -> sha256::Hash {
	let mut engine = LEAF_ENGINE.clone();
	engine.input(&serialize(&VarInt(recipient.len() as u64)));
	engine.input(recipient.as_bytes());
	engine.input(&amount.to_le_bytes());
	sha256::Hash::from_engine(engine)
}

/// Combine two children, in sorted order.
pub fn combine(a: &sha256::Hash, b: &sha256::Hash) -> sha256::Hash {
	let (first, second) = if a <= b { (a, b) } else { (b, a) };
	let mut engine = NODE_ENGINE.clone();
	engine.input(first.as_byte_array());
	engine.input(second.as_byte_array());
	sha256::Hash::from_engine(engine)
}

/// Check that the allocation is committed to by `root`.
pub fn verify(recipient: &Script, amount: u64, proof: &[sha256::Hash], root: sha256::Hash) -> bool {
	let computed = proof.iter().fold(leaf_hash(recipient, amount), |acc, sibling| {
		combine(&acc, sibling)
	});
	computed == root
}

/// A built allocation tree. Immutable once built.
#[derive(Debug, Clone)]
pub struct AllocationTree {
	allocations: Vec<Allocation>,
	/// For each allocation, the position of its leaf in the sorted bottom level.
	positions: Vec<usize>,
	/// All levels, from the sorted leaves up to the root.
	levels: Vec<Vec<sha256::Hash>>,
	total: u64,
}

impl AllocationTree {
	pub fn build(allocations: Vec<Allocation>) -> Result<AllocationTree, MerkleError> {
		if allocations.is_empty() {
			return Err(MerkleError::EmptyAllocationSet);
		}
		let total = allocations.iter()
			.try_fold(0u64, |acc, a| acc.checked_add(a.amount))
			.ok_or(MerkleError::AmountOverflow)?;

		let mut leaves = allocations.iter().enumerate()
			.map(|(i, a)| (a.leaf_hash(), i))
			.collect::<Vec<_>>();
		leaves.sort();
		let mut positions = vec![0; allocations.len()];
		for (pos, (_, idx)) in leaves.iter().enumerate() {
			positions[*idx] = pos;
		}

		let mut levels = vec![leaves.into_iter().map(|(h, _)| h).collect::<Vec<_>>()];
		while levels.last().map(|l| l.len()).unwrap_or(0) > 1 {
			let prev = &levels[levels.len() - 1];
			let next = prev.chunks(2).map(|pair| match pair {
				[a, b] => combine(a, b),
				[a] => *a,
				_ => unreachable!("chunks of two"),
			}).collect::<Vec<_>>();
			levels.push(next);
		}

		Ok(AllocationTree { allocations, positions, levels, total })
	}

	pub fn root(&self) -> sha256::Hash {
		// build ensures at least one level with at least one node
		self.levels[self.levels.len() - 1][0]
	}

	pub fn allocations(&self) -> &[Allocation] {
		&self.allocations
	}

	pub fn len(&self) -> usize {
		self.allocations.len()
	}

	/// Sum of all allocated amounts.
	pub fn total_amount(&self) -> u64 {
		self.total
	}

	/// The proof for the allocation at `index`, in the order allocations were given.
	pub fn proof(&self, index: usize) -> Result<MerkleProof, MerkleError> {
		let mut pos = *self.positions.get(index).ok_or(MerkleError::IndexOutOfRange {
			index,
			len: self.allocations.len(),
		})?;

		let mut ret = Vec::with_capacity(self.levels.len());
		for level in &self.levels[..self.levels.len() - 1] {
			let sibling = pos ^ 1;
			if let Some(h) = level.get(sibling) {
				ret.push(*h);
			}
			pos /= 2;
		}
		Ok(ret)
	}

	/// The proof for the first allocation to the recipient with the amount.
	pub fn proof_for(&self, recipient: &Script, amount: u64) -> Option<MerkleProof> {
		let idx = self.allocations.iter()
			.position(|a| a.recipient.as_script() == recipient && a.amount == amount)?;
		self.proof(idx).ok()
	}
}

#[cfg(test)]
mod test {
	use rand::SeedableRng;
	use rand::rngs::SmallRng;
	use rand::seq::SliceRandom;

	use crate::address::p2pkh_script;
	use crate::test::dummy::dummy_hash;

	use super::*;

	fn allocations(n: u8) -> Vec<Allocation> {
		(0..n).map(|i| Allocation::new(p2pkh_script(&dummy_hash(i)), 1_000 * (i as u64 + 1))).collect()
	}

	#[test]
	fn empty_fails() {
		assert_eq!(AllocationTree::build(vec![]).unwrap_err(), MerkleError::EmptyAllocationSet);
	}

	#[test]
	fn overflowing_total_fails() {
		let allocs = vec![
			Allocation::new(p2pkh_script(&dummy_hash(1)), u64::MAX),
			Allocation::new(p2pkh_script(&dummy_hash(2)), 1),
		];
		assert_eq!(AllocationTree::build(allocs).unwrap_err(), MerkleError::AmountOverflow);

		let allocs = vec![
			Allocation::new(p2pkh_script(&dummy_hash(1)), u64::MAX - 1),
			Allocation::new(p2pkh_script(&dummy_hash(2)), 1),
		];
		assert_eq!(AllocationTree::build(allocs).unwrap().total_amount(), u64::MAX);
	}

	#[test]
	fn single_leaf_is_root() {
		let allocs = allocations(1);
		let tree = AllocationTree::build(allocs.clone()).unwrap();
		assert_eq!(tree.root(), allocs[0].leaf_hash());
		assert!(tree.proof(0).unwrap().is_empty());
		assert!(verify(&allocs[0].recipient, allocs[0].amount, &[], tree.root()));
	}

	#[test]
	fn five_recipients() {
		let allocs = allocations(5);
		let tree = AllocationTree::build(allocs.clone()).unwrap();
		assert_eq!(tree.total_amount(), 15_000);
		let root = tree.root();

		let proofs = (0..5).map(|i| tree.proof(i).unwrap()).collect::<Vec<_>>();
		for (a, p) in allocs.iter().zip(&proofs) {
			assert!(verify(&a.recipient, a.amount, p, root));
			assert!(!verify(&a.recipient, a.amount + 1, p, root));
		}

		// corrupt a single byte of one proof
		let mut bad = proofs[2].clone();
		let mut bytes = bad[0].to_byte_array();
		bytes[7] ^= 0x01;
		bad[0] = sha256::Hash::from_byte_array(bytes);
		assert!(!verify(&allocs[2].recipient, allocs[2].amount, &bad, root));
		for i in [0, 1, 3, 4] {
			assert!(verify(&allocs[i].recipient, allocs[i].amount, &proofs[i], root));
		}

		assert_eq!(tree.proof(5), Err(MerkleError::IndexOutOfRange { index: 5, len: 5 }));
		assert_eq!(tree.proof_for(&allocs[3].recipient, allocs[3].amount), Some(proofs[3].clone()));
		assert_eq!(tree.proof_for(&allocs[3].recipient, 1), None);
	}

	#[test]
	fn root_independent_of_order() {
		let allocs = allocations(11);
		let root = AllocationTree::build(allocs.clone()).unwrap().root();

		let mut rng = SmallRng::seed_from_u64(0x5eed);
		for _ in 0..10 {
			let mut shuffled = allocs.clone();
			shuffled.shuffle(&mut rng);
			let tree = AllocationTree::build(shuffled.clone()).unwrap();
			assert_eq!(tree.root(), root);
			for (i, a) in shuffled.iter().enumerate() {
				assert!(verify(&a.recipient, a.amount, &tree.proof(i).unwrap(), root));
			}
		}
	}
}
