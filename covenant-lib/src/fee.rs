
use bitcoin::Amount;


/// Dust value of 546 satoshis.
///
/// This is the dust value for p2pkh outputs and the floor we apply to
/// every output we create.
pub const DUST: Amount = Amount::from_sat(546);

/// Value of 1000 satoshis we attach to outputs carrying tokens.
pub const TOKEN_DUST: Amount = Amount::from_sat(1000);

/// Size in bytes of a p2pkh input with its signature.
pub const P2PKH_INPUT_SIZE: u64 = 148;

/// Size in bytes of a p2pkh output.
pub const P2PKH_OUTPUT_SIZE: u64 = 34;

/// Size in bytes of the version, locktime and counts of a small tx.
pub const TX_OVERHEAD_SIZE: u64 = 10;


/// Linear fee model.
///
/// The size of a transaction is estimated as
/// `inputs * per_input + outputs * per_output + overhead` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeModel {
	pub per_input_bytes: u64,
	pub per_output_bytes: u64,
	pub overhead_bytes: u64,
	pub sat_per_byte: u64,
}

impl Default for FeeModel {
	fn default() -> Self {
		FeeModel {
			per_input_bytes: P2PKH_INPUT_SIZE,
			per_output_bytes: P2PKH_OUTPUT_SIZE,
			overhead_bytes: TX_OVERHEAD_SIZE,
			sat_per_byte: 1,
		}
	}
}

impl FeeModel {
	/// Estimated size in bytes.
	pub fn size(&self, nb_inputs: usize, nb_outputs: usize) -> u64 {
		nb_inputs as u64 * self.per_input_bytes
			+ nb_outputs as u64 * self.per_output_bytes
			+ self.overhead_bytes
	}

	/// Estimated fee.
	pub fn fee(&self, nb_inputs: usize, nb_outputs: usize) -> Amount {
		Amount::from_sat(self.size(nb_inputs, nb_outputs) * self.sat_per_byte)
	}

	/// The fee increase of adding one output.
	pub fn output_cost(&self) -> Amount {
		Amount::from_sat(self.per_output_bytes * self.sat_per_byte)
	}
}

/// Whether an output of this value would be worth creating.
pub fn above_dust(value: Amount, dust: Amount) -> bool {
	value > dust
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn linear_model() {
		let model = FeeModel::default();
		assert_eq!(model.size(1, 2), 148 + 2 * 34 + 10);
		assert_eq!(model.fee(1, 2), Amount::from_sat(226));

		let model = FeeModel { sat_per_byte: 2, ..Default::default() };
		assert_eq!(model.fee(2, 1), Amount::from_sat(2 * (2 * 148 + 34 + 10)));
		assert_eq!(model.output_cost(), Amount::from_sat(68));
	}
}
