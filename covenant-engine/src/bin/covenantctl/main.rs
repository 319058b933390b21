
#[macro_use] extern crate anyhow;
#[macro_use] extern crate log;

use std::{fs, io, process};
use std::path::{Path, PathBuf};

use anyhow::Context;
use bitcoin::ScriptBuf;
use bitcoin::hashes::sha256;
use bitcoin::hex::DisplayHex;
use clap::Parser;
use clap::builder::BoolishValueParser;
use fern::colors::{Color, ColoredLevelConfig};
use serde::Serialize;

use covenant::{
	merkle, AllocationTree, AnyCommitment, CashAddress, DeploymentRecord, ResourceKind,
	ResourceTerms, Timestamp,
};
use covenant::{deploy, transition};
use covenant::merkle::Allocation;
use covenant_log::RecordSerializeWrapper;

use engine::{badarg, Config};
use engine::error::{is_user_error, ContextExt};


#[derive(Parser)]
#[command(name = "covenantctl", version, about = "Inspect and derive covenant state")]
struct Cli {
	/// Enable verbose logging
	#[arg(
		long,
		short = 'v',
		env = "COVENANT_VERBOSE",
		global = true,
		value_parser = BoolishValueParser::new(),
	)]
	verbose: bool,
	/// Only log warnings and errors
	#[arg(
		long,
		short = 'q',
		env = "COVENANT_QUIET",
		global = true,
		value_parser = BoolishValueParser::new(),
	)]
	quiet: bool,
	/// Log one JSON object per line
	#[arg(long, global = true)]
	json_log: bool,
	/// Path to the config file
	#[arg(long, short = 'c', env = "COVENANT_CONFIG", global = true)]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
	/// Decode the hex state commitment of a resource
	#[command()]
	Decode {
		#[arg(long)]
		kind: ResourceKind,
		commitment: String,
	},
	/// Encode a JSON state into its commitment bytes
	#[command()]
	Encode {
		/// The state as JSON, tagged with its kind
		state: String,
	},
	/// Print the initial state and address of new resource terms
	#[command()]
	Create {
		/// JSON file holding the terms
		terms: PathBuf,
	},
	/// Compute how much can be claimed at a given time
	#[command()]
	Claimable {
		/// JSON file holding the terms
		terms: PathBuf,
		/// Hex of the current state commitment
		commitment: String,
		/// Unix timestamp, defaults to now
		#[arg(long)]
		now: Option<Timestamp>,
	},
	/// Airdrop allocation trees
	#[command(subcommand)]
	Merkle(MerkleCommand),
	/// Compare a deployment record with the configured script templates
	#[command()]
	DeriveAddress {
		/// JSON file holding the deployment record
		record: PathBuf,
	},
	/// Print the effective config
	#[command()]
	DumpConfig,
}

#[derive(clap::Subcommand)]
enum MerkleCommand {
	/// Print the root of an allocation list
	#[command()]
	Build {
		/// JSON file holding a list of allocations
		allocations: PathBuf,
	},
	/// Print the inclusion proof of one allocation
	#[command()]
	Proof {
		allocations: PathBuf,
		/// Address of the recipient
		#[arg(long)]
		address: CashAddress,
		#[arg(long)]
		amount: u64,
	},
	/// Check an inclusion proof against a root
	#[command()]
	Verify {
		#[arg(long)]
		address: CashAddress,
		#[arg(long)]
		amount: u64,
		#[arg(long)]
		root: sha256::Hash,
		/// Sibling hashes from leaf to root
		#[arg(long = "node", value_name = "HASH")]
		proof: Vec<sha256::Hash>,
	},
}

#[derive(Serialize)]
struct Created {
	kind: ResourceKind,
	address: CashAddress,
	redeem_script: ScriptBuf,
	initial_state: AnyCommitment,
	commitment: String,
}

#[derive(Serialize)]
struct TreeSummary {
	root: sha256::Hash,
	leaves: usize,
	total_amount: u64,
}

#[derive(Serialize)]
struct ProofOutput {
	root: sha256::Hash,
	proof: Vec<sha256::Hash>,
}

fn init_logging(verbose: bool, quiet: bool, json: bool) {
	let level = if verbose {
		log::LevelFilter::Trace
	} else if quiet {
		log::LevelFilter::Warn
	} else {
		log::LevelFilter::Info
	};
	let dispatch = fern::Dispatch::new()
		.level(level)
		.level_for("config", log::LevelFilter::Warn);

	let dispatch = if json {
		dispatch.format(|out, _msg, rec| {
			let json = serde_json::to_string(&RecordSerializeWrapper(rec))
				.unwrap_or_else(|e| format!("{{\"error\":\"unserializable record: {}\"}}", e));
			out.finish(format_args!("{}", json))
		})
	} else {
		let colors = ColoredLevelConfig::new()
			.info(Color::Green)
			.debug(Color::BrightBlack)
			.trace(Color::BrightBlack);
		dispatch.format(move |out, msg, rec| {
			let now = chrono::Local::now();
			let stamp = now.format("%Y-%m-%d %H:%M:%S.%3f");
			out.finish(format_args!(
				"[{} {: >5} {}] {}",
				stamp, colors.color(rec.level()), rec.module_path().unwrap_or(""), msg,
			))
		})
	};

	// stdout is for command output
	if let Err(e) = dispatch.chain(io::stderr()).apply() {
		eprintln!("error setting up logging: {}", e);
	}
}

fn output_json<T: ?Sized + Serialize>(value: &T) -> anyhow::Result<()> {
	serde_json::to_writer_pretty(io::stdout(), value).context("failed to write output")?;
	println!();
	Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<T> {
	let s = fs::read_to_string(path)
		.not_found([path.display()], format!("{} file", what))?;
	serde_json::from_str(&s).badarg(format!("invalid {} in {}", what, path.display()))
}

fn decode_state(kind: ResourceKind, hex: &str) -> anyhow::Result<AnyCommitment> {
	AnyCommitment::decode_hex(kind, hex).badarg("invalid state commitment")
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
	let cfg = Config::load(path)?;
	cfg.validate(false)?;
	Ok(cfg)
}

fn run_merkle(cmd: MerkleCommand) -> anyhow::Result<()> {
	match cmd {
		MerkleCommand::Build { allocations } => {
			let allocs = read_json::<Vec<Allocation>>(&allocations, "allocations")?;
			let tree = AllocationTree::build(allocs).badarg("invalid allocation list")?;
			info!("Built allocation tree with {} leaves", tree.len());
			output_json(&TreeSummary {
				root: tree.root(),
				leaves: tree.len(),
				total_amount: tree.total_amount(),
			})
		},
		MerkleCommand::Proof { allocations, address, amount } => {
			let allocs = read_json::<Vec<Allocation>>(&allocations, "allocations")?;
			let tree = AllocationTree::build(allocs).badarg("invalid allocation list")?;
			let proof = tree.proof_for(&address.script_pubkey(), amount)
				.not_found([&address], format!("allocation of {} sat", amount))?;
			output_json(&ProofOutput { root: tree.root(), proof })
		},
		MerkleCommand::Verify { address, amount, root, proof } => {
			if merkle::verify(&address.script_pubkey(), amount, &proof, root) {
				println!("valid");
				Ok(())
			} else {
				badarg!("proof does not lead to root {}", root)
			}
		},
	}
}

fn inner_main(cli: Cli) -> anyhow::Result<()> {
	match cli.command {
		Command::Decode { kind, commitment } => {
			output_json(&decode_state(kind, &commitment)?)
		},
		Command::Encode { state } => {
			let state = serde_json::from_str::<AnyCommitment>(&state).badarg("invalid state json")?;
			println!("{}", state.encode().as_hex());
			Ok(())
		},
		Command::Create { terms } => {
			let cfg = load_config(cli.config.as_deref())?;
			cfg.validate(true)?;
			let registry = cfg.load_registry()?;
			let terms = read_json::<ResourceTerms>(&terms, "terms")?;
			terms.validate().badarg("invalid terms")?;
			let redeem_script = registry.redeem_script(terms.kind(), &terms.constructor_args())?;
			let initial_state = terms.initial_state()?;
			output_json(&Created {
				kind: terms.kind(),
				address: CashAddress::p2sh32(cfg.network, &redeem_script).with_token_support(true),
				commitment: initial_state.encode().as_hex().to_string(),
				redeem_script,
				initial_state,
			})
		},
		Command::Claimable { terms, commitment, now } => {
			let terms = read_json::<ResourceTerms>(&terms, "terms")?;
			let state = decode_state(terms.kind(), &commitment)?;
			let now = match now {
				Some(t) => t,
				None => u64::try_from(chrono::Utc::now().timestamp())
					.context("system clock before unix epoch")?,
			};
			println!("{}", transition::claimable_at(&terms, &state, now));
			Ok(())
		},
		Command::Merkle(cmd) => run_merkle(cmd),
		Command::DeriveAddress { record } => {
			let cfg = load_config(cli.config.as_deref())?;
			cfg.validate(true)?;
			let registry = cfg.load_registry()?;
			let record = read_json::<DeploymentRecord>(&record, "deployment record")?;
			let check = deploy::check_record(&registry, cfg.network, &record)
				.with_context(|| format!("failed to check deployment of {}", record.resource_id))?;
			if !check.matches_current {
				warn!("Recorded address of {} does not match the current template", record.resource_id);
			}
			output_json(&check)
		},
		Command::DumpConfig => {
			let cfg = load_config(cli.config.as_deref())?;
			cfg.write_into(&mut io::stdout())
		},
	}
}

fn main() {
	let cli = Cli::parse();
	if cli.verbose && cli.quiet {
		eprintln!("Can't set both --verbose and --quiet");
		process::exit(2);
	}
	init_logging(cli.verbose, cli.quiet, cli.json_log);

	if let Err(e) = inner_main(cli) {
		eprintln!("An error occurred: {}", e);
		eprintln!("");
		eprintln!("{:?}", e);
		process::exit(if is_user_error(&e) { 2 } else { 1 });
	}
}

#[cfg(test)]
mod test {
	use std::str::FromStr;

	use bitcoin::hashes::{hash160, Hash};
	use clap::CommandFactory;
	use covenant::Network;

	use super::*;

	#[test]
	fn cli_is_consistent() {
		Cli::command().debug_assert();
	}

	#[test]
	fn parse_merkle_verify() {
		let root = sha256::Hash::from_str(&"ab".repeat(32)).unwrap();
		let addr = CashAddress::p2pkh(Network::Mainnet, hash160::Hash::from_byte_array([1; 20]));
		let cli = Cli::try_parse_from([
			"covenantctl", "merkle", "verify",
			"--address", &addr.to_string(),
			"--amount", "1000",
			"--root", &root.to_string(),
		]).unwrap();
		match cli.command {
			Command::Merkle(MerkleCommand::Verify { amount, root: r, proof, .. }) => {
				assert_eq!(amount, 1000);
				assert_eq!(r, root);
				assert!(proof.is_empty());
			},
			_ => panic!("wrong command"),
		}
	}

	#[test]
	fn bad_commitment_is_user_error() {
		let e = decode_state(ResourceKind::Vesting, "zz").unwrap_err();
		assert!(is_user_error(&e));
	}
}
