
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use bitcoin::Amount;
use config::{Environment, File};

use covenant::{FeeModel, Network, ScriptRegistry};
use covenant::fee::{DUST, TOKEN_DUST};

use crate::serde_util;


/// Prefix of the environment variables overriding the config.
pub const ENV_PREFIX: &str = "COVENANT";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
	/// Network used for cashaddr prefixes.
	pub network: Network,
	/// Minimum value of a plain output.
	#[serde(with = "bitcoin::amount::serde::as_sat")]
	pub dust: Amount,
	/// Value carried by token outputs.
	#[serde(with = "bitcoin::amount::serde::as_sat")]
	pub token_dust: Amount,
	/// Script template artifact files.
	#[serde(default)]
	pub artifacts: Vec<PathBuf>,
	/// Timeout applied to every ledger call.
	#[serde(with = "serde_util::duration")]
	pub ledger_timeout: Duration,
	/// Whether a signer that never approved a payout may co-sign it when
	/// no approving signer is left.
	pub allow_fallback_signer: bool,
	pub fee: FeeModel,
}

impl Default for Config {
	fn default() -> Self {
		Config {
			network: Network::Mainnet,
			dust: DUST,
			token_dust: TOKEN_DUST,
			artifacts: Vec::new(),
			ledger_timeout: Duration::from_secs(30),
			allow_fallback_signer: true,
			fee: FeeModel::default(),
		}
	}
}

impl Config {
	fn load_with_custom_env(
		config_file: Option<&Path>,
		custom_env: Option<std::collections::HashMap<String, String>>,
	) -> anyhow::Result<Self> {
		let default = config::Config::try_from(&Self::default())
			.context("default config failed to deconstruct")?;

		// Three layers: the defaults, the config file if any and
		// environment variables prefixed with `COVENANT_`.
		let mut builder = config::Config::builder()
			.add_source(default);
		if let Some(file) = config_file {
			builder = builder.add_source(File::from(file));
		}
		let env = Environment::with_prefix(ENV_PREFIX)
			.prefix_separator("_")
			.separator("__")
			.source(custom_env);
		builder = builder.add_source(env);

		let cfg = builder.build().context("error building config")?;
		Ok(cfg.try_deserialize().context("error parsing config")?)
	}

	pub fn load(config_file: Option<&Path>) -> anyhow::Result<Self> {
		Self::load_with_custom_env(config_file, None)
	}

	/// Check the config for sanity.
	///
	/// Set `need_artifacts` when script templates will be used.
	pub fn validate(&self, need_artifacts: bool) -> anyhow::Result<()> {
		if self.fee.sat_per_byte == 0 {
			bail!("fee.sat_per_byte can't be zero");
		}
		if self.dust < DUST {
			bail!("dust limit of {} is below the network minimum of {}", self.dust, DUST);
		}
		if self.token_dust < DUST {
			bail!("token_dust of {} is below the network minimum of {}", self.token_dust, DUST);
		}
		if self.ledger_timeout.is_zero() {
			bail!("ledger_timeout can't be zero");
		}
		if need_artifacts && self.artifacts.is_empty() {
			bail!("no script template artifacts configured");
		}
		Ok(())
	}

	/// Load all configured script templates.
	pub fn load_registry(&self) -> anyhow::Result<ScriptRegistry> {
		ScriptRegistry::from_artifacts(&self.artifacts)
			.context("failed to load script template artifacts")
	}

	/// Write the config into the writer.
	pub fn write_into(&self, writer: &mut dyn io::Write) -> anyhow::Result<()> {
		let s = toml::to_string_pretty(self).context("config serialization error")?;
		writer.write_all(s.as_bytes()).context("error writing config to writer")?;
		Ok(())
	}
}

#[cfg(test)]
mod test {
	use std::collections::HashMap;

	use super::*;

	#[test]
	fn defaults_are_valid() {
		let cfg = Config::load(None).unwrap();
		assert_eq!(cfg, Config::default());
		cfg.validate(false).unwrap();
		cfg.validate(true).expect_err("no artifacts");
	}

	#[test]
	fn env_overrides() {
		let env = [
			("COVENANT_NETWORK", "testnet"),
			("COVENANT_DUST", "600"),
			("COVENANT_FEE__SAT_PER_BYTE", "2"),
			("COVENANT_LEDGER_TIMEOUT", "1m 30s"),
			("COVENANT_ALLOW_FALLBACK_SIGNER", "false"),
		].into_iter().map(|(k, v)| (k.into(), v.into())).collect::<HashMap<String, String>>();

		let cfg = Config::load_with_custom_env(None, Some(env)).unwrap();
		cfg.validate(false).unwrap();
		assert_eq!(cfg.network, Network::Testnet);
		assert_eq!(cfg.dust, Amount::from_sat(600));
		assert_eq!(cfg.fee.sat_per_byte, 2);
		assert_eq!(cfg.fee.per_input_bytes, FeeModel::default().per_input_bytes);
		assert_eq!(cfg.ledger_timeout, Duration::from_secs(90));
		assert!(!cfg.allow_fallback_signer);
	}

	#[test]
	fn invalid_values() {
		let mut cfg = Config::default();
		cfg.fee.sat_per_byte = 0;
		cfg.validate(false).expect_err("zero fee rate");

		let mut cfg = Config::default();
		cfg.token_dust = Amount::from_sat(545);
		cfg.validate(false).expect_err("token dust too low");

		let mut cfg = Config::default();
		cfg.ledger_timeout = Duration::ZERO;
		cfg.validate(false).expect_err("zero ledger timeout");
	}

	#[test]
	fn toml_roundtrip() {
		let mut cfg = Config::default();
		cfg.artifacts.push("artifacts/vesting.json".into());
		let mut buf = Vec::new();
		cfg.write_into(&mut buf).unwrap();
		let s = String::from_utf8(buf).unwrap();
		assert!(s.contains("ledger_timeout = \"30s\""), "{}", s);
		assert_eq!(toml::from_str::<Config>(&s).unwrap(), cfg);
	}
}
