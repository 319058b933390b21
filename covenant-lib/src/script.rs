//!
//! Covenant script templates and the registry holding them.
//!
//! A template is the compiled bytecode of one contract kind at one version,
//! together with the declared types of its constructor inputs. The redeem
//! script of a deployed covenant is its constructor arguments pushed in
//! reverse order, followed by the template bytecode.
//!

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use bitcoin::{Script, ScriptBuf};
use bitcoin::script::Builder;

use crate::address::{CashAddress, Network};
use crate::commitment::ResourceKind;
use crate::params::{self, ConstructorArg, ParamError, ParamType};


#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
	#[error("no script template registered for {0}")]
	UnknownTemplate(ResourceKind),
	#[error("template {kind} v{version} is registered twice")]
	Duplicate {
		kind: ResourceKind,
		version: semver::Version,
	},
	#[error("failed to read artifact {path}: {source}")]
	Io {
		path: String,
		source: std::io::Error,
	},
	#[error("malformed artifact: {0}")]
	Json(#[from] serde_json::Error),
	#[error("invalid constructor arguments: {0}")]
	Params(#[from] ParamError),
}

/// A declared constructor input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateInput {
	pub name: String,
	#[serde(rename = "type")]
	pub ty: ParamType,
}

/// A compiled contract template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptTemplate {
	pub kind: ResourceKind,
	pub version: semver::Version,
	pub constructor_inputs: Vec<TemplateInput>,
	pub bytecode: ScriptBuf,
}

impl ScriptTemplate {
	pub fn from_json(json: &str) -> Result<ScriptTemplate, RegistryError> {
		Ok(serde_json::from_str(json)?)
	}

	pub fn param_types(&self) -> Vec<ParamType> {
		self.constructor_inputs.iter().map(|i| i.ty).collect()
	}

	/// Build the redeem script for the given arguments.
	pub fn redeem_script(&self, args: &[ConstructorArg]) -> Result<ScriptBuf, ParamError> {
		params::check_args(&self.param_types(), args)?;
		let mut builder = Builder::new();
		for arg in args.iter().rev() {
			builder = arg.push_to(builder);
		}
		let mut bytes = builder.into_script().into_bytes();
		bytes.extend_from_slice(self.bytecode.as_bytes());
		Ok(ScriptBuf::from_bytes(bytes))
	}

	/// The address a covenant with these arguments lives at.
	pub fn address(
		&self,
		network: Network,
		args: &[ConstructorArg],
	) -> Result<CashAddress, ParamError> {
		Ok(CashAddress::p2sh32(network, &self.redeem_script(args)?))
	}
}

/// All known templates, per kind and version.
///
/// Built once at startup and passed to whoever needs to derive addresses.
#[derive(Debug, Clone, Default)]
pub struct ScriptRegistry {
	templates: BTreeMap<ResourceKind, BTreeMap<semver::Version, ScriptTemplate>>,
}

impl ScriptRegistry {
	pub fn new() -> ScriptRegistry {
		ScriptRegistry::default()
	}

	pub fn register(&mut self, template: ScriptTemplate) -> Result<(), RegistryError> {
		let versions = self.templates.entry(template.kind).or_default();
		if versions.contains_key(&template.version) {
			return Err(RegistryError::Duplicate {
				kind: template.kind,
				version: template.version,
			});
		}
		versions.insert(template.version.clone(), template);
		Ok(())
	}

	pub fn load_artifact(&mut self, path: impl AsRef<Path>) -> Result<(), RegistryError> {
		let path = path.as_ref();
		let json = fs::read_to_string(path).map_err(|e| RegistryError::Io {
			path: path.display().to_string(),
			source: e,
		})?;
		self.register(ScriptTemplate::from_json(&json)?)
	}

	pub fn from_artifacts<P: AsRef<Path>>(
		paths: impl IntoIterator<Item = P>,
	) -> Result<ScriptRegistry, RegistryError> {
		let mut ret = ScriptRegistry::new();
		for path in paths {
			ret.load_artifact(path)?;
		}
		Ok(ret)
	}

	/// The most recent version of the template for the kind.
	pub fn current(&self, kind: ResourceKind) -> Result<&ScriptTemplate, RegistryError> {
		self.templates.get(&kind)
			.and_then(|v| v.values().next_back())
			.ok_or(RegistryError::UnknownTemplate(kind))
	}

	/// All versions of the template for the kind, newest first.
	pub fn versions(&self, kind: ResourceKind) -> impl Iterator<Item = &ScriptTemplate> {
		self.templates.get(&kind).into_iter().flat_map(|v| v.values().rev())
	}

	pub fn redeem_script(
		&self,
		kind: ResourceKind,
		args: &[ConstructorArg],
	) -> Result<ScriptBuf, RegistryError> {
		Ok(self.current(kind)?.redeem_script(args)?)
	}

	pub fn is_empty(&self) -> bool {
		self.templates.is_empty()
	}
}

/// Whether the locking bytecode is the P2SH32 commitment to the redeem script.
pub fn locks_to(script_pubkey: &Script, redeem: &Script) -> bool {
	script_pubkey == crate::address::p2sh32_script(redeem).as_script()
}

#[cfg(test)]
mod test {
	use crate::test::dummy::{dummy_registry, dummy_template};

	use super::*;

	#[test]
	fn redeem_script_reverse_order() {
		let template = ScriptTemplate {
			kind: ResourceKind::Airdrop,
			version: semver::Version::new(1, 0, 0),
			constructor_inputs: vec![
				TemplateInput { name: "a".into(), ty: ParamType::Int },
				TemplateInput { name: "b".into(), ty: ParamType::Bytes },
			],
			bytecode: ScriptBuf::from_bytes(vec![0xac]),
		};
		let args = vec![ConstructorArg::Int(5), ConstructorArg::Bytes(vec![0xaa, 0xbb])];
		let redeem = template.redeem_script(&args).unwrap();
		assert_eq!(redeem.as_bytes(), &[0x02, 0xaa, 0xbb, 0x55, 0xac]);
		assert!(locks_to(&template.address(Network::Mainnet, &args).unwrap().script_pubkey(), &redeem));

		let err = template.redeem_script(&args[..1]).unwrap_err();
		assert_eq!(err, ParamError::Count { expected: 2, actual: 1 });
	}

	#[test]
	fn registry_picks_newest() {
		let mut reg = dummy_registry();
		let mut v2 = dummy_template(ResourceKind::Vesting);
		v2.version = semver::Version::new(2, 0, 0);
		v2.bytecode = ScriptBuf::from_bytes(vec![0x75, 0x51]);
		reg.register(v2.clone()).unwrap();

		assert_eq!(reg.current(ResourceKind::Vesting).unwrap(), &v2);
		assert_eq!(reg.versions(ResourceKind::Vesting).count(), 2);
		assert!(matches!(
			reg.register(v2), Err(RegistryError::Duplicate { .. }),
		));
	}

	#[test]
	fn artifact_json() {
		let json = r#"{
			"kind": "recurring-payment",
			"version": "1.4.2",
			"constructorInputs": [
				{ "name": "recipient", "type": "bytes20" },
				{ "name": "interval", "type": "int" }
			],
			"bytecode": "7551"
		}"#;
		let t = ScriptTemplate::from_json(json).unwrap();
		assert_eq!(t.kind, ResourceKind::RecurringPayment);
		assert_eq!(t.version, semver::Version::new(1, 4, 2));
		assert_eq!(t.param_types(), vec![ParamType::Bytes20, ParamType::Int]);
		assert_eq!(t.bytecode.as_bytes(), &[0x75, 0x51]);

		let mut reg = ScriptRegistry::new();
		assert!(matches!(
			reg.current(ResourceKind::Airdrop), Err(RegistryError::UnknownTemplate(_)),
		));
		reg.register(t).unwrap();
		assert!(!reg.is_empty());
	}
}
