mod chaincode;
mod events;
mod org;

pub use chaincode::*;
pub use events::*;
pub use org::*;

use crate::{
    Error, ThisError,
    config::ConfigError,
    domain::policy::endorsement::{ANY_POLICY, PolicyExpr},
    ids::{ChannelId, OrgId, PeerId, Version},
    ops::{package::PackageSource, session::SessionContext},
    workflow::lifecycle::{DeploySpec, InstallTarget},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

///
/// ConfigSchemaError
///

#[derive(Debug, ThisError)]
pub enum ConfigSchemaError {
    #[error("validation error: {0}")]
    ValidationError(String),
}

pub const NAME_MAX_BYTES: usize = 64;

fn validate_name(value: &str, context: &str) -> Result<(), ConfigSchemaError> {
    if value.trim().is_empty() {
        return Err(ConfigSchemaError::ValidationError(format!(
            "{context} must not be empty"
        )));
    }
    if value.len() > NAME_MAX_BYTES {
        return Err(ConfigSchemaError::ValidationError(format!(
            "{context} '{value}' exceeds {NAME_MAX_BYTES} bytes",
        )));
    }

    Ok(())
}

impl From<ConfigSchemaError> for Error {
    fn from(err: ConfigSchemaError) -> Self {
        ConfigError::from(err).into()
    }
}

///
/// Validate
///

pub trait Validate {
    fn validate(&self) -> Result<(), ConfigSchemaError>;
}

///
/// DeploymentConfig
///

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DeploymentConfig {
    pub channel: ChannelId,

    pub chaincode: ChaincodeConfig,

    pub policy: PolicyConfig,

    pub orgs: Vec<OrgConfig>,

    #[serde(default)]
    pub events: EventsConfig,
}

impl DeploymentConfig {
    #[must_use]
    pub fn org(&self, name: &OrgId) -> Option<&OrgConfig> {
        self.orgs.iter().find(|org| &org.name == name)
    }

    /// Session scope for `org` on this config's channel.
    #[must_use]
    pub fn session_context(&self, org: &OrgConfig) -> SessionContext {
        SessionContext {
            org: org.name.clone(),
            msp_id: org.msp_id.clone(),
            admin: org.admin.clone(),
            user: org.user.clone(),
            channel: self.channel.clone(),
        }
    }

    /// Every org's full peer list, in config order.
    #[must_use]
    pub fn install_targets(&self) -> Vec<InstallTarget> {
        self.orgs
            .iter()
            .map(|org| InstallTarget::new(org.name.clone(), org.peers.iter().cloned()))
            .collect()
    }

    #[must_use]
    pub fn deploy_spec(&self) -> DeploySpec {
        DeploySpec {
            instantiate_policy: self.policy.instantiate.clone(),
            upgrade_policy: self.policy.upgrade.clone(),
            init_args: self.chaincode.init_args(),
            upgrade_args: self.chaincode.upgrade_args(),
        }
    }

    #[must_use]
    pub fn package_source(&self) -> PackageSource {
        PackageSource::new(
            self.chaincode.name.clone(),
            self.chaincode.path.clone(),
            self.chaincode.build_root.clone(),
        )
    }

    /// Version to deploy when none is given on the command line.
    #[must_use]
    pub fn version(&self) -> Version {
        self.chaincode.version.clone()
    }
}

impl Validate for DeploymentConfig {
    fn validate(&self) -> Result<(), ConfigSchemaError> {
        validate_name(self.channel.as_str(), "channel")?;
        self.chaincode.validate()?;
        self.policy.validate()?;
        self.events.validate()?;

        if self.orgs.is_empty() {
            return Err(ConfigSchemaError::ValidationError(
                "at least one [[orgs]] entry is required".into(),
            ));
        }

        let mut names = BTreeSet::new();
        let mut msp_ids = BTreeSet::new();
        let mut peers: BTreeSet<&PeerId> = BTreeSet::new();
        for org in &self.orgs {
            org.validate()?;

            if !names.insert(&org.name) {
                return Err(ConfigSchemaError::ValidationError(format!(
                    "org '{}' is listed twice",
                    org.name
                )));
            }
            if !msp_ids.insert(&org.msp_id) {
                return Err(ConfigSchemaError::ValidationError(format!(
                    "msp id '{}' is used by more than one org",
                    org.msp_id
                )));
            }
            for peer in &org.peers {
                if !peers.insert(peer) {
                    return Err(ConfigSchemaError::ValidationError(format!(
                        "peer '{peer}' is listed under more than one org"
                    )));
                }
            }
        }

        Ok(())
    }
}

///
/// PolicyConfig
/// Endorsement policy expressions per deploy mode.
///

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    pub instantiate: String,
    pub upgrade: String,
}

impl Validate for PolicyConfig {
    fn validate(&self) -> Result<(), ConfigSchemaError> {
        for (mode, expr) in [("instantiate", &self.instantiate), ("upgrade", &self.upgrade)] {
            if expr.trim() == ANY_POLICY {
                continue;
            }
            PolicyExpr::parse(expr).map_err(|err| {
                ConfigSchemaError::ValidationError(format!("policy.{mode}: {err}"))
            })?;
        }

        Ok(())
    }
}
