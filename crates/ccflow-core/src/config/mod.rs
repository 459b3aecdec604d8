pub mod schema;

use crate::{log, log::Topic};
use std::{fs, io, path::Path};
use thiserror::Error as ThisError;

pub use schema::{
    ChaincodeConfig, ConfigSchemaError, DeploymentConfig, EventsConfig, OrgConfig, PolicyConfig,
    Validate,
};

/// Errors related to loading and parsing deployment configuration.
#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("cannot read config '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    /// TOML could not be parsed into the expected structure.
    #[error("toml error: {0}")]
    CannotParseToml(String),

    /// Wrapper for data schema-level errors.
    #[error(transparent)]
    ConfigSchema(#[from] ConfigSchemaError),
}

impl DeploymentConfig {
    /// Parse and validate a configuration document.
    pub fn from_toml(config_str: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(config_str).map_err(|e| ConfigError::CannotParseToml(e.to_string()))?;

        // validate
        config.validate()?;

        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&raw)?;

        log!(
            Topic::Config,
            Info,
            "loaded {}: channel {}, chaincode {}, {} org(s)",
            path.display(),
            config.channel,
            config.chaincode.name,
            config.orgs.len()
        );

        Ok(config)
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{OrgId, PeerId};

    const SAMPLE: &str = r#"
channel = "mychannel"

[chaincode]
name = "mycc"
path = "github.com/example/kvstore"
build_root = "chaincode"
init_args = ["init", "a", "100", "b", "200"]
upgrade_args = ["init", "a", "1000", "b", "2000"]

[policy]
instantiate = "OR('Org1MSP.member','Org2MSP.member')"
upgrade = "AND('Org1MSP.member','Org2MSP.member')"

[[orgs]]
name = "Org1"
msp_id = "Org1MSP"
admin = "Admin"
user = "User1"
peers = ["peer0.org1.example.com", "peer1.org1.example.com"]

[[orgs]]
name = "Org2"
msp_id = "Org2MSP"
admin = "Admin"
user = "User1"
peers = ["peer0.org2.example.com"]

[events]
listener_buffer = 16
tx_queue_capacity = 8
"#;

    #[test]
    fn sample_parses_and_validates() {
        let config = DeploymentConfig::from_toml(SAMPLE).expect("valid config");

        assert_eq!(config.orgs.len(), 2);
        assert_eq!(config.events.listener_buffer, 16);
        assert_eq!(config.events.tx_status_cache, EventsConfig::default().tx_status_cache);

        let spec = config.deploy_spec();
        assert_eq!(spec.init_args[0], b"init".to_vec());
        assert_eq!(spec.upgrade_args[2], b"1000".to_vec());

        let targets = config.install_targets();
        assert_eq!(targets[0].org, OrgId::new("Org1"));
        assert!(targets[0].peers.contains(&PeerId::new("peer1.org1.example.com")));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = SAMPLE.replace("[events]", "[events]\nbogus = 1");

        assert!(matches!(
            DeploymentConfig::from_toml(&raw),
            Err(ConfigError::CannotParseToml(_))
        ));
    }

    #[test]
    fn shared_peers_are_rejected() {
        let raw = SAMPLE.replace(
            r#"peers = ["peer0.org2.example.com"]"#,
            r#"peers = ["peer0.org1.example.com"]"#,
        );

        assert!(matches!(
            DeploymentConfig::from_toml(&raw),
            Err(ConfigError::ConfigSchema(_))
        ));
    }

    #[test]
    fn malformed_policy_is_rejected() {
        let raw = SAMPLE.replace("AND('Org1MSP.member'", "AND('Org1MSP.member'(");

        assert!(matches!(
            DeploymentConfig::from_toml(&raw),
            Err(ConfigError::ConfigSchema(_))
        ));
    }

    #[test]
    fn zero_buffers_are_rejected() {
        let raw = SAMPLE.replace("listener_buffer = 16", "listener_buffer = 0");

        assert!(DeploymentConfig::from_toml(&raw).is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().expect("tempdir");

        assert!(matches!(
            DeploymentConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
