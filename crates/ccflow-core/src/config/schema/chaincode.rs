use super::{ConfigSchemaError, Validate, validate_name};
use crate::ids::{ChaincodeId, Version};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod defaults {
    use crate::ids::Version;

    pub const fn version() -> Version {
        Version::new("v1")
    }
}

///
/// ChaincodeConfig
///

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ChaincodeConfig {
    pub name: ChaincodeId,

    /// Import path below `<build_root>/src`.
    pub path: String,

    pub build_root: PathBuf,

    #[serde(default = "defaults::version")]
    pub version: Version,

    /// Init arguments for instantiate (first entry is the function name).
    #[serde(default)]
    pub init_args: Vec<String>,

    /// Init arguments for upgrade.
    #[serde(default)]
    pub upgrade_args: Vec<String>,
}

impl ChaincodeConfig {
    #[must_use]
    pub fn init_args(&self) -> Vec<Vec<u8>> {
        self.init_args.iter().map(|a| a.as_bytes().to_vec()).collect()
    }

    #[must_use]
    pub fn upgrade_args(&self) -> Vec<Vec<u8>> {
        self.upgrade_args.iter().map(|a| a.as_bytes().to_vec()).collect()
    }
}

impl Validate for ChaincodeConfig {
    fn validate(&self) -> Result<(), ConfigSchemaError> {
        validate_name(self.name.as_str(), "chaincode.name")?;
        validate_name(self.version.as_str(), "chaincode.version")?;

        if self.path.trim().is_empty() {
            return Err(ConfigSchemaError::ValidationError(
                "chaincode.path must not be empty".into(),
            ));
        }
        if self.path.split('/').any(|part| part == "..") {
            return Err(ConfigSchemaError::ValidationError(format!(
                "chaincode.path '{}' must stay below the build root",
                self.path
            )));
        }

        Ok(())
    }
}
