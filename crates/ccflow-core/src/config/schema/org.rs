use super::{ConfigSchemaError, Validate, validate_name};
use crate::ids::{MspId, OrgId, PeerId};
use serde::{Deserialize, Serialize};

///
/// OrgConfig
///

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OrgConfig {
    pub name: OrgId,
    pub msp_id: MspId,
    pub admin: String,
    pub user: String,
    pub peers: Vec<PeerId>,
}

impl Validate for OrgConfig {
    fn validate(&self) -> Result<(), ConfigSchemaError> {
        let ctx = format!("org '{}'", self.name);

        validate_name(self.name.as_str(), "org name")?;
        validate_name(self.msp_id.as_str(), &format!("{ctx} msp_id"))?;
        validate_name(&self.admin, &format!("{ctx} admin"))?;
        validate_name(&self.user, &format!("{ctx} user"))?;

        if self.peers.is_empty() {
            return Err(ConfigSchemaError::ValidationError(format!(
                "{ctx} must list at least one peer"
            )));
        }
        for peer in &self.peers {
            validate_name(peer.as_str(), &format!("{ctx} peer"))?;
        }

        Ok(())
    }
}
