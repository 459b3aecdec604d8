use crate::ids::Version;

///
/// DeployMode
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeployMode {
    Instantiate,
    Upgrade,
}

///
/// DeployPlan
/// Decision for bringing a channel to a target chaincode version.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DeployPlan {
    /// Nothing is active on the channel yet.
    Instantiate,

    /// A different version is active and must be upgraded.
    Upgrade { from: Version },

    /// The target version is already active.
    AlreadyActive,
}

impl DeployPlan {
    #[must_use]
    pub const fn mode(&self) -> Option<DeployMode> {
        match self {
            Self::Instantiate => Some(DeployMode::Instantiate),
            Self::Upgrade { .. } => Some(DeployMode::Upgrade),
            Self::AlreadyActive => None,
        }
    }
}

///
/// plan_deploy
/// Decide between instantiate, upgrade and no-op from the active version.
///

#[must_use]
pub fn plan_deploy(active: Option<&Version>, target: &Version) -> DeployPlan {
    match active {
        None => DeployPlan::Instantiate,
        Some(current) if current == target => DeployPlan::AlreadyActive,
        Some(current) => DeployPlan::Upgrade {
            from: current.clone(),
        },
    }
}
