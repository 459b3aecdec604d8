//! Phase runner.
//!
//! A phase is one pass over the lifecycle: install on every listed org,
//! bring the channel to the phase version, then optionally invoke and query.
//! Any failing step ends the phase with that error.

use crate::{
    Error,
    ids::{OrgId, Version},
    log,
    log::Topic,
    ops::{
        execute::{TransactionRecord, TxValidation},
        package::PackageArtifact,
        session::Targets,
    },
    workflow::lifecycle::{
        DeploySpec, DeployStep, InstallOutcome, InstallTarget, LifecycleCoordinator, LifecycleError,
    },
};
use std::sync::Arc;

///
/// PhaseCall
///

#[derive(Clone, Debug)]
pub struct PhaseCall {
    pub org: OrgId,
    pub function: String,
    pub args: Vec<Vec<u8>>,
    pub endorsers: Targets,
}

///
/// PhasePlan
///

#[derive(Clone, Debug)]
pub struct PhasePlan {
    pub name: String,
    pub version: Version,
    pub install: Vec<InstallTarget>,
    pub deploy_org: OrgId,
    pub deploy_targets: Targets,
    pub spec: DeploySpec,
    pub invoke: Option<PhaseCall>,
    /// Wait for the invoke to commit before querying. Needs a confirmer.
    pub await_commit: bool,
    pub query: Option<PhaseCall>,
}

///
/// PhaseReport
///

#[derive(Clone, Debug)]
pub struct PhaseReport {
    pub name: String,
    pub version: Version,
    pub installs: Vec<InstallOutcome>,
    pub deploy: DeployStep,
    pub invoke: Option<TransactionRecord>,
    pub query: Option<Vec<u8>>,
}

/// Run one phase end to end.
pub async fn run_phase(
    coordinator: &mut LifecycleCoordinator,
    package: Arc<PackageArtifact>,
    plan: &PhasePlan,
) -> Result<PhaseReport, Error> {
    log!(Topic::Lifecycle, Info, "phase '{}' starting ({})", plan.name, plan.version);

    if plan.await_commit && plan.invoke.is_some() && !coordinator.has_confirmer() {
        return Err(LifecycleError::NoConfirmer.into());
    }

    let installs = coordinator
        .install(&plan.version, package, &plan.install)
        .await?;

    let deploy = coordinator
        .deploy(&plan.deploy_org, &plan.version, &plan.spec, &plan.deploy_targets)
        .await?;

    let invoke = match &plan.invoke {
        Some(call) => {
            let mut record = coordinator
                .invoke(&call.org, &call.function, call.args.clone(), &call.endorsers)
                .await?;

            if plan.await_commit
                && let Some(confirmer) = coordinator.confirmer_mut()
                && let Some(status) = confirmer.wait_for(&record.tx_id).await
            {
                record.apply_status(&status);
                if let TxValidation::Invalid(code) = record.validation {
                    log!(Topic::Lifecycle, Warn, "tx {} invalidated: {code}", record.tx_id);
                }
            }

            Some(record)
        }
        None => None,
    };

    let query = match &plan.query {
        Some(call) => Some(
            coordinator
                .query(&call.org, &call.function, call.args.clone(), &call.endorsers)
                .await?,
        ),
        None => None,
    };

    log!(Topic::Lifecycle, Ok, "phase '{}' complete ({})", plan.name, coordinator.state());

    Ok(PhaseReport {
        name: plan.name.clone(),
        version: plan.version.clone(),
        installs,
        deploy,
        invoke,
        query,
    })
}
