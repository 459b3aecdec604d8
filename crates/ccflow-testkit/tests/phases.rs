mod common;

use ccflow_core::{
    domain::policy::deploy::DeployPlan,
    ops::execute::TxValidation,
    prelude::*,
};
use ccflow_testkit::fixture::{self, PEER0_ORG1, PEER0_ORG2, org1};
use common::*;
use std::sync::Arc;

fn plan(name: &str, version: &'static str, invoke_on: &[&'static str], query_on: &'static str) -> PhasePlan {
    PhasePlan {
        name: name.to_string(),
        version: v(version),
        install: install_targets(&[PEER0_ORG1], &[PEER0_ORG2]),
        deploy_org: org1(),
        deploy_targets: peers(&[PEER0_ORG1]),
        spec: DeploySpec {
            instantiate_policy: OR_POLICY.to_string(),
            upgrade_policy: AND_POLICY.to_string(),
            init_args: to_args(["init", "a", "100", "b", "200"]),
            upgrade_args: to_args(["init", "a", "1000", "b", "2000"]),
        },
        invoke: Some(PhaseCall {
            org: org1(),
            function: "set".to_string(),
            args: to_args(["a", version]),
            endorsers: peers(invoke_on),
        }),
        await_commit: true,
        query: Some(PhaseCall {
            org: org1(),
            function: "get".to_string(),
            args: to_args(["a"]),
            endorsers: peers(&[query_on]),
        }),
    }
}

#[tokio::test]
async fn install_instantiate_then_install_upgrade() {
    let mut h = harness_with_confirmer().await;

    let phase1 = run_phase(
        &mut h.coordinator,
        Arc::clone(&h.package),
        &plan("phase 1", "v1", &[PEER0_ORG1], PEER0_ORG1),
    )
    .await
    .unwrap();

    assert_eq!(phase1.installs.len(), 2);
    assert_eq!(phase1.deploy.plan, DeployPlan::Instantiate);
    assert_eq!(
        phase1.invoke.as_ref().map(|r| r.validation),
        Some(TxValidation::Committed)
    );
    assert_eq!(phase1.query, Some(b"v1".to_vec()));

    let phase2 = run_phase(
        &mut h.coordinator,
        Arc::clone(&h.package),
        &plan("phase 2", "v2", &[PEER0_ORG1, PEER0_ORG2], PEER0_ORG2),
    )
    .await
    .unwrap();

    assert_eq!(
        phase2.deploy.plan,
        DeployPlan::Upgrade { from: v("v1") }
    );
    assert_eq!(
        phase2.invoke.as_ref().map(|r| r.validation),
        Some(TxValidation::Committed)
    );
    assert_eq!(phase2.query, Some(b"v2".to_vec()));
    assert_eq!(h.coordinator.state(), &LifecycleState::Ready(v("v2")));
    assert_eq!(h.network.init_count(&fixture::chaincode()), 2);

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn rerunning_a_phase_is_idempotent() {
    let mut h = harness_with_confirmer().await;
    let phase = plan("phase 1", "v1", &[PEER0_ORG1], PEER0_ORG1);

    run_phase(&mut h.coordinator, Arc::clone(&h.package), &phase)
        .await
        .unwrap();
    let again = run_phase(&mut h.coordinator, Arc::clone(&h.package), &phase)
        .await
        .unwrap();

    assert!(again.installs.iter().all(|i| i.outcome.is_noop()));
    assert_eq!(again.deploy.plan, DeployPlan::AlreadyActive);
    assert_eq!(h.network.init_count(&fixture::chaincode()), 1);

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn phase_stops_at_the_first_failing_step() {
    let mut h = harness_with_confirmer().await;
    let mut phase = plan("phase 1", "v1", &[PEER0_ORG1], PEER0_ORG1);
    phase.spec.instantiate_policy = "AND('Org1MSP.member',".to_string();

    let err = run_phase(&mut h.coordinator, Arc::clone(&h.package), &phase)
        .await
        .unwrap_err();

    assert_eq!(err.class(), ErrorClass::Parse);
    assert_eq!(h.coordinator.state(), &LifecycleState::Installed);
    assert_eq!(h.network.active_version(&fixture::chaincode()), None);

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn waiting_for_commit_without_a_confirmer_fails_before_any_step() {
    let mut h = harness();
    let mut phase = plan("phase 1", "v1", &[PEER0_ORG1], PEER0_ORG1);

    let err = run_phase(&mut h.coordinator, Arc::clone(&h.package), &phase)
        .await
        .unwrap_err();

    assert_eq!(err.class(), ErrorClass::FailedPrecondition);
    assert!(err.to_string().contains("confirmer"));
    assert_eq!(h.coordinator.state(), &LifecycleState::Unpackaged);
    assert!(h.network.installed_on(&fixture::peer(PEER0_ORG1)).is_empty());

    // without the wait the same phase runs
    phase.await_commit = false;
    let report = run_phase(&mut h.coordinator, Arc::clone(&h.package), &phase)
        .await
        .unwrap();
    assert_eq!(report.query, Some(b"v1".to_vec()));
}
