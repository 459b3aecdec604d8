mod common;

use ccflow_core::{
    ops::{execute::TxValidation, session::ValidationCode},
    prelude::*,
    workflow::lifecycle::DeployStep,
};
use ccflow_testkit::fixture::{self, PEER0_ORG1, PEER0_ORG2, PEER1_ORG1, org1};
use common::*;
use std::sync::Arc;

async fn invoke_and_confirm(h: &mut Harness, endorsers: &[&'static str], value: &str) -> TxValidation {
    let mut record = h
        .coordinator
        .invoke(&org1(), "set", to_args(["a", value]), &peers(endorsers))
        .await
        .unwrap();

    let status = h
        .coordinator
        .confirmer_mut()
        .unwrap()
        .wait_for(&record.tx_id)
        .await
        .unwrap();
    assert!(record.apply_status(&status));

    record.validation
}

async fn upgrade_to(h: &mut Harness, version: &'static str, policy: &str) -> DeployStep {
    h.coordinator
        .install(
            &v(version),
            Arc::clone(&h.package),
            &install_targets(&[PEER0_ORG1], &[PEER0_ORG2]),
        )
        .await
        .unwrap();

    h.coordinator
        .upgrade(&org1(), &v(version), &DeploySpec::new(OR_POLICY, policy), &peers(&[PEER0_ORG1]))
        .await
        .unwrap()
}

#[tokio::test]
async fn stricter_upgrade_policy_rejects_single_org_endorsements() {
    let mut h = harness_with_confirmer().await;
    instantiate(&mut h, "v1", OR_POLICY).await;

    // OR: one org is enough
    assert_eq!(invoke_and_confirm(&mut h, &[PEER0_ORG2], "1").await, TxValidation::Committed);

    upgrade_to(&mut h, "v2", AND_POLICY).await;
    assert_eq!(h.coordinator.state(), &LifecycleState::Ready(v("v2")));

    // AND: the same single-org endorsement no longer validates
    assert_eq!(
        invoke_and_confirm(&mut h, &[PEER0_ORG2], "2").await,
        TxValidation::Invalid(ValidationCode::EndorsementPolicyFailure)
    );
    assert_eq!(
        h.network.state(&fixture::chaincode(), "a"),
        Some(b"1".to_vec())
    );

    assert_eq!(
        invoke_and_confirm(&mut h, &[PEER0_ORG1, PEER0_ORG2], "3").await,
        TxValidation::Committed
    );
    assert_eq!(
        h.network.state(&fixture::chaincode(), "a"),
        Some(b"3".to_vec())
    );

    h.coordinator.shutdown().await;
}

#[tokio::test]
async fn upgrade_appends_a_descriptor_and_runs_init_again() {
    let mut h = harness();
    instantiate(&mut h, "v1", OR_POLICY).await;

    let step = upgrade_to(&mut h, "v2", AND_POLICY).await;
    assert!(step.outcome.is_some_and(|o| o.tx_id.is_some()));

    let history = h.coordinator.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].version, v("v1"));
    assert_eq!(history[1].version, v("v2"));
    assert_eq!(history[1].sequence, history[0].sequence + 1);
    assert_eq!(h.network.init_count(&fixture::chaincode()), 2);

    // same version again: nothing sent
    let again = h
        .coordinator
        .upgrade(&org1(), &v("v2"), &DeploySpec::new(OR_POLICY, AND_POLICY), &peers(&[PEER0_ORG1]))
        .await
        .unwrap();
    assert!(again.outcome.is_none());
    assert_eq!(h.coordinator.history().len(), 2);
    assert_eq!(h.network.init_count(&fixture::chaincode()), 2);
}

#[tokio::test]
async fn deploy_picks_instantiate_then_upgrade() {
    let mut h = harness();
    let spec = DeploySpec::new(OR_POLICY, AND_POLICY);

    for version in ["v1", "v2"] {
        h.coordinator
            .install(
                &v(version),
                Arc::clone(&h.package),
                &install_targets(&[PEER0_ORG1], &[PEER0_ORG2]),
            )
            .await
            .unwrap();
    }

    let first = h
        .coordinator
        .deploy(&org1(), &v("v1"), &spec, &peers(&[PEER0_ORG1]))
        .await
        .unwrap();
    let second = h
        .coordinator
        .deploy(&org1(), &v("v2"), &spec, &peers(&[PEER0_ORG1]))
        .await
        .unwrap();
    let third = h
        .coordinator
        .deploy(&org1(), &v("v2"), &spec, &peers(&[PEER0_ORG1]))
        .await
        .unwrap();

    assert!(first.outcome.is_some());
    assert!(second.outcome.is_some());
    assert!(third.outcome.is_none());
    assert_eq!(h.network.active_version(&fixture::chaincode()), Some(v("v2")));
}

#[tokio::test]
async fn failed_upgrade_keeps_the_previous_version() {
    let mut h = harness();
    instantiate(&mut h, "v1", OR_POLICY).await;

    h.coordinator
        .install(&v("v2"), Arc::clone(&h.package), &install_targets(&[PEER1_ORG1], &[]))
        .await
        .unwrap();
    h.network.set_peer_up(&fixture::peer(PEER1_ORG1), false);

    let err = h
        .coordinator
        .upgrade(&org1(), &v("v2"), &DeploySpec::new(OR_POLICY, AND_POLICY), &peers(&[PEER1_ORG1]))
        .await
        .unwrap_err();

    assert_eq!(err.class(), ErrorClass::Rejected);
    assert_eq!(h.coordinator.state(), &LifecycleState::Ready(v("v1")));
    assert_eq!(h.coordinator.history().len(), 1);
    assert_eq!(h.network.active_version(&fixture::chaincode()), Some(v("v1")));

    // the old version still serves queries
    h.coordinator
        .invoke(&org1(), "set", to_args(["a", "1"]), &peers(&[PEER0_ORG1]))
        .await
        .unwrap();
    let value = h
        .coordinator
        .query(&org1(), "get", to_args(["a"]), &peers(&[PEER0_ORG1]))
        .await
        .unwrap();
    assert_eq!(value, b"1".to_vec());
}

#[tokio::test]
async fn upgrade_to_a_version_never_installed_is_refused() {
    let mut h = harness();
    instantiate(&mut h, "v1", OR_POLICY).await;

    let err = h
        .coordinator
        .upgrade(&org1(), &v("v9"), &DeploySpec::new(OR_POLICY, OR_POLICY), &peers(&[PEER0_ORG1]))
        .await
        .unwrap_err();

    assert_eq!(err.class(), ErrorClass::FailedPrecondition);
    assert_eq!(h.coordinator.state(), &LifecycleState::Ready(v("v1")));
}

#[tokio::test]
async fn upgrade_before_instantiate_is_refused() {
    let mut h = harness();
    h.coordinator
        .install(&v("v1"), Arc::clone(&h.package), &install_targets(&[PEER0_ORG1], &[]))
        .await
        .unwrap();

    let err = h
        .coordinator
        .upgrade(&org1(), &v("v1"), &DeploySpec::new(OR_POLICY, OR_POLICY), &peers(&[PEER0_ORG1]))
        .await
        .unwrap_err();

    assert_eq!(err.class(), ErrorClass::FailedPrecondition);
}
