use crate::CliError;
use ccflow_core::{
    config::{DeploymentConfig, OrgConfig},
    ids::Version,
    ops::{
        event::{EventService, RegistrationId},
        execute::to_args,
        package::{PackageArtifact, Packager},
        session::{Session, Targets},
    },
    workflow::{
        confirm::TxConfirmer,
        lifecycle::{InstallTarget, LifecycleCoordinator, OrgClient},
        phase::{PhaseCall, PhasePlan, PhaseReport, run_phase},
    },
};
use ccflow_testkit::{SimNetwork, fixture};
use std::{path::Path, sync::Arc};
use tempfile::TempDir;
use tokio::task::JoinHandle;

const SAMPLE_CONFIG: &str = include_str!("../../config/sample.toml");

///
/// Listeners
/// Block, filtered-block and chaincode-event registrations that log what
/// they receive.
///

struct Listeners {
    ids: Vec<RegistrationId>,
    tasks: Vec<JoinHandle<()>>,
}

impl Listeners {
    fn open(events: &EventService, config: &DeploymentConfig) -> Result<Self, CliError> {
        let mut blocks = events.register_block()?;
        let mut filtered = events.register_filtered_block()?;
        let mut chaincode = events.register_chaincode_event(config.chaincode.name.clone(), ".*")?;

        let ids = vec![blocks.id, filtered.id, chaincode.id];
        let tasks = vec![
            tokio::spawn(async move {
                while let Some(ev) = blocks.recv().await {
                    tracing::info!(
                        number = ev.number,
                        data_hash = %hex_prefix(&ev.data_hash),
                        previous_hash = %hex_prefix(&ev.previous_hash),
                        source = %ev.source,
                        "block event"
                    );
                }
            }),
            tokio::spawn(async move {
                while let Some(ev) = filtered.recv().await {
                    for tx in &ev.transactions {
                        tracing::info!(
                            number = ev.number,
                            tx = %tx.tx_id,
                            code = %tx.validation_code,
                            "filtered block event"
                        );
                    }
                }
            }),
            tokio::spawn(async move {
                while let Some(ev) = chaincode.recv().await {
                    tracing::info!(
                        chaincode = %ev.chaincode_id,
                        name = %ev.event_name,
                        payload = %String::from_utf8_lossy(&ev.payload),
                        tx = %ev.tx_id,
                        block = ev.block_number,
                        "chaincode event"
                    );
                }
            }),
        ];

        Ok(Self { ids, tasks })
    }

    async fn close(self, events: &EventService) {
        for id in self.ids {
            if let Err(err) = events.unregister(id) {
                tracing::warn!("listener {id}: {err}");
            }
        }
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().take(8).map(|b| format!("{b:02x}")).collect()
}

pub async fn run(config: Option<&Path>, upgrade_to: String) -> Result<(), CliError> {
    // keeps a generated build root alive for the whole run
    let (config, _build_root) = load_config(config)?;
    let (first, last) = match (config.orgs.first(), config.orgs.last()) {
        (Some(first), Some(last)) => (first.clone(), last.clone()),
        _ => return Err(CliError::Usage("config lists no orgs".to_string())),
    };

    let network = SimNetwork::from_config(&config);
    let package = Arc::new(Packager::package(&config.package_source())?);

    let mut coordinator = LifecycleCoordinator::new(
        config.channel.clone(),
        config.chaincode.name.clone(),
        config.chaincode.path.clone(),
    );
    let mut event_session = None;
    for org in &config.orgs {
        let session: Arc<dyn Session> =
            Arc::new(network.connect(config.session_context(org))?);
        event_session.get_or_insert_with(|| Arc::clone(&session));
        coordinator
            .add_org(OrgClient::new(session, org.peers.iter().cloned()))
            .map_err(ccflow_core::Error::from)?;
    }
    let Some(event_session) = event_session else {
        return Err(CliError::Usage("config lists no orgs".to_string()));
    };

    let events = EventService::connect(event_session.as_ref(), config.events.settings()).await?;
    let listeners = Listeners::open(&events, &config)?;
    let mut coordinator = coordinator.with_confirmer(TxConfirmer::spawn(
        events.clone(),
        config.events.tx_queue_capacity,
    ));

    let phases = [
        phase_plan(&config, "Phase 1", config.version(), &first, &[&first], "10"),
        phase_plan(
            &config,
            "Phase 2",
            Version::owned(upgrade_to),
            &first,
            &[&first, &last],
            "20",
        ),
    ];

    let mut result = Ok(());
    for plan in &phases {
        tracing::info!("=================== {} begin ===================", plan.name);
        match run_phase(&mut coordinator, Arc::clone(&package), plan).await {
            Ok(report) => print_report(&report, &package),
            Err(err) => {
                result = Err(err.into());
                break;
            }
        }
        tracing::info!("=================== {} end ===================", plan.name);
    }

    if let Some(summary) = coordinator.shutdown().await {
        tracing::info!(
            confirmed = summary.confirmed,
            abandoned = summary.abandoned,
            "confirmer stopped"
        );
    }
    listeners.close(&events).await;
    events.close();

    result
}

fn load_config(path: Option<&Path>) -> Result<(DeploymentConfig, Option<TempDir>), CliError> {
    if let Some(path) = path {
        return Ok((DeploymentConfig::load(path)?, None));
    }

    let mut config = DeploymentConfig::from_toml(SAMPLE_CONFIG)?;
    let build_root = tempfile::tempdir()?;
    fixture::write_kv_source(build_root.path(), &config.chaincode.path)?;
    config.chaincode.build_root = build_root.path().to_path_buf();

    Ok((config, Some(build_root)))
}

// install on every org, deploy through `deployer`, invoke endorsed by the
// first peer of each org in `endorsers`, query on the last of them
fn phase_plan(
    config: &DeploymentConfig,
    name: &str,
    version: Version,
    deployer: &OrgConfig,
    endorsers: &[&OrgConfig],
    value: &str,
) -> PhasePlan {
    let endorsing_peers: Vec<_> = endorsers
        .iter()
        .filter_map(|org| org.peers.first().cloned())
        .collect();
    let query_peer = endorsing_peers.last().cloned();

    PhasePlan {
        name: name.to_string(),
        version,
        install: config
            .orgs
            .iter()
            .map(|org| InstallTarget::new(org.name.clone(), org.peers.iter().cloned()))
            .collect(),
        deploy_org: deployer.name.clone(),
        deploy_targets: Targets::peers(deployer.peers.iter().cloned()),
        spec: config.deploy_spec(),
        invoke: Some(PhaseCall {
            org: deployer.name.clone(),
            function: "set".to_string(),
            args: to_args(["a", value]),
            endorsers: Targets::peers(endorsing_peers),
        }),
        await_commit: true,
        query: Some(PhaseCall {
            org: deployer.name.clone(),
            function: "get".to_string(),
            args: to_args(["a"]),
            endorsers: query_peer.map_or(Targets::NetworkDefault, |p| Targets::peers([p])),
        }),
    }
}

fn print_report(report: &PhaseReport, package: &PackageArtifact) {
    println!("{} ({})", report.name, report.version);
    println!("  package  {} sha256={}", package.name, package.hash_hex());
    for install in &report.installs {
        println!(
            "  install  {}: {} applied, {} already installed",
            install.org,
            install.outcome.applied.len(),
            install.outcome.conflicts.len()
        );
    }
    println!("  deploy   {:?}", report.deploy.plan);
    if let Some(record) = &report.invoke {
        println!("  invoke   {} {}", record.tx_id, record.validation);
    }
    if let Some(payload) = &report.query {
        println!("  query    a = {}", String::from_utf8_lossy(payload));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_config_parses_and_targets_every_org() {
        let (config, build_root) = load_config(None).unwrap();
        assert!(build_root.is_some());

        let first = config.orgs[0].clone();
        let last = config.orgs[1].clone();
        let plan = phase_plan(&config, "Phase 2", Version::new("v2"), &first, &[&first, &last], "20");

        assert_eq!(plan.install.len(), 2);
        assert_eq!(
            plan.invoke.map(|c| c.endorsers),
            Some(Targets::peers(["peer0.org1.example.com", "peer0.org2.example.com"]))
        );
        assert_eq!(
            plan.query.map(|c| c.endorsers),
            Some(Targets::peers(["peer0.org2.example.com"]))
        );
    }

    #[tokio::test]
    async fn simulate_runs_both_phases() {
        run(None, "v2".to_string()).await.unwrap();
    }
}
