use crate::CliError;
use ccflow_core::{config::DeploymentConfig, ops::package::Packager};
use std::path::Path;

pub fn run(config: &Path) -> Result<(), CliError> {
    let config = DeploymentConfig::load(config)?;
    let artifact = Packager::package(&config.package_source())?;

    println!(
        "{} {} files={} bytes={} sha256={}",
        artifact.name,
        artifact.path,
        artifact.file_count,
        artifact.len(),
        artifact.hash_hex()
    );

    Ok(())
}
