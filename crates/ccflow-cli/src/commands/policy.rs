use crate::CliError;
use ccflow_core::{
    domain::policy::endorsement::{MspPrincipal, PolicyBuilder, Signer},
    ids::MspId,
};

pub fn run(expr: &str, msp: &str, signers: &[String]) -> Result<(), CliError> {
    let envelope = PolicyBuilder::new(MspId::owned(msp.to_string())).build(expr)?;
    let json = envelope
        .to_json()
        .map_err(|err| CliError::Usage(format!("cannot serialize policy: {err}")))?;

    println!("{json}");

    if signers.is_empty() {
        return Ok(());
    }

    let signers = parse_signers(signers)?;
    let names: Vec<String> = signers
        .iter()
        .map(|s| format!("{}.{}", s.msp_id, s.role))
        .collect();

    println!(
        "[{}] satisfied: {}",
        names.join(", "),
        envelope.is_satisfied_by(&signers)
    );

    Ok(())
}

fn parse_signers(raw: &[String]) -> Result<Vec<Signer>, CliError> {
    raw.iter()
        .map(|s| {
            let principal = MspPrincipal::parse(s)?;
            Ok(Signer::new(principal.msp_id, principal.role))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccflow_core::domain::policy::endorsement::MspRole;

    #[test]
    fn signers_parse_as_principals() {
        let signers =
            parse_signers(&["Org1MSP.peer".to_string(), "Org2MSP.admin".to_string()]).unwrap();

        assert_eq!(signers[0], Signer::new(MspId::new("Org1MSP"), MspRole::Peer));
        assert_eq!(signers[1].role, MspRole::Admin);
        assert!(parse_signers(&["Org1MSP".to_string()]).is_err());
    }

    #[test]
    fn malformed_policy_is_reported() {
        assert!(matches!(
            run("AND('Org1MSP.member'", "Org1MSP", &[]),
            Err(CliError::Policy(_))
        ));
    }
}
