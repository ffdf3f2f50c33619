use log::info;

use crate::computation::ComputationRequest;
use crate::error::LedgerError;
use crate::ledger::{self, Ledger};
use crate::runner::ExecRunner;

/// Everything the execution stage needs, resolved once during matching
/// so nothing downstream has to go back to the registries.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub dataset_address: String,
    pub software_address: String,
    pub execution_unit: String,
}

/// Result of checking a request against the registries and the runtime.
/// All four checks are evaluated independently, with no short-circuit,
/// so the full picture can be reported verbatim.
#[derive(Debug)]
pub struct MatchReport {
    pub funds_ok: bool,
    pub dataset_match: bool,
    pub software_match: bool,
    pub container_alive: bool,

    pub artifacts: Artifacts,
}

impl MatchReport {
    pub fn is_valid(&self) -> bool {
        self.funds_ok && self.dataset_match && self.software_match && self.container_alive
    }
}

/// Check that the declared resources match what the requester actually
/// submitted and that the posted funds cover them exactly.
pub async fn match_resources(
    ledger: &dyn Ledger,
    runner: &dyn ExecRunner,
    request: &ComputationRequest,
) -> Result<MatchReport, LedgerError> {
    let dataset = ledger.get_dataset(&request.dataset_id).await?;
    let software = ledger.get_software(&request.software_id).await?;
    let container = ledger.get_container(&request.container_id).await?;

    // exact integer equality, no tolerance
    let expected_cost = dataset.cost + software.cost + container.cost;
    let funds_ok = request.posted_funds == expected_cost;

    // the listed fingerprint must match the artifact the requester
    // actually placed in the store, or they funded resource A while
    // pointing the sandbox at resource B
    let dataset_match = fingerprint_matches(&dataset.content_address, &dataset.content_hash);
    let software_match = fingerprint_matches(&software.content_address, &software.content_hash);

    let container_alive = runner.container_alive(&container.execution_unit).await;

    info!(
        "Match report for `{}`: funds_ok={funds_ok} dataset={dataset_match} \
         software={software_match} container_alive={container_alive}",
        request.computation_id
    );

    Ok(MatchReport {
        funds_ok,
        dataset_match,
        software_match,
        container_alive,
        artifacts: Artifacts {
            dataset_address: dataset.content_address,
            software_address: software.content_address,
            execution_unit: container.execution_unit,
        },
    })
}

// a content address carries its own fingerprint: the digest embedded in
// the address must equal the fingerprint recorded at listing time
fn fingerprint_matches(content_address: &str, content_hash: &str) -> bool {
    let digest = match ledger::result_to_bytes32(content_address) {
        Ok(d) => hex::encode(d),
        Err(_) => return false,
    };
    let declared = content_hash.trim_start_matches("0x").to_lowercase();
    digest == declared
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_digest_must_equal_declared_fingerprint() {
        let address = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";
        let digest = "9d6c2be50f706953479ab9df2ce3edca90b68053c00b3004b7f0accbe1e8eedf";
        assert!(fingerprint_matches(address, digest));
        assert!(fingerprint_matches(address, &format!("0x{digest}")));
        assert!(!fingerprint_matches(
            address,
            "8067f1ae16f20dea0b65bfcbd50d59014d143c8ecebab179d923f6ef244b40f8"
        ));
        assert!(!fingerprint_matches("garbage", digest));
    }
}
