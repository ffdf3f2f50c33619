use async_trait::async_trait;
use log::debug;
use serde_json::json;

use crate::computation::{
    ComputationRequest, ContainerDescriptor, EventBatch, ResourceDescriptor
};
use crate::config::LedgerConfig;
use crate::error::LedgerError;

/// Typed operations against the three on-chain registries. The chain node
/// itself is an opaque collaborator behind a gateway; the controller only
/// ever sees this trait.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn get_computation(&self, id: &str) -> Result<ComputationRequest, LedgerError>;

    async fn get_dataset(&self, id: &str) -> Result<ResourceDescriptor, LedgerError>;

    async fn get_software(&self, id: &str) -> Result<ResourceDescriptor, LedgerError>;

    async fn get_container(&self, id: &str) -> Result<ContainerDescriptor, LedgerError>;

    /// Transfer the posted funds to the resource providers.
    async fn computation_succeed(&self, id: &str) -> Result<(), LedgerError>;

    /// Return the posted funds to the requester. Idempotent: an
    /// already-settled computation answers as success, never as a
    /// double refund.
    async fn computation_failed(&self, id: &str) -> Result<(), LedgerError>;

    /// Record the result reference for its owner.
    async fn add_result_info(&self, owner: &str, result: [u8; 32]) -> Result<(), LedgerError>;

    /// Record a human-readable failure for the owner of the request.
    async fn result_error(&self, owner: &str, message: &str) -> Result<(), LedgerError>;

    /// Read "computation submitted" events, oldest first, starting at
    /// `from_block`. Delivery is at-least-once; consumers must tolerate
    /// replays.
    async fn computation_events(&self, from_block: u64) -> Result<EventBatch, LedgerError>;
}

/// Convert a base-58 content address into the ledger's fixed-width result
/// identifier: decode, discard the 2-byte multihash prefix, keep the
/// remaining 32 bytes verbatim.
pub fn result_to_bytes32(address: &str) -> Result<[u8; 32], LedgerError> {
    let decoded = bs58::decode(address)
        .into_vec()
        .map_err(|e| LedgerError::InvalidAddress(format!("`{address}`: {e}")))?;
    if decoded.len() != 34 {
        return Err(LedgerError::InvalidAddress(format!(
            "`{address}` decodes to {} bytes, expected 34",
            decoded.len()
        )));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&decoded[2..]);
    Ok(out)
}

/// Ledger adapter over the chain gateway's json api.
pub struct HttpLedger {
    http: reqwest::Client,
    gateway_url: String,
    oracle_account: String,
}

const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

impl HttpLedger {
    pub fn new(config: &LedgerConfig) -> Result<HttpLedger, LedgerError> {
        let timeout = config.call_timeout_secs.unwrap_or(DEFAULT_CALL_TIMEOUT_SECS);
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout))
            .build()
            .map_err(|e| LedgerError::Transport(e.to_string()))?;
        Ok(HttpLedger {
            http,
            gateway_url: config.gateway_url.trim_end_matches('/').to_string(),
            oracle_account: config.oracle_account.clone(),
        })
    }

    async fn get_record<T: serde::de::DeserializeOwned>(
        &self,
        path: &str
    ) -> Result<T, LedgerError> {
        let url = format!("{}{path}", self.gateway_url);
        let resp = self.http.get(&url).send().await?;
        match resp.status().as_u16() {
            200 => resp
                .json::<T>()
                .await
                .map_err(|e| LedgerError::Malformed(e.to_string())),
            404 => Err(LedgerError::NotFound(path.to_string())),
            s if s >= 500 => Err(LedgerError::Transport(format!("`{path}` answered {s}"))),
            s => Err(LedgerError::Rejected(format!("`{path}` answered {s}"))),
        }
    }

    async fn post_write(
        &self,
        path: &str,
        body: serde_json::Value
    ) -> Result<(), LedgerError> {
        let url = format!("{}{path}", self.gateway_url);
        let resp = self.http.post(&url).json(&body).send().await?;
        match resp.status().as_u16() {
            200 | 201 => Ok(()),
            // the ledger already holds a terminal state for this record,
            // which is exactly what the write was after
            409 => {
                debug!("Write to `{path}` answered 409, treating as settled.");
                Ok(())
            }
            404 => Err(LedgerError::NotFound(path.to_string())),
            s if s >= 500 => Err(LedgerError::Transport(format!("`{path}` answered {s}"))),
            s => {
                let reason = resp.text().await.unwrap_or_default();
                Err(LedgerError::Rejected(format!("`{path}` answered {s}: {reason}")))
            }
        }
    }
}

#[async_trait]
impl Ledger for HttpLedger {
    async fn get_computation(&self, id: &str) -> Result<ComputationRequest, LedgerError> {
        self.get_record(&format!("/computations/{id}")).await
    }

    async fn get_dataset(&self, id: &str) -> Result<ResourceDescriptor, LedgerError> {
        self.get_record(&format!("/datasets/{id}")).await
    }

    async fn get_software(&self, id: &str) -> Result<ResourceDescriptor, LedgerError> {
        self.get_record(&format!("/software/{id}")).await
    }

    async fn get_container(&self, id: &str) -> Result<ContainerDescriptor, LedgerError> {
        self.get_record(&format!("/containers/{id}")).await
    }

    async fn computation_succeed(&self, id: &str) -> Result<(), LedgerError> {
        self.post_write(
            &format!("/computations/{id}/succeed"),
            json!({ "from": self.oracle_account })
        ).await
    }

    async fn computation_failed(&self, id: &str) -> Result<(), LedgerError> {
        self.post_write(
            &format!("/computations/{id}/failed"),
            json!({ "from": self.oracle_account })
        ).await
    }

    async fn add_result_info(&self, owner: &str, result: [u8; 32]) -> Result<(), LedgerError> {
        self.post_write(
            "/results",
            json!({
                "owner": owner,
                "result": format!("0x{}", hex::encode(result)),
                "from": self.oracle_account,
            })
        ).await
    }

    async fn result_error(&self, owner: &str, message: &str) -> Result<(), LedgerError> {
        self.post_write(
            "/results/error",
            json!({
                "owner": owner,
                "message": message,
                "from": self.oracle_account,
            })
        ).await
    }

    async fn computation_events(&self, from_block: u64) -> Result<EventBatch, LedgerError> {
        self.get_record(&format!("/events/computations?from_block={from_block}")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_to_bytes32_matches_fixture() {
        let bytes = result_to_bytes32(
            "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG"
        ).unwrap();
        assert_eq!(
            hex::encode(bytes),
            "9d6c2be50f706953479ab9df2ce3edca90b68053c00b3004b7f0accbe1e8eedf"
        );
    }

    #[test]
    fn conversion_is_pure() {
        let address = "QmWytpiXnWWKjhc494T39H5MbFwdguDjZWjHCg2fZvnquR";
        assert_eq!(
            result_to_bytes32(address).unwrap(),
            result_to_bytes32(address).unwrap()
        );
        assert_eq!(
            hex::encode(result_to_bytes32(address).unwrap()),
            "8067f1ae16f20dea0b65bfcbd50d59014d143c8ecebab179d923f6ef244b40f8"
        );
    }

    #[test]
    fn short_or_invalid_addresses_are_refused() {
        assert!(result_to_bytes32("Qm").is_err());
        assert!(result_to_bytes32("not-base58-0OIl").is_err());
        assert!(result_to_bytes32("").is_err());
    }
}
