use serde::{
    Serialize, Deserialize
};

// ledger-side records of one computation request and its resources

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationRequest {
    // ledger-assigned, unique, and the idempotency key for settlement
    pub computation_id: String,

    pub dataset_id: String,
    pub software_id: String,
    pub container_id: String,

    pub requester_account: String,
    // beneficiary account for the stored result
    pub result_owner: String,

    // smallest currency unit
    pub posted_funds: u64,
}

// registry view of a dataset or software artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: String,

    pub cost: u64,

    // fingerprint the provider declared when listing the resource
    pub content_hash: String,

    // address of the artifact the requester actually submitted to the store
    pub content_address: String,

    pub owner_account: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    pub id: String,

    pub cost: u64,

    // id of the underlying execution unit at the container runtime
    pub execution_unit: String,

    pub owner_account: String,
}

// a "computation submitted" event as delivered by the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputationSubmitted {
    pub computation_id: String,
    pub software_id: String,
    pub dataset_id: String,
    pub container_id: String,

    pub block_number: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    pub events: Vec<ComputationSubmitted>,

    // where the next poll should start from
    pub next_block: u64,
}

/// Terminal classification of one settlement attempt. Written back to the
/// ledger exactly once and never re-decided afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementDisposition {
    // payment went to the providers, the result reference was stored
    Committed(String),

    // payment went back to the requester, with the reason recorded
    Reverted(String),
}
