use std::fs;

use serde::Deserialize;

// node configuration as read in from disk

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    // base url of the chain gateway
    pub gateway_url: String,

    // the oracle's signing account, shared read-only by all settlements
    pub oracle_account: String,

    // where event consumption starts on a fresh node
    pub from_block: Option<u64>,

    pub poll_interval_secs: Option<u64>,

    // upper bound for any single gateway call
    pub call_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    // base url of the container runtime's control plane
    pub control_url: String,

    // entrypoint of the in-sandbox wrapper script
    pub wrapper_entrypoint: Option<String>,

    // upper bound for any single runtime call
    pub call_timeout_secs: Option<u64>,

    // PEM key handed to the sandbox so it can encrypt the result
    // for the requester
    pub requester_public_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub listen: String,

    // a request is answered with a failure once this elapses
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    // bounded retries for transport-level failures
    pub max_attempts: Option<u32>,

    pub backoff_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub ledger: LedgerConfig,

    pub runtime: RuntimeConfig,

    pub server: ServerConfig,

    pub settlement: SettlementConfig,
}

impl Config {
    pub fn load(config_file: &str) -> anyhow::Result<Config> {
        let config: Config = toml::from_str(
            &fs::read_to_string(config_file)?
        )?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_config_parses() {
        let config: Config = toml::from_str(
            r#"
            [ledger]
            gateway_url = "http://localhost:9545"
            oracle_account = "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1"
            from_block = 12

            [runtime]
            control_url = "http://localhost:2375"
            call_timeout_secs = 60
            requester_public_key = "-----BEGIN PUBLIC KEY-----"

            [server]
            listen = "127.0.0.1:8081"

            [settlement]
            max_attempts = 3
            backoff_ms = 250
            "#
        ).unwrap();
        assert_eq!(config.ledger.from_block, Some(12));
        assert_eq!(config.runtime.wrapper_entrypoint, None);
        assert_eq!(config.settlement.max_attempts, Some(3));
    }
}
