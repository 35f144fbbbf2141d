use std::collections::BTreeSet;
use std::env;
use std::time::Duration;

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use tracing::warn;

use harbor_chain::keypair::signer_from_hex;

use crate::error::{DaemonError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvMode {
    Dev,
    Production,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainName {
    Anvil,
    Optimism,
    OptimismSepolia,
    Base,
    BaseSepolia,
}

impl ChainName {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "anvil" => Some(ChainName::Anvil),
            "optimism" => Some(ChainName::Optimism),
            "optimism-sepolia" => Some(ChainName::OptimismSepolia),
            "base" => Some(ChainName::Base),
            "base-sepolia" => Some(ChainName::BaseSepolia),
            _ => None,
        }
    }

    /// Registry address baked in for local development; every other chain
    /// requires an explicit `REGISTRY_ADDRESS`.
    pub fn default_registry(&self) -> Option<Address> {
        match self {
            // First deterministic contract deployed by the dev-node account.
            ChainName::Anvil => "0x5FbDB2315678afecb367f032d93F642f64180aa3"
                .parse()
                .ok(),
            _ => None,
        }
    }
}

/// Per-provider configuration, keyed by an alphanumeric tag in the
/// environment (`PROVIDER_PRIVATE_KEY_<tag>` and friends).
#[derive(Debug, Clone)]
pub struct ProviderTagConfig {
    pub tag: String,
    pub owner_key: PrivateKeySigner,
    pub billing_key: PrivateKeySigner,
    pub operator_key: PrivateKeySigner,
    pub operator_pipe_port: u16,
    pub protocol_address: Option<Address>,
    pub is_gateway: bool,
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub database_url: String,
    pub rpc_host: String,
    pub indexer_endpoint: String,
    pub nats_url: Option<String>,
    pub log_level: String,
    pub env_mode: EnvMode,
    pub chain: ChainName,
    pub port: u16,
    pub rate_limit: u32,
    pub rate_limit_window: Duration,
    pub registry_address: Address,
    pub agreement_check_interval: Duration,
    pub balance_check_interval: Duration,
    pub block_process_range: u64,
    pub providers: Vec<ProviderTagConfig>,
}

fn required(name: &str) -> Result<String> {
    env::var(name).map_err(|_| DaemonError::Config(format!("{name} is required")))
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Parse `<number>[s|m|h|d]` durations.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    let (number, unit) = value.split_at(value.len().saturating_sub(1));
    let count: u64 = number
        .parse()
        .map_err(|_| DaemonError::Config(format!("invalid duration: {value}")))?;
    let seconds = match unit {
        "s" => count,
        "m" => count * 60,
        "h" => count * 3600,
        "d" => count * 86400,
        _ => return Err(DaemonError::Config(format!("invalid duration unit: {value}"))),
    };
    Ok(Duration::from_secs(seconds))
}

fn parse_port(name: &str, value: &str) -> Result<u16> {
    let port: u16 = value
        .parse()
        .map_err(|_| DaemonError::Config(format!("{name} must be a port number, got {value}")))?;
    if port == 0 {
        return Err(DaemonError::Config(format!("{name} must be positive")));
    }
    Ok(port)
}

impl DaemonConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = required("DATABASE_URL")?;
        let rpc_host = required("RPC_HOST")?;
        let indexer_endpoint = required("INDEXER_ENDPOINT")?;
        let nats_url = optional("NATS_URL");

        let log_level = optional("LOG_LEVEL").unwrap_or_else(|| "debug".to_string());
        if !matches!(log_level.as_str(), "error" | "warning" | "info" | "debug") {
            return Err(DaemonError::Config(format!(
                "LOG_LEVEL must be one of error|warning|info|debug, got {log_level}"
            )));
        }

        let env_mode = match optional("NODE_ENV").as_deref() {
            None | Some("dev") => EnvMode::Dev,
            Some("production") => EnvMode::Production,
            Some(other) => {
                return Err(DaemonError::Config(format!(
                    "NODE_ENV must be dev or production, got {other}"
                )));
            }
        };

        let chain_name = optional("CHAIN").unwrap_or_else(|| "anvil".to_string());
        let chain = ChainName::parse(&chain_name)
            .ok_or_else(|| DaemonError::Config(format!("unknown CHAIN: {chain_name}")))?;

        let port = match optional("PORT") {
            Some(value) => parse_port("PORT", &value)?,
            None => 3000,
        };

        let rate_limit: u32 = optional("RATE_LIMIT")
            .map(|v| {
                v.parse()
                    .map_err(|_| DaemonError::Config(format!("invalid RATE_LIMIT: {v}")))
            })
            .transpose()?
            .unwrap_or(20);
        let rate_limit_window = match optional("RATE_LIMIT_WINDOW") {
            Some(value) => parse_duration(&value)?,
            None => Duration::from_secs(1),
        };

        let registry_address = match optional("REGISTRY_ADDRESS") {
            Some(value) => value
                .parse::<Address>()
                .map_err(|e| DaemonError::Config(format!("invalid REGISTRY_ADDRESS: {e}")))?,
            None => chain.default_registry().ok_or_else(|| {
                DaemonError::Config(format!(
                    "REGISTRY_ADDRESS is required for chain {chain_name}"
                ))
            })?,
        };

        let agreement_check_interval = match optional("AGREEMENT_CHECK_INTERVAL") {
            Some(value) => parse_duration(&value)?,
            None => Duration::from_secs(5),
        };
        let balance_check_interval = match optional("AGREEMENT_BALANCE_CHECK_INTERVAL") {
            Some(value) => parse_duration(&value)?,
            None => Duration::from_secs(300),
        };
        let block_process_range: u64 = optional("BLOCK_PROCESS_RANGE")
            .map(|v| {
                v.parse()
                    .map_err(|_| DaemonError::Config(format!("invalid BLOCK_PROCESS_RANGE: {v}")))
            })
            .transpose()?
            .unwrap_or(1000);

        let providers = Self::providers_from_env()?;
        if providers.is_empty() {
            return Err(DaemonError::Config(
                "no providers configured: set PROVIDER_PRIVATE_KEY_<tag> for at least one tag"
                    .to_string(),
            ));
        }

        Ok(Self {
            database_url,
            rpc_host,
            indexer_endpoint,
            nats_url,
            log_level,
            env_mode,
            chain,
            port,
            rate_limit,
            rate_limit_window,
            registry_address,
            agreement_check_interval,
            balance_check_interval,
            block_process_range,
            providers,
        })
    }

    fn providers_from_env() -> Result<Vec<ProviderTagConfig>> {
        let tags: BTreeSet<String> = env::vars()
            .filter_map(|(key, _)| {
                key.strip_prefix("PROVIDER_PRIVATE_KEY_")
                    .map(str::to_string)
            })
            .filter(|tag| !tag.is_empty() && tag.chars().all(|c| c.is_ascii_alphanumeric()))
            .collect();

        let mut providers = Vec::new();
        for tag in tags {
            let owner_key = signer_from_hex(&required(&format!("PROVIDER_PRIVATE_KEY_{tag}"))?)
                .map_err(|e| DaemonError::Config(format!("PROVIDER_PRIVATE_KEY_{tag}: {e}")))?;
            let billing_key = signer_from_hex(&required(&format!("BILLING_PRIVATE_KEY_{tag}"))?)
                .map_err(|e| DaemonError::Config(format!("BILLING_PRIVATE_KEY_{tag}: {e}")))?;
            let operator_key = signer_from_hex(&required(&format!("OPERATOR_PRIVATE_KEY_{tag}"))?)
                .map_err(|e| DaemonError::Config(format!("OPERATOR_PRIVATE_KEY_{tag}: {e}")))?;

            let operator_pipe_port = parse_port(
                &format!("OPERATOR_PIPE_PORT_{tag}"),
                &required(&format!("OPERATOR_PIPE_PORT_{tag}"))?,
            )?;

            let protocol_address = match optional(&format!("PROTOCOL_ADDRESS_{tag}")) {
                Some(value) => Some(value.parse::<Address>().map_err(|e| {
                    DaemonError::Config(format!("invalid PROTOCOL_ADDRESS_{tag}: {e}"))
                })?),
                None => {
                    warn!(
                        "PROTOCOL_ADDRESS_{} not set, the provider's first registered protocol will be used",
                        tag
                    );
                    None
                }
            };

            let is_gateway = match optional(&format!("GATEWAY_{tag}")).as_deref() {
                None | Some("false") => false,
                Some("true") => true,
                Some(other) => {
                    return Err(DaemonError::Config(format!(
                        "GATEWAY_{tag} must be true or false, got {other}"
                    )));
                }
            };

            providers.push(ProviderTagConfig {
                tag,
                owner_key,
                billing_key,
                operator_key,
                operator_pipe_port,
                protocol_address,
                is_gateway,
            });
        }
        Ok(providers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_grammar() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert!(parse_duration("5").is_err());
        assert!(parse_duration("s").is_err());
        assert!(parse_duration("5x").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn chain_names() {
        assert_eq!(ChainName::parse("anvil"), Some(ChainName::Anvil));
        assert_eq!(
            ChainName::parse("optimism-sepolia"),
            Some(ChainName::OptimismSepolia)
        );
        assert_eq!(ChainName::parse("base"), Some(ChainName::Base));
        assert_eq!(ChainName::parse("mainnet"), None);
        assert!(ChainName::Anvil.default_registry().is_some());
        assert!(ChainName::Base.default_registry().is_none());
    }

    #[test]
    fn provider_tags_are_discovered_from_env() {
        let key = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
        env::set_var("PROVIDER_PRIVATE_KEY_T1", key);
        env::set_var("BILLING_PRIVATE_KEY_T1", key);
        env::set_var("OPERATOR_PRIVATE_KEY_T1", key);
        env::set_var("OPERATOR_PIPE_PORT_T1", "3001");
        env::set_var("GATEWAY_T1", "true");

        let providers = DaemonConfig::providers_from_env().unwrap();
        let t1 = providers.iter().find(|p| p.tag == "T1").unwrap();
        assert_eq!(t1.operator_pipe_port, 3001);
        assert!(t1.is_gateway);
        assert!(t1.protocol_address.is_none());

        env::remove_var("PROVIDER_PRIVATE_KEY_T1");
        env::remove_var("BILLING_PRIVATE_KEY_T1");
        env::remove_var("OPERATOR_PRIVATE_KEY_T1");
        env::remove_var("OPERATOR_PIPE_PORT_T1");
        env::remove_var("GATEWAY_T1");
    }
}
