use std::time::Duration;

use anyhow::Result;

use crate::backend::smpp::SmppConfig;
use crate::backend::wasp::WaspConfig;

// Default time bounds
const DEFAULT_CORREL_RETRY_MS: u64 = 1000;
const DEFAULT_SMPP_RESPONSE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_WASP_TIMEOUT_MS: u64 = 15_000;

const DEFAULT_HEALTH_PORT: u16 = 8081;

/// Which carrier backend handles non-test submissions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Smpp,
    Wasp,
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "SMPP" => Ok(Self::Smpp),
            "WASP" => Ok(Self::Wasp),
            _ => anyhow::bail!("Not a valid backend: {}. Must be 'SMPP' or 'WASP'", s),
        }
    }
}

/// Kafka channel configuration.
#[derive(Clone, Debug)]
pub struct KafkaConfig {
    /// Comma-separated list of brokers.
    pub brokers: String,
    /// Topic carrying inbound send requests.
    pub inbound_topic: String,
    /// Topic carrying outbound status events.
    pub outbound_topic: String,
    /// Compacted topic persisting the correlation table.
    pub correl_topic: String,
    /// Consumer group for the inbound topic.
    pub group_id: String,
    pub client_id: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Client ids allowed to send through this gateway.
    pub allowed_clients: Vec<String>,
    /// Directory of per-client PKCS#8 PEM key files.
    pub key_dir: String,
    /// Directory for per-client TSV response logs; unset disables the log.
    pub client_log_dir: Option<String>,
    pub backend: BackendKind,
    /// Wait before the single correlation lookup retry.
    pub correl_retry: Duration,
    pub health_port: u16,
    pub rust_log: String,
    pub kafka: KafkaConfig,
    pub smpp: SmppConfig,
    pub wasp: WaspConfig,
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let allowed_clients: Vec<String> = std::env::var("SMS_GATEWAY_ALLOWED_CLIENTS")?
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        if allowed_clients.is_empty() {
            anyhow::bail!("SMS_GATEWAY_ALLOWED_CLIENTS must list at least one client id");
        }

        let backend: BackendKind = env_or("SMS_GATEWAY_BACKEND", "SMPP").parse()?;

        let wasp = WaspConfig {
            endpoints: std::env::var("SMS_GATEWAY_WASP_URLS")
                .unwrap_or_default()
                .split(',')
                .map(|u| u.trim().to_string())
                .filter(|u| !u.is_empty())
                .collect(),
            username: env_or("SMS_GATEWAY_WASP_USERNAME", ""),
            password: env_or("SMS_GATEWAY_WASP_PASSWORD", ""),
            request_timeout: Duration::from_millis(env_parse_or(
                "SMS_GATEWAY_WASP_TIMEOUT_MS",
                DEFAULT_WASP_TIMEOUT_MS,
            )),
        };
        if backend == BackendKind::Wasp && wasp.endpoints.is_empty() {
            anyhow::bail!("WASP backend selected but SMS_GATEWAY_WASP_URLS is empty");
        }

        Ok(Self {
            allowed_clients,
            key_dir: std::env::var("SMS_GATEWAY_KEY_DIR")?,
            client_log_dir: std::env::var("SMS_GATEWAY_CLIENT_LOG_DIR")
                .ok()
                .filter(|d| !d.is_empty()),
            backend,
            correl_retry: Duration::from_millis(env_parse_or(
                "SMS_GATEWAY_CORREL_RETRY_MS",
                DEFAULT_CORREL_RETRY_MS,
            )),
            health_port: env_parse_or("HEALTH_PORT", DEFAULT_HEALTH_PORT),
            rust_log: env_or("RUST_LOG", "info"),
            kafka: KafkaConfig {
                brokers: env_or("SMS_GATEWAY_KAFKA_BROKERS", "localhost:9092"),
                inbound_topic: env_or("SMS_GATEWAY_KAFKA_INBOUND_TOPIC", "send-sms"),
                outbound_topic: env_or("SMS_GATEWAY_KAFKA_OUTBOUND_TOPIC", "sms-status"),
                correl_topic: env_or("SMS_GATEWAY_KAFKA_CORREL_TOPIC", "sms-correl"),
                group_id: env_or("SMS_GATEWAY_KAFKA_GROUP_ID", "sms-gateway"),
                client_id: env_or("SMS_GATEWAY_KAFKA_CLIENT_ID", "sms-gateway"),
            },
            smpp: SmppConfig {
                host: env_or("SMS_GATEWAY_SMPP_HOST", "localhost"),
                port: env_parse_or("SMS_GATEWAY_SMPP_PORT", 2775),
                system_id: env_or("SMS_GATEWAY_SMPP_SYSTEM_ID", ""),
                password: env_or("SMS_GATEWAY_SMPP_PASSWORD", ""),
                response_timeout: Duration::from_millis(env_parse_or(
                    "SMS_GATEWAY_SMPP_RESPONSE_TIMEOUT_MS",
                    DEFAULT_SMPP_RESPONSE_TIMEOUT_MS,
                )),
            },
            wasp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_kind_parses() {
        assert_eq!("smpp".parse::<BackendKind>().unwrap(), BackendKind::Smpp);
        assert_eq!("WASP".parse::<BackendKind>().unwrap(), BackendKind::Wasp);
        assert!("carrier-pigeon".parse::<BackendKind>().is_err());
    }
}
