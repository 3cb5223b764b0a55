use edumart_order::{PricingConfig, SettlementPolicy, VnPaySettings};
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Taken from `RUN_MODE`, not from the files.
    #[serde(skip)]
    pub run_mode: String,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: Option<RedisConfig>,
    pub kafka: Option<KafkaConfig>,
    pub auth: AuthConfig,
    pub catalog: CatalogConfig,
    pub payment: PaymentConfig,
    pub business_rules: PricingConfig,
    pub settlement: SettlementConfig,
    pub workers: WorkerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_expiration_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: i64,
}

fn default_rate_limit() -> i64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    /// Unset means the in-process catalog (development only).
    pub base_url: Option<String>,
    #[serde(default = "default_catalog_timeout")]
    pub timeout_ms: u64,
}

fn default_catalog_timeout() -> u64 {
    2000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaymentConfig {
    pub vnpay: VnPaySettings,
    #[serde(default = "default_expiry_minutes")]
    pub expiry_minutes: i64,
}

fn default_expiry_minutes() -> i64 {
    15
}

#[derive(Debug, Deserialize, Clone)]
pub struct SettlementConfig {
    pub hold_days: i64,
    pub batch_size: i64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_failure_backoff")]
    pub failure_backoff_minutes: i64,
}

impl SettlementConfig {
    pub fn policy(&self) -> SettlementPolicy {
        SettlementPolicy {
            hold_days: self.hold_days,
            batch_size: self.batch_size,
            failure_backoff_minutes: self.failure_backoff_minutes,
        }
    }
}

fn default_failure_backoff() -> i64 {
    60
}

fn default_sweep_interval() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_expiry_interval")]
    pub payment_expiry_interval_seconds: u64,
}

fn default_expiry_interval() -> u64 {
    60
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // EDUMART__PAYMENT__VNPAY__HASH_SECRET=... and friends
            .add_source(config::Environment::with_prefix("EDUMART").separator("__"));

        let mut config: Config = builder.build()?.try_deserialize()?;
        config.run_mode = run_mode;
        Ok(config)
    }

    /// Parses a single TOML document with no file or environment layering.
    pub fn from_toml(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }

    /// `RUN_MODE=memory` swaps Postgres, Redis and Kafka for in-process stand-ins.
    pub fn in_memory(&self) -> bool {
        self.run_mode == "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_file_deserializes() {
        let config = Config::from_toml(include_str!("../../config/default.toml")).unwrap();

        assert_eq!(config.business_rules.platform_fee_percent, dec!(30));
        assert_eq!(config.business_rules.currency, "VND");
        assert_eq!(config.settlement.policy().hold_days, 14);
        assert_eq!(config.payment.expiry_minutes, 15);
        assert_eq!(config.payment.vnpay.callback_path, "/payment/callback");
        assert!(config.kafka.is_none());
        assert!(!config.in_memory());
    }
}
