use secrecy::Secret;
use serde::Deserialize;
use service_core::error::AppError;

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub service_name: String,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub stripe: StripeConfig,
    pub ledger: LedgerConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    /// 0 binds a random port.
    pub port: u16,
    /// Comma separated list, or `*` for any origin.
    pub allowed_origins: String,
}

impl ServerConfig {
    pub fn origins(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Mongo,
    Memory,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseConfig {
    pub backend: StorageBackend,
    pub url: Secret<String>,
    pub db_name: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    pub api_base_url: String,
    pub default_currency: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct LedgerConfig {
    /// Reject a second ledger row for the same payment intent.
    pub unique_payment_intents: bool,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ObservabilityConfig {
    pub log_level: String,
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl Config {
    /// Load configuration from defaults, `.env` and the environment.
    ///
    /// Nested keys use the `BOOKING_` prefix and `__` separator, e.g.
    /// `BOOKING_DATABASE__URL`. The bare `PORT` and `STRIPE_SECRET_KEY`
    /// variables take precedence when set.
    pub fn load() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();
        Self::from_source(
            config::Environment::with_prefix("BOOKING")
                .prefix_separator("_")
                .separator("__"),
            std::env::var("PORT").ok(),
            std::env::var("STRIPE_SECRET_KEY").ok(),
        )
    }

    fn from_source<S>(
        source: S,
        port_override: Option<String>,
        stripe_key_override: Option<String>,
    ) -> Result<Self, AppError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let settings = config::Config::builder()
            .set_default("service_name", "booking-service")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("server.allowed_origins", "*")?
            .set_default("database.backend", "mongo")?
            .set_default("database.url", "mongodb://localhost:27017")?
            .set_default("database.db_name", "tourismManagementSystemDB")?
            .set_default("stripe.secret_key", "")?
            .set_default("stripe.api_base_url", "https://api.stripe.com/v1")?
            .set_default("stripe.default_currency", "usd")?
            .set_default("ledger.unique_payment_intents", false)?
            .set_default("observability.log_level", "info")?
            .add_source(source)
            .set_override_option("server.port", port_override)?
            .set_override_option("stripe.secret_key", stripe_key_override)?
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.stripe.default_currency.trim().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "stripe.default_currency must not be empty"
            )));
        }

        if self.server.origins().is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "server.allowed_origins must list at least one origin or '*'"
            )));
        }

        Ok(())
    }
}
