use crate::error::{EngineError, Result};
use crate::infrastructure::gateways::click::ClickConfig;
use crate::infrastructure::gateways::payme::PaymeConfig;
use crate::infrastructure::gateways::uzum::UzumConfig;
use dotenvy::dotenv;
use std::env;

/// Credentials and endpoints of every payment provider.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayConfig {
    pub click: ClickConfig,
    pub click_api_url: String,
    pub payme: PaymeConfig,
    pub payme_api_url: String,
    pub uzum: UzumConfig,
    pub uzum_api_url: String,
    pub card_api_url: String,
    pub card_api_key: String,
    /// Base of the customer-facing shop, used for the default return url.
    pub public_base_url: String,
}

impl GatewayConfig {
    /// Loads `.env` if present, then reads the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source. Secrets are required; ids and
    /// endpoints fall back to sandbox defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |name: &str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| EngineError::Config(format!("Missing environment variable '{name}'")))
        };
        let optional = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let config = Self {
            click: ClickConfig {
                service_id: optional("CLICK_SERVICE_ID", "0"),
                merchant_id: optional("CLICK_MERCHANT_ID", "0"),
                secret_key: required("CLICK_SECRET_KEY")?,
                checkout_url: optional("CLICK_CHECKOUT_URL", "https://my.click.uz/services/pay"),
            },
            click_api_url: optional("CLICK_API_URL", "https://api.click.uz/v2/merchant"),
            payme: PaymeConfig {
                merchant_id: optional("PAYME_MERCHANT_ID", ""),
                key: required("PAYME_KEY")?,
                checkout_url: optional("PAYME_CHECKOUT_URL", "https://checkout.paycom.uz"),
            },
            payme_api_url: optional("PAYME_API_URL", "https://checkout.paycom.uz/api"),
            uzum: UzumConfig {
                service_id: optional("UZUM_SERVICE_ID", ""),
                secret_key: required("UZUM_SECRET_KEY")?,
            },
            uzum_api_url: optional("UZUM_API_URL", "https://checkout-key.inplat-tech.com/api/v1"),
            card_api_url: optional("CARD_API_URL", "http://127.0.0.1:9090/card"),
            card_api_key: optional("CARD_API_KEY", ""),
            public_base_url: optional("PUBLIC_BASE_URL", "http://127.0.0.1:8080"),
        };

        tracing::info!("Gateway configuration loaded.");
        Ok(config)
    }

    pub fn default_return_url(&self) -> String {
        format!("{}/payments/return", self.public_base_url.trim_end_matches('/'))
    }
}
