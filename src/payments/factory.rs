use crate::logging::mask_secret;
use crate::payments::error::{PaymentError, PaymentResult};
use crate::payments::provider::PaymentProvider;
use crate::payments::providers::{
    FlutterwaveConfig, FlutterwaveProvider, PaystackConfig, PaystackProvider,
};
use crate::payments::types::PaymentGateway;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone)]
pub struct PaymentFactoryConfig {
    pub enabled_gateways: Vec<PaymentGateway>,
}

impl Default for PaymentFactoryConfig {
    fn default() -> Self {
        Self {
            enabled_gateways: vec![
                PaymentGateway::Paystack,
                PaymentGateway::Flutterwave,
                PaymentGateway::BankTransfer,
                PaymentGateway::Cash,
            ],
        }
    }
}

impl PaymentFactoryConfig {
    pub fn from_env() -> PaymentResult<Self> {
        let enabled_raw = match std::env::var("ENABLED_PAYMENT_GATEWAYS") {
            Ok(v) => v,
            Err(_) => return Ok(Self::default()),
        };

        let mut enabled_gateways = Vec::new();
        for part in enabled_raw.split(',') {
            let value = part.trim();
            if value.is_empty() {
                continue;
            }
            let gateway = PaymentGateway::from_str(value)?;
            if !enabled_gateways.contains(&gateway) {
                enabled_gateways.push(gateway);
            }
        }

        if enabled_gateways.is_empty() {
            return Err(PaymentError::ValidationError {
                message: "at least one payment gateway must be enabled".to_string(),
                field: Some("ENABLED_PAYMENT_GATEWAYS".to_string()),
            });
        }

        Ok(Self { enabled_gateways })
    }

    pub fn is_enabled(&self, gateway: PaymentGateway) -> bool {
        self.enabled_gateways.contains(&gateway)
    }
}

/// Enabled gateways and the hosted clients backing them.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    enabled: Vec<PaymentGateway>,
    providers: HashMap<PaymentGateway, Arc<dyn PaymentProvider>>,
}

impl GatewayRegistry {
    pub fn new(enabled: Vec<PaymentGateway>) -> Self {
        Self {
            enabled,
            providers: HashMap::new(),
        }
    }

    /// Registers a hosted client and marks its gateway enabled.
    pub fn with_provider(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        let gateway = provider.name();
        if !self.enabled.contains(&gateway) {
            self.enabled.push(gateway);
        }
        self.providers.insert(gateway, provider);
        self
    }

    pub fn is_enabled(&self, gateway: PaymentGateway) -> bool {
        self.enabled.contains(&gateway)
    }

    pub fn provider(&self, gateway: PaymentGateway) -> Option<Arc<dyn PaymentProvider>> {
        self.providers.get(&gateway).cloned()
    }

    pub fn enabled_gateways(&self) -> &[PaymentGateway] {
        &self.enabled
    }
}

pub struct PaymentProviderFactory {
    config: PaymentFactoryConfig,
}

impl PaymentProviderFactory {
    pub fn from_env() -> PaymentResult<Self> {
        Ok(Self {
            config: PaymentFactoryConfig::from_env()?,
        })
    }

    pub fn with_config(config: PaymentFactoryConfig) -> Self {
        Self { config }
    }

    /// Builds clients for every enabled hosted gateway. A hosted gateway that
    /// is enabled without credentials is a startup error.
    pub fn build(
        &self,
        paystack: Option<PaystackConfig>,
        flutterwave: Option<FlutterwaveConfig>,
    ) -> PaymentResult<GatewayRegistry> {
        let mut registry = GatewayRegistry::new(self.config.enabled_gateways.clone());

        if self.config.is_enabled(PaymentGateway::Paystack) {
            let config = paystack.ok_or(PaymentError::ValidationError {
                message: "paystack is enabled but not configured".to_string(),
                field: Some("PAYSTACK_SECRET_KEY".to_string()),
            })?;
            info!(key = %mask_secret(&config.secret_key), "paystack client configured");
            registry = registry.with_provider(Arc::new(PaystackProvider::new(config)?));
        }

        if self.config.is_enabled(PaymentGateway::Flutterwave) {
            let config = flutterwave.ok_or(PaymentError::ValidationError {
                message: "flutterwave is enabled but not configured".to_string(),
                field: Some("FLUTTERWAVE_SECRET_KEY".to_string()),
            })?;
            if config.webhook_secret.is_none() && !config.allow_legacy_hash {
                return Err(PaymentError::ValidationError {
                    message: "flutterwave webhooks need FLUTTERWAVE_WEBHOOK_SECRET or the legacy hash enabled"
                        .to_string(),
                    field: Some("FLUTTERWAVE_WEBHOOK_SECRET".to_string()),
                });
            }
            info!(key = %mask_secret(&config.secret_key), "flutterwave client configured");
            registry = registry.with_provider(Arc::new(FlutterwaveProvider::new(config)?));
        }

        info!(
            gateways = ?registry.enabled_gateways(),
            "payment gateways configured"
        );
        Ok(registry)
    }

    pub fn list_available_gateways(&self) -> Vec<PaymentGateway> {
        self.config.enabled_gateways.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_name_parsing_works() {
        assert!(matches!(
            PaymentGateway::from_str("paystack"),
            Ok(PaymentGateway::Paystack)
        ));
        assert!(PaymentGateway::from_str("unknown").is_err());
    }

    #[test]
    fn offline_only_registry_has_no_hosted_clients() {
        let factory = PaymentProviderFactory::with_config(PaymentFactoryConfig {
            enabled_gateways: vec![PaymentGateway::BankTransfer, PaymentGateway::Cash],
        });
        let registry = factory.build(None, None).unwrap();
        assert!(registry.is_enabled(PaymentGateway::Cash));
        assert!(!registry.is_enabled(PaymentGateway::Paystack));
        assert!(registry.provider(PaymentGateway::BankTransfer).is_none());
        assert_eq!(factory.list_available_gateways().len(), 2);
    }

    #[test]
    fn enabled_hosted_gateway_requires_config() {
        let factory = PaymentProviderFactory::with_config(PaymentFactoryConfig {
            enabled_gateways: vec![PaymentGateway::Paystack],
        });
        assert!(factory.build(None, None).is_err());

        let registry = factory
            .build(
                Some(PaystackConfig {
                    secret_key: "sk_test".to_string(),
                    ..PaystackConfig::default()
                }),
                None,
            )
            .unwrap();
        assert!(registry.provider(PaymentGateway::Paystack).is_some());
    }

    #[test]
    fn flutterwave_requires_a_webhook_trust_anchor() {
        let factory = PaymentProviderFactory::with_config(PaymentFactoryConfig {
            enabled_gateways: vec![PaymentGateway::Flutterwave],
        });
        let config = FlutterwaveConfig {
            secret_key: "FLWSECK_TEST".to_string(),
            ..FlutterwaveConfig::default()
        };
        assert!(factory.build(None, Some(config)).is_err());
    }
}
