pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use factory::{GatewayRegistry, PaymentFactoryConfig, PaymentProviderFactory};
pub use provider::PaymentProvider;
