pub mod flutterwave;
pub mod paystack;

pub use flutterwave::{FlutterwaveConfig, FlutterwaveProvider};
pub use paystack::{PaystackConfig, PaystackProvider};
