//! Reconciliation rules applied around every settlement.
//!
//! Pure functions over quotes and transactions; the orchestrator decides
//! when to call them and how to persist the result.

use crate::database::quote_repository::{Quote, QuoteStatus};
use crate::database::transaction_repository::PaymentTransaction;
use crate::payments::types::PaymentType;
use bigdecimal::{BigDecimal, RoundingMode, Zero};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyViolation {
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount { amount: String, reason: String },

    #[error("deposit of {provided} is below the required {required}")]
    InsufficientDeposit { required: String, provided: String },

    #[error("quote {quote_id} is {status} and cannot take payments")]
    QuoteNotPayable { quote_id: Uuid, status: QuoteStatus },
}

/// Outcome of comparing a verified amount against the requested one.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    /// Amount credited to the quote.
    pub amount: BigDecimal,
    /// `verified - requested`, present only when it exceeds the tolerance.
    pub discrepancy: Option<BigDecimal>,
    /// Gateway figure before it was rounded to cents, when rounding changed it.
    pub unrounded: Option<BigDecimal>,
}

#[derive(Debug, Clone)]
pub struct ReconciliationPolicy {
    /// Percentage of the quote total a deposit must cover.
    pub minimum_deposit_percentage: BigDecimal,
    pub amount_tolerance: BigDecimal,
}

impl Default for ReconciliationPolicy {
    fn default() -> Self {
        Self {
            minimum_deposit_percentage: BigDecimal::from(30),
            amount_tolerance: BigDecimal::new(5.into(), 3),
        }
    }
}

impl ReconciliationPolicy {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            minimum_deposit_percentage: std::env::var("MIN_DEPOSIT_PERCENTAGE")
                .ok()
                .and_then(|v| BigDecimal::from_str(v.trim()).ok())
                .unwrap_or(defaults.minimum_deposit_percentage),
            amount_tolerance: std::env::var("PAYMENT_AMOUNT_TOLERANCE")
                .ok()
                .and_then(|v| BigDecimal::from_str(v.trim()).ok())
                .unwrap_or(defaults.amount_tolerance),
        }
    }

    /// Smallest deposit accepted for the quote, rounded up to the minor unit
    /// and capped at what is still outstanding.
    pub fn minimum_deposit(&self, quote: &Quote) -> BigDecimal {
        let raw = &quote.total_amount * &self.minimum_deposit_percentage / BigDecimal::from(100);
        let required = ceil_minor_units(&raw);
        let outstanding = quote.outstanding();
        if required > outstanding {
            outstanding
        } else {
            required
        }
    }

    /// Checks run before any gateway is contacted.
    pub fn validate_payment(
        &self,
        quote: &Quote,
        payment_type: PaymentType,
        amount: &BigDecimal,
    ) -> Result<(), PolicyViolation> {
        validate_amount(amount)?;

        if quote.status == QuoteStatus::Paid {
            return Err(PolicyViolation::InvalidAmount {
                amount: amount.to_string(),
                reason: "quote is already fully paid".to_string(),
            });
        }
        if !quote.status.accepts_payments() {
            return Err(PolicyViolation::QuoteNotPayable {
                quote_id: quote.id,
                status: quote.status,
            });
        }

        let outstanding = quote.outstanding();
        if *amount > outstanding {
            return Err(PolicyViolation::InvalidAmount {
                amount: amount.to_string(),
                reason: format!("exceeds outstanding balance of {}", outstanding),
            });
        }

        match payment_type {
            PaymentType::Full if *amount != outstanding => Err(PolicyViolation::InvalidAmount {
                amount: amount.to_string(),
                reason: format!("full payment must equal outstanding balance of {}", outstanding),
            }),
            PaymentType::Deposit => {
                let required = self.minimum_deposit(quote);
                if *amount < required {
                    Err(PolicyViolation::InsufficientDeposit {
                        required: required.with_scale(2).to_string(),
                        provided: amount.with_scale(2).to_string(),
                    })
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }

    /// The verified figure wins when present; a gap larger than the
    /// tolerance is reported for manual review.
    pub fn settle(&self, requested: &BigDecimal, verified: Option<&BigDecimal>) -> Settlement {
        let Some(raw) = verified else {
            return Settlement {
                amount: requested.clone(),
                discrepancy: None,
                unrounded: None,
            };
        };

        // Stored amounts carry two decimal places.
        let verified = raw.with_scale_round(2, RoundingMode::HalfUp);
        let unrounded = (verified != *raw).then(|| raw.clone());

        let difference = &verified - requested;
        let discrepancy = if difference.abs() > self.amount_tolerance {
            Some(difference)
        } else {
            None
        };

        Settlement {
            amount: verified,
            discrepancy,
            unrounded,
        }
    }

    /// Gateways that omit the currency are trusted to have charged in the
    /// requested one.
    pub fn currency_matches(&self, requested: &str, verified: Option<&str>) -> bool {
        verified.map_or(true, |c| c.trim().eq_ignore_ascii_case(requested.trim()))
    }

    /// Resolves the amount to refund. `None` refunds everything settled.
    pub fn validate_refund(
        &self,
        transaction: &PaymentTransaction,
        amount: Option<&BigDecimal>,
    ) -> Result<BigDecimal, PolicyViolation> {
        let settled = transaction.settled_amount();
        let amount = amount.cloned().unwrap_or_else(|| settled.clone());
        validate_amount(&amount)?;

        if amount > settled {
            return Err(PolicyViolation::InvalidAmount {
                amount: amount.to_string(),
                reason: format!("exceeds settled amount of {}", settled),
            });
        }
        Ok(amount)
    }
}

/// Positive with at most two decimal places.
pub fn validate_amount(amount: &BigDecimal) -> Result<(), PolicyViolation> {
    if *amount <= BigDecimal::zero() {
        return Err(PolicyViolation::InvalidAmount {
            amount: amount.to_string(),
            reason: "amount must be greater than zero".to_string(),
        });
    }
    if amount.with_scale(2) != *amount {
        return Err(PolicyViolation::InvalidAmount {
            amount: amount.to_string(),
            reason: "amount has more than two decimal places".to_string(),
        });
    }
    Ok(())
}

fn ceil_minor_units(value: &BigDecimal) -> BigDecimal {
    // with_scale truncates toward zero, which is floor for positive values.
    let truncated = value.with_scale(2);
    if truncated < *value {
        truncated + BigDecimal::new(1.into(), 2)
    } else {
        truncated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::{PaymentGateway, TransactionState};
    use chrono::Utc;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn quote(total: &str, paid: &str, status: QuoteStatus) -> Quote {
        Quote {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            client_email: "client@example.com".to_string(),
            total_amount: dec(total),
            paid_amount: dec(paid),
            currency: "NGN".to_string(),
            status,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn deposit_floor_is_thirty_percent_rounded_up() {
        let policy = ReconciliationPolicy::default();
        let q = quote("100000", "0", QuoteStatus::Approved);
        assert_eq!(policy.minimum_deposit(&q), dec("30000"));

        let odd = quote("100.01", "0", QuoteStatus::Approved);
        // 30.003 rounds up to the next kobo
        assert_eq!(policy.minimum_deposit(&odd), dec("30.01"));
    }

    #[test]
    fn deposit_floor_never_exceeds_outstanding() {
        let policy = ReconciliationPolicy::default();
        let q = quote("1000", "800", QuoteStatus::PartiallyPaid);
        assert_eq!(policy.minimum_deposit(&q), dec("200"));
    }

    #[test]
    fn deposit_boundary() {
        let policy = ReconciliationPolicy::default();
        let q = quote("100000", "0", QuoteStatus::Approved);

        assert!(policy
            .validate_payment(&q, PaymentType::Deposit, &dec("30000"))
            .is_ok());

        let err = policy
            .validate_payment(&q, PaymentType::Deposit, &dec("29999.99"))
            .unwrap_err();
        assert_eq!(
            err,
            PolicyViolation::InsufficientDeposit {
                required: "30000.00".to_string(),
                provided: "29999.99".to_string(),
            }
        );
    }

    #[test]
    fn full_payment_must_clear_balance() {
        let policy = ReconciliationPolicy::default();
        let q = quote("100000", "30000", QuoteStatus::PartiallyPaid);

        assert!(policy
            .validate_payment(&q, PaymentType::Full, &dec("70000"))
            .is_ok());
        assert!(matches!(
            policy.validate_payment(&q, PaymentType::Full, &dec("50000")),
            Err(PolicyViolation::InvalidAmount { .. })
        ));
    }

    #[test]
    fn rejects_overpayment_and_unpayable_quotes() {
        let policy = ReconciliationPolicy::default();
        let q = quote("1000", "0", QuoteStatus::Approved);
        assert!(matches!(
            policy.validate_payment(&q, PaymentType::Installment, &dec("1000.01")),
            Err(PolicyViolation::InvalidAmount { .. })
        ));

        let paid = quote("1000", "1000", QuoteStatus::Paid);
        assert!(matches!(
            policy.validate_payment(&paid, PaymentType::Installment, &dec("1")),
            Err(PolicyViolation::InvalidAmount { .. })
        ));

        let pending = quote("1000", "0", QuoteStatus::Pending);
        assert_eq!(
            policy.validate_payment(&pending, PaymentType::Installment, &dec("1")),
            Err(PolicyViolation::QuoteNotPayable {
                quote_id: pending.id,
                status: QuoteStatus::Pending
            })
        );
    }

    #[test]
    fn rejects_non_positive_and_sub_kobo_amounts() {
        assert!(validate_amount(&dec("0")).is_err());
        assert!(validate_amount(&dec("-5")).is_err());
        assert!(validate_amount(&dec("10.005")).is_err());
        assert!(validate_amount(&dec("10.50")).is_ok());
    }

    #[test]
    fn settle_prefers_verified_amount_and_flags_gaps() {
        let policy = ReconciliationPolicy::default();

        let short = policy.settle(&dec("30000"), Some(&dec("29999.99")));
        assert_eq!(short.amount, dec("29999.99"));
        assert_eq!(short.discrepancy, Some(dec("-0.01")));

        let exact = policy.settle(&dec("30000"), Some(&dec("30000.00")));
        assert_eq!(exact.discrepancy, None);

        let missing = policy.settle(&dec("30000"), None);
        assert_eq!(missing.amount, dec("30000"));
        assert_eq!(missing.unrounded, None);
    }

    #[test]
    fn settle_rounds_sub_cent_gateway_amounts() {
        let policy = ReconciliationPolicy::default();

        let rounded = policy.settle(&dec("1500.50"), Some(&dec("1500.505")));
        assert_eq!(rounded.amount, dec("1500.51"));
        assert_eq!(rounded.unrounded, Some(dec("1500.505")));
        assert_eq!(rounded.discrepancy, Some(dec("0.01")));

        let down = policy.settle(&dec("1500.50"), Some(&dec("1500.5012")));
        assert_eq!(down.amount, dec("1500.50"));
        assert_eq!(down.unrounded, Some(dec("1500.5012")));
        assert_eq!(down.discrepancy, None);

        let plain = policy.settle(&dec("1500.50"), Some(&dec("1500.5")));
        assert_eq!(plain.unrounded, None);
    }

    #[test]
    fn currency_comparison_ignores_case() {
        let policy = ReconciliationPolicy::default();
        assert!(policy.currency_matches("NGN", Some("ngn")));
        assert!(policy.currency_matches("NGN", None));
        assert!(!policy.currency_matches("NGN", Some("USD")));
    }

    #[test]
    fn refund_bounded_by_settled_amount() {
        let policy = ReconciliationPolicy::default();
        let now = Utc::now();
        let tx = PaymentTransaction {
            id: Uuid::new_v4(),
            reference: "QP_1".to_string(),
            quote_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            amount: dec("30000"),
            currency: "NGN".to_string(),
            gateway: PaymentGateway::Paystack,
            payment_type: PaymentType::Deposit,
            status: TransactionState::Completed,
            gateway_transaction_id: Some("1".to_string()),
            authorization_url: None,
            amount_paid: Some(dec("29999.99")),
            refunded_amount: None,
            failure_reason: None,
            metadata: serde_json::json!({}),
            created_at: now,
            paid_at: Some(now),
            updated_at: now,
        };

        assert_eq!(policy.validate_refund(&tx, None).unwrap(), dec("29999.99"));
        assert_eq!(
            policy.validate_refund(&tx, Some(&dec("100"))).unwrap(),
            dec("100")
        );
        assert!(policy.validate_refund(&tx, Some(&dec("30000"))).is_err());
        assert!(policy.validate_refund(&tx, Some(&dec("0"))).is_err());
    }
}
