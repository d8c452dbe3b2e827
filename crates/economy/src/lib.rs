//! The EdgeCoder credit economy.
//!
//! Usage-metered accrual, spend accounting with a contribution-first policy,
//! demand-driven pricing, Lightning payment intents, and the rolling token
//! issuance engine.

pub mod credits;
pub mod issuance;
pub mod payments;
pub mod pricing;

pub use credits::{CreditEngine, CreditPolicy, FixedQuality, QualityPolicy, SyncReport};
pub use issuance::{ContributionWeight, IssuanceEngine, IssuanceEpochBundle, IssuanceParams};
pub use payments::{
    InvoiceHandle, InvoiceRequest, LightningProvider, PaymentManager, Settlement,
};
pub use pricing::{load_multiplier, price_per_compute_unit_sats};
