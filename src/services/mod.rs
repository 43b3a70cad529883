pub mod cancellation;
pub mod checkout;
pub mod orders;
pub mod payments;
pub mod pricing;
pub mod reconciliation;
