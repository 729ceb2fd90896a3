// Core services
pub mod inventory;
pub mod ledger;
pub mod orders;
pub mod reconciliation;
pub mod side_effects;
