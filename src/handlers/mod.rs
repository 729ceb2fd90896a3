pub mod callbacks;
pub mod checkout;
pub mod payments;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::gateway::PaymentGateway;
use crate::notifications::{ConfirmationSender, HttpConfirmationSender, LogConfirmationSender};
use crate::services::{
    inventory::InventoryService, ledger::TransactionLedger, orders::CheckoutService,
    reconciliation::StatusReconciler, side_effects::SideEffectCoordinator,
};
use slog::Logger;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub ledger: Arc<TransactionLedger>,
    pub reconciler: Arc<StatusReconciler>,
    pub inventory: Arc<InventoryService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        gateway: Arc<dyn PaymentGateway>,
        config: &AppConfig,
        base_logger: Logger,
    ) -> Self {
        let mail_logger = base_logger.new(slog::o!("component" => "confirmation_sender"));

        let ledger = Arc::new(TransactionLedger::new(db_pool.clone()));
        let inventory = Arc::new(InventoryService::new(db_pool));

        let confirmation: Arc<dyn ConfirmationSender> = match &config.email.delivery_endpoint {
            Some(endpoint) => Arc::new(HttpConfirmationSender::new(
                endpoint.clone(),
                config.email.from_address.clone(),
                mail_logger,
            )),
            None => Arc::new(LogConfirmationSender::new(mail_logger)),
        };

        let side_effects = Arc::new(SideEffectCoordinator::new(
            ledger.clone(),
            inventory.clone(),
            confirmation,
            Some(event_sender.clone()),
        ));

        let reconciler = Arc::new(StatusReconciler::new(
            gateway.clone(),
            ledger.clone(),
            side_effects,
            Some(event_sender.clone()),
        ));

        let checkout = Arc::new(CheckoutService::new(
            ledger.clone(),
            inventory.clone(),
            gateway,
            Some(event_sender),
            config.default_currency.clone(),
        ));

        Self {
            checkout,
            ledger,
            reconciler,
            inventory,
        }
    }
}
