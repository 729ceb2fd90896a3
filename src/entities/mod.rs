pub mod callback_log;
pub mod order;
pub mod order_item;
pub mod payment_transaction;
pub mod product;
