//! Operator endpoints. Mounted behind `require_staff`.

mod handler;

pub use handler::{
    approve_transactions,
    complete_stakes,
    create_plan,
    reject_transactions,
    set_card_status,
    set_deposit_address,
    set_exchange_rate,
};
