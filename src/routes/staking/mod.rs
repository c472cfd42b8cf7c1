mod handler;
pub mod ledger;
pub mod model;

pub use handler::{
    create_deposit,
    create_stake,
    create_swap,
    create_withdrawal,
    dashboard,
    deposit_page,
    order_card,
    swap_page,
    transactions,
};
