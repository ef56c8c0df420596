pub mod guard;
pub mod history;
pub mod ledger;
pub mod raw;
