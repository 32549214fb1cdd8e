pub mod catalog;
pub mod inventory;
