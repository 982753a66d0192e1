pub mod layout;
pub mod reads;
pub mod store;
