pub mod accounts;
pub mod actor;
pub mod requests;
