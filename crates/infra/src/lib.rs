pub mod auth;
pub mod config;
pub mod crm;
pub mod logging;
pub mod repositories;
