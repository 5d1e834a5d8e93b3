pub mod chat;
pub mod error;
pub mod identity;
pub mod notify;
pub mod ports;
pub mod roles;
pub mod util;

pub type DomainResult<T> = Result<T, error::DomainError>;
