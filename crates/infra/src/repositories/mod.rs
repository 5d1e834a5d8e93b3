mod chat;
mod notify;
mod profiles;
mod roles;

pub use chat::*;
pub use notify::*;
pub use profiles::*;
pub use roles::*;
