//! Common types shared by the automation auth CLI and API server

mod env;
mod error;
mod secret;

pub use env::{env_bool, env_or, env_parse, env_var};
pub use error::{Error, Result};
pub use secret::Secret;
