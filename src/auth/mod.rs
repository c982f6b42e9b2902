//! Credential lifecycle: password verification, access tokens and rotating
//! refresh credentials.

pub mod account;
pub mod credential;
pub mod error;
pub mod password;
pub mod session;
pub mod store;
pub mod token;
pub mod utils;

pub use error::{AuthError, ErrorKind};
pub use session::{SessionConfig, SessionEngine, TokenPair};
