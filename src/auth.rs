//! Service-account credentials, assertion signing, and redacted secret wrappers.

pub mod credential;
pub mod secret;
pub mod signer;

pub use credential::*;
pub use secret::*;
pub use signer::*;
