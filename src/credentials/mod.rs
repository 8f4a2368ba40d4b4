pub mod cache;
pub mod credential;
pub mod source;

pub use cache::{CredentialCache, CredentialStats};
pub use credential::{ConnectionDescriptor, Credential};
pub use source::{CredentialSource, HttpCredentialSource, IssuedCredential};
