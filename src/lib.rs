pub mod config;
pub mod credentials;
pub mod error;
pub mod pool;
pub mod service;

pub use config::{CredentialSettings, DbConfig, PoolSettings, SourceSettings};
pub use credentials::cache::{CredentialCache, CredentialStats};
pub use credentials::credential::{ConnectionDescriptor, Credential};
pub use credentials::source::{CredentialSource, HttpCredentialSource, IssuedCredential};
pub use error::{classify, ErrorClass, PoolError, SourceError};
pub use pool::factory::{ConnectionFactory, PgFactory};
pub use pool::inner::PooledConnection;
pub use pool::manager::{PoolManager, PoolStats};
pub use service::{ManagedDatabase, ServiceStats};
