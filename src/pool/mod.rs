pub mod factory;
pub mod inner;
pub mod manager;

pub use factory::{ConnectionFactory, PgFactory};
pub use inner::PooledConnection;
pub use manager::{PoolManager, PoolStats};
