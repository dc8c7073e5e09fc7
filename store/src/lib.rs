//! Typed, idempotent gateway over the external relational store.
//!
//! Other components never see SQL or driver errors: every operation returns
//! entity types from `stark_common::types` or a classified [`StoreError`].
//! Every successful write publishes a change event carrying the old and new
//! row so the controller loop and the routing fabric can react.

use anyhow::Result;
use deadpool_postgres::Pool;
use stark_common::args::PostgresArgs;
use stark_common::events::EventBus;

pub mod error;
pub mod namespaces;
pub mod nodes;
pub mod packs;
pub mod pods;
pub mod policies;
pub mod postgres;
pub mod schema;
pub mod services;

pub use error::{StoreError, StoreResult};

#[derive(Clone)]
pub struct Store {
    pub(crate) pool: Pool,
    pub(crate) bus: EventBus,
}

impl Store {
    /// Connect to the backing store and bootstrap the schema.
    pub async fn connect(args: &PostgresArgs, bus: EventBus) -> Result<Self> {
        let pool = postgres::create_pool(args).await?;
        schema::init_schema(&pool).await?;
        Ok(Self { pool, bus })
    }

    /// Assemble from an existing pool, for tests and embedded use.
    pub fn from_pool(pool: Pool, bus: EventBus) -> Self {
        Self { pool, bus }
    }

    pub(crate) async fn client(&self) -> StoreResult<deadpool_postgres::Object> {
        Ok(self.pool.get().await?)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }
}
