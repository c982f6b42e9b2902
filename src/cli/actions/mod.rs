pub mod server;
pub mod sweep;

// Internal "interpreter" for `Action`.
mod run;

use crate::auth::password::PasswordHasher;
use crate::auth::session::{SessionConfig, SessionEngine};
use crate::auth::store::{
    AccountStore, RefreshCredentialStore,
    memory::{MemoryAccountStore, MemoryCredentialStore},
    postgres::{self, PgAccountStore, PgCredentialStore},
};
use crate::auth::token::{Algorithm, FileKeySource, KeySource, TokenCodec};
use crate::cli::commands::store::Backend;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug)]
pub enum Action {
    Server(server::Args),
    Sweep(sweep::Args),
}

impl Action {
    /// Execute the action.
    /// # Errors
    /// Returns an error if the action fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        run::execute(self).await
    }
}

/// Everything needed to assemble a [`SessionEngine`].
#[derive(Debug)]
pub struct EngineArgs {
    pub backend: Backend,
    pub issuer: String,
    pub algorithm: Algorithm,
    pub key_source: FileKeySource,
    pub leeway_seconds: i64,
    pub password_cost: u32,
    pub session: SessionConfig,
}

impl EngineArgs {
    /// Load the keys, connect the stores and build the engine. The key source
    /// is handed back so the server can reload it later.
    ///
    /// # Errors
    /// Returns an error if the key material is unusable or the database is unreachable.
    pub async fn build(self) -> Result<(SessionEngine, Arc<dyn KeySource>)> {
        let key_source: Arc<dyn KeySource> = Arc::new(self.key_source);
        let keys = key_source.load().context("failed to load signing keys")?;
        let codec = TokenCodec::new(self.algorithm, self.issuer, keys)
            .context("signing keys do not match --algorithm")?
            .with_leeway(chrono::Duration::seconds(self.leeway_seconds));
        info!(
            algorithm = %codec.algorithm(),
            issuer = codec.issuer(),
            kid = ?codec.active_kid(),
            "token codec ready"
        );

        let (accounts, credentials): (Arc<dyn AccountStore>, Arc<dyn RefreshCredentialStore>) =
            match &self.backend {
                Backend::Postgres(dsn) => {
                    let pool = postgres::connect(dsn).await?;
                    info!(dsn = %self.backend.redacted(), "connected to database");
                    (
                        Arc::new(PgAccountStore::new(pool.clone())),
                        Arc::new(PgCredentialStore::new(pool)),
                    )
                }
                Backend::Memory => {
                    warn!("using the in-memory store, nothing survives a restart");
                    (
                        Arc::new(MemoryAccountStore::new()),
                        Arc::new(MemoryCredentialStore::new()),
                    )
                }
            };

        let engine = SessionEngine::new(
            accounts,
            credentials,
            PasswordHasher::new(self.password_cost),
            Arc::new(codec),
            self.session,
        );

        Ok((engine, key_source))
    }
}
