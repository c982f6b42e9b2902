use crate::cli::actions::EngineArgs;
use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

#[derive(Debug)]
pub struct Args {
    pub engine: EngineArgs,
}

/// Run a single housekeeping pass.
/// # Errors
/// Returns an error if the engine cannot be built or the store fails.
pub async fn execute(args: Args) -> Result<()> {
    let (engine, _keys) = args.engine.build().await?;
    let deleted = engine
        .sweep(Utc::now())
        .await
        .context("refresh credential sweep failed")?;
    info!(deleted, "sweep complete");
    println!("{deleted}");
    Ok(())
}
