use crate::cli::actions::EngineArgs;
use crate::sesame;
use anyhow::Result;
use std::{sync::Arc, time::Duration};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub sweep_interval_seconds: u64,
    pub trust_forwarded_for: bool,
    pub engine: EngineArgs,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the engine cannot be built or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let (engine, key_source) = args.engine.build().await?;
    let engine = Arc::new(engine);

    let sweep_interval =
        (args.sweep_interval_seconds > 0).then(|| Duration::from_secs(args.sweep_interval_seconds));

    sesame::new(
        args.port,
        engine,
        key_source,
        sweep_interval,
        args.trust_forwarded_for,
    )
    .await
}
