//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to an [`Action`] with fully parsed settings, so
//! the actions never touch `clap` again.

use crate::cli::actions::{Action, EngineArgs, server, sweep};
use crate::cli::commands::{
    ARG_PORT, ARG_SWEEP_INTERVAL_SECONDS, ARG_TRUST_FORWARDED_FOR, CMD_SERVER, CMD_SWEEP, session,
    store, token,
};
use anyhow::{Result, anyhow};
use clap::ArgMatches;

/// Map validated CLI matches to an action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    match matches.subcommand() {
        Some((CMD_SERVER, sub)) => Ok(Action::Server(server::Args {
            port: sub.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080),
            sweep_interval_seconds: sub
                .get_one::<u64>(ARG_SWEEP_INTERVAL_SECONDS)
                .copied()
                .unwrap_or(3600),
            trust_forwarded_for: sub.get_flag(ARG_TRUST_FORWARDED_FOR),
            engine: engine_args(sub)?,
        })),
        Some((CMD_SWEEP, sub)) => Ok(Action::Sweep(sweep::Args {
            engine: engine_args(sub)?,
        })),
        Some((other, _)) => Err(anyhow!("unknown command: {other}")),
        None => Err(anyhow!("missing command")),
    }
}

fn engine_args(matches: &ArgMatches) -> Result<EngineArgs> {
    let store_opts = store::Options::parse(matches)?;
    let token_opts = token::Options::parse(matches)?;
    let session_opts = session::Options::parse(matches)?;

    Ok(EngineArgs {
        backend: store_opts.backend,
        issuer: token_opts.issuer,
        algorithm: token_opts.algorithm,
        key_source: token_opts.key_source,
        leeway_seconds: token_opts.leeway_seconds,
        password_cost: session_opts.password_cost,
        session: session_opts.config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::token::Algorithm;
    use crate::cli::commands::store::Backend;

    const ENV: [(&str, Option<&str>); 6] = [
        ("SESAME_DSN", None),
        ("SESAME_ALGORITHM", None),
        ("SESAME_JWT_SECRET", None),
        ("SESAME_SIGNING_KEY", None),
        ("SESAME_PORT", None),
        ("SESAME_TRUST_FORWARDED_FOR", None),
    ];

    #[test]
    fn server_action() {
        temp_env::with_vars(ENV, || {
            let matches = crate::cli::commands::new().get_matches_from(vec![
                "sesame",
                "server",
                "--dsn",
                "memory://",
                "--jwt-secret",
                "0123456789abcdef0123456789abcdef",
            ]);
            let action = handler(&matches).unwrap();
            let Action::Server(args) = action else {
                panic!("expected server action");
            };
            assert_eq!(args.port, 8080);
            assert!(!args.trust_forwarded_for);
            assert_eq!(args.engine.backend, Backend::Memory);
            assert_eq!(args.engine.algorithm, Algorithm::HS256);
        });
    }

    #[test]
    fn server_trusts_forwarded_for_only_when_asked() {
        temp_env::with_vars(ENV, || {
            let matches = crate::cli::commands::new().get_matches_from(vec![
                "sesame",
                "server",
                "--dsn",
                "memory://",
                "--jwt-secret",
                "0123456789abcdef0123456789abcdef",
                "--trust-forwarded-for",
            ]);
            let Ok(Action::Server(args)) = handler(&matches) else {
                panic!("expected server action");
            };
            assert!(args.trust_forwarded_for);
        });
    }

    #[test]
    fn sweep_action() {
        temp_env::with_vars(ENV, || {
            let matches = crate::cli::commands::new().get_matches_from(vec![
                "sesame",
                "sweep",
                "--dsn",
                "postgres://sesame@localhost:5432/sesame",
                "--jwt-secret",
                "0123456789abcdef0123456789abcdef",
            ]);
            assert!(matches!(handler(&matches), Ok(Action::Sweep(_))));
        });
    }

    #[test]
    fn missing_key_material() {
        temp_env::with_vars(ENV, || {
            let matches = crate::cli::commands::new().get_matches_from(vec![
                "sesame",
                "server",
                "--dsn",
                "memory://",
                "--algorithm",
                "RS256",
            ]);
            let result = handler(&matches);
            assert!(result.is_err());
            if let Err(err) = result {
                assert!(
                    err.to_string()
                        .contains("missing required argument: --signing-key")
                );
            }
        });
    }
}
