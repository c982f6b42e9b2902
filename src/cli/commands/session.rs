use crate::auth::password::{DEFAULT_COST, MAX_COST, MIN_COST};
use crate::auth::session::{
    DEFAULT_ACCESS_TTL_SECONDS, DEFAULT_PASSWORD_RESET_TTL_SECONDS, DEFAULT_REFRESH_TTL_SECONDS,
    DEFAULT_REPLAY_GRACE_SECONDS,
    DEFAULT_RETENTION_SECONDS, DEFAULT_VERIFICATION_TTL_SECONDS, MAX_LIFETIME_SECONDS,
    ReplayResponse, SessionConfig,
};
use anyhow::{Result, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_ACCESS_TTL_SECONDS: &str = "access-ttl-seconds";
pub const ARG_REFRESH_TTL_SECONDS: &str = "refresh-ttl-seconds";
pub const ARG_VERIFICATION_TTL_SECONDS: &str = "verification-ttl-seconds";
pub const ARG_PASSWORD_RESET_TTL_SECONDS: &str = "password-reset-ttl-seconds";
pub const ARG_PASSWORD_COST: &str = "password-cost";
pub const ARG_REQUIRE_VERIFIED_EMAIL: &str = "require-verified-email";
pub const ARG_REPLAY_RESPONSE: &str = "replay-response";
pub const ARG_REPLAY_GRACE_SECONDS: &str = "replay-grace-seconds";
pub const ARG_RETENTION_SECONDS: &str = "retention-seconds";

#[derive(Debug, Clone)]
pub struct Options {
    pub password_cost: u32,
    pub config: SessionConfig,
}

impl Options {
    /// Parse session lifetime and policy arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the refresh lifetime is not longer than the access lifetime.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let read_i64 = |id: &str, default: i64| -> i64 {
            matches.get_one::<i64>(id).copied().unwrap_or(default)
        };

        let access_ttl = read_i64(ARG_ACCESS_TTL_SECONDS, DEFAULT_ACCESS_TTL_SECONDS);
        let refresh_ttl = read_i64(ARG_REFRESH_TTL_SECONDS, DEFAULT_REFRESH_TTL_SECONDS);
        if refresh_ttl <= access_ttl {
            return Err(anyhow!(
                "--{ARG_REFRESH_TTL_SECONDS} ({refresh_ttl}) must be greater than --{ARG_ACCESS_TTL_SECONDS} ({access_ttl})"
            ));
        }

        let replay_response = matches
            .get_one::<String>(ARG_REPLAY_RESPONSE)
            .map(|v| v.parse::<ReplayResponse>())
            .transpose()
            .map_err(|err| anyhow!(err))?
            .unwrap_or_default();

        let config = SessionConfig::new()
            .with_access_ttl_seconds(access_ttl)
            .with_refresh_ttl_seconds(refresh_ttl)
            .with_verification_ttl_seconds(read_i64(
                ARG_VERIFICATION_TTL_SECONDS,
                DEFAULT_VERIFICATION_TTL_SECONDS,
            ))
            .with_password_reset_ttl_seconds(read_i64(
                ARG_PASSWORD_RESET_TTL_SECONDS,
                DEFAULT_PASSWORD_RESET_TTL_SECONDS,
            ))
            .with_require_verified_email(matches.get_flag(ARG_REQUIRE_VERIFIED_EMAIL))
            .with_replay_response(replay_response)
            .with_replay_grace_seconds(read_i64(
                ARG_REPLAY_GRACE_SECONDS,
                DEFAULT_REPLAY_GRACE_SECONDS,
            ))
            .with_retention_seconds(read_i64(ARG_RETENTION_SECONDS, DEFAULT_RETENTION_SECONDS));

        Ok(Self {
            password_cost: matches
                .get_one::<u32>(ARG_PASSWORD_COST)
                .copied()
                .unwrap_or(DEFAULT_COST),
            config,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_lifetime_args(command);
    with_policy_args(command)
}

fn with_lifetime_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCESS_TTL_SECONDS)
                .long(ARG_ACCESS_TTL_SECONDS)
                .help("Access token lifetime in seconds")
                .env("SESAME_ACCESS_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_SECONDS)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL_SECONDS)
                .long(ARG_REFRESH_TTL_SECONDS)
                .help("Refresh token lifetime in seconds")
                .env("SESAME_REFRESH_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_SECONDS)),
        )
        .arg(
            Arg::new(ARG_VERIFICATION_TTL_SECONDS)
                .long(ARG_VERIFICATION_TTL_SECONDS)
                .help("Email verification token lifetime in seconds")
                .env("SESAME_VERIFICATION_TTL_SECONDS")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_SECONDS)),
        )
        .arg(
            Arg::new(ARG_PASSWORD_RESET_TTL_SECONDS)
                .long(ARG_PASSWORD_RESET_TTL_SECONDS)
                .help("Password reset token lifetime in seconds")
                .env("SESAME_PASSWORD_RESET_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64).range(1..=MAX_LIFETIME_SECONDS)),
        )
        .arg(
            Arg::new(ARG_RETENTION_SECONDS)
                .long(ARG_RETENTION_SECONDS)
                .help("How long revoked refresh credentials are kept before the sweep deletes them")
                .env("SESAME_RETENTION_SECONDS")
                .default_value("2592000")
                .value_parser(clap::value_parser!(i64).range(0..=MAX_LIFETIME_SECONDS)),
        )
}

fn with_policy_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PASSWORD_COST)
                .long(ARG_PASSWORD_COST)
                .help(format!(
                    "Argon2id iteration count, clamped to {MIN_COST}..={MAX_COST}"
                ))
                .env("SESAME_PASSWORD_COST")
                .default_value("3")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_REQUIRE_VERIFIED_EMAIL)
                .long(ARG_REQUIRE_VERIFIED_EMAIL)
                .help("Refuse logins until the email address is verified")
                .env("SESAME_REQUIRE_VERIFIED_EMAIL")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_REPLAY_RESPONSE)
                .long(ARG_REPLAY_RESPONSE)
                .help("What to do when a revoked refresh token is presented again")
                .env("SESAME_REPLAY_RESPONSE")
                .default_value("reject")
                .value_parser(["reject", "revoke-all"]),
        )
        .arg(
            Arg::new(ARG_REPLAY_GRACE_SECONDS)
                .long(ARG_REPLAY_GRACE_SECONDS)
                .help("Replays this soon after revocation never trigger revoke-all")
                .env("SESAME_REPLAY_GRACE_SECONDS")
                .default_value("10")
                .value_parser(clap::value_parser!(i64).range(0..=MAX_LIFETIME_SECONDS)),
        )
}
