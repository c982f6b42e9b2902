use crate::auth::token::{Algorithm, DEFAULT_LEEWAY_SECONDS, FileKeySource};
use anyhow::{Result, anyhow};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;
use std::path::PathBuf;

pub const ARG_ISSUER: &str = "issuer";
pub const ARG_ALGORITHM: &str = "algorithm";
pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_SIGNING_KEY: &str = "signing-key";
pub const ARG_VERIFICATION_KEY: &str = "verification-key";
pub const ARG_LEEWAY_SECONDS: &str = "leeway-seconds";

#[derive(Debug)]
pub struct Options {
    pub issuer: String,
    pub algorithm: Algorithm,
    pub key_source: FileKeySource,
    pub leeway_seconds: i64,
}

impl Options {
    /// Parse token signing arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the key material required by the algorithm is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let issuer = matches
            .get_one::<String>(ARG_ISSUER)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| anyhow!("missing required argument: --{ARG_ISSUER}"))?;

        let algorithm = matches
            .get_one::<String>(ARG_ALGORITHM)
            .map_or("HS256", String::as_str)
            .parse::<Algorithm>()?;

        let key_source = match algorithm {
            Algorithm::HS256 => {
                let secret = matches
                    .get_one::<String>(ARG_JWT_SECRET)
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| {
                        anyhow!("missing required argument: --{ARG_JWT_SECRET} (HS256)")
                    })?;
                FileKeySource::Secret(SecretString::from(secret.clone()))
            }
            Algorithm::RS256 => {
                let signing_key = matches
                    .get_one::<String>(ARG_SIGNING_KEY)
                    .filter(|v| !v.trim().is_empty())
                    .map(PathBuf::from)
                    .ok_or_else(|| {
                        anyhow!("missing required argument: --{ARG_SIGNING_KEY} (RS256)")
                    })?;
                let verification_keys = matches
                    .get_many::<String>(ARG_VERIFICATION_KEY)
                    .map(|paths| paths.map(PathBuf::from).collect())
                    .unwrap_or_default();
                FileKeySource::Rsa {
                    signing_key,
                    verification_keys,
                }
            }
        };

        Ok(Self {
            issuer,
            algorithm,
            key_source,
            leeway_seconds: matches
                .get_one::<i64>(ARG_LEEWAY_SECONDS)
                .copied()
                .unwrap_or(DEFAULT_LEEWAY_SECONDS),
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ISSUER)
                .long(ARG_ISSUER)
                .help("Value of the iss claim in issued access tokens")
                .env("SESAME_ISSUER")
                .default_value("sesame"),
        )
        .arg(
            Arg::new(ARG_ALGORITHM)
                .long(ARG_ALGORITHM)
                .help("Access token signing algorithm")
                .env("SESAME_ALGORITHM")
                .default_value("HS256")
                .value_parser(["HS256", "RS256"]),
        )
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("Shared HS256 secret, at least 32 bytes")
                .env("SESAME_JWT_SECRET")
                .hide_env_values(true)
                .conflicts_with(ARG_SIGNING_KEY),
        )
        .arg(
            Arg::new(ARG_SIGNING_KEY)
                .long(ARG_SIGNING_KEY)
                .help("Path to the active RS256 private key (PEM or DER, PKCS#1 or PKCS#8)")
                .env("SESAME_SIGNING_KEY"),
        )
        .arg(
            Arg::new(ARG_VERIFICATION_KEY)
                .long(ARG_VERIFICATION_KEY)
                .help("Path to a retired RS256 public key that should still verify tokens")
                .long_help(
                    "Path to a retired RS256 public key that should still verify tokens. \
                     Repeat the flag, or comma-separate paths in the environment variable.",
                )
                .env("SESAME_VERIFICATION_KEYS")
                .value_delimiter(',')
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new(ARG_LEEWAY_SECONDS)
                .long(ARG_LEEWAY_SECONDS)
                .help("Clock skew tolerated when checking exp and iat")
                .env("SESAME_LEEWAY_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(i64).range(0..=300)),
        )
}
