use anyhow::Context;
use clap::{Args, ValueEnum};
use serde_json::json;

use crate::auth::{generate_jwt, AccessLevel, Claims};
use crate::cli::utils::output_success;
use crate::cli::OutputFormat;
use crate::config::config;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum AccessArg {
    Deny,
    Read,
    Edit,
    Full,
    Root,
}

impl From<AccessArg> for AccessLevel {
    fn from(arg: AccessArg) -> Self {
        match arg {
            AccessArg::Deny => AccessLevel::Deny,
            AccessArg::Read => AccessLevel::Read,
            AccessArg::Edit => AccessLevel::Edit,
            AccessArg::Full => AccessLevel::Full,
            AccessArg::Root => AccessLevel::Root,
        }
    }
}

#[derive(Args)]
pub struct TokenArgs {
    #[arg(long, help = "Token subject")]
    pub subject: String,

    #[arg(long, help = "Id of the user record the token acts as")]
    pub user: Option<String>,

    #[arg(long, value_enum, default_value = "edit", help = "Access level")]
    pub access: AccessArg,

    #[arg(long, help = "Lifetime in hours (defaults to HIVE_JWT_EXPIRY_HOURS)")]
    pub hours: Option<u64>,
}

pub fn handle(args: TokenArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let security = &config().security;
    let hours = args.hours.unwrap_or(security.jwt_expiry_hours);
    let claims = Claims::new(args.subject, args.user, args.access.into(), hours);
    let token = generate_jwt(&security.jwt_secret, &claims).context("failed to mint token")?;

    match output_format {
        OutputFormat::Text => println!("{}", token),
        OutputFormat::Json => output_success(
            &output_format,
            "Token issued",
            Some(json!({ "token": token, "expires_at": claims.exp })),
        )?,
    }
    Ok(())
}
