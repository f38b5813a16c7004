//! CLI for minting tenant bearer tokens
//!
//! Signs with JWT_SECRET / JWT_ISSUER from the environment (or .env) and
//! prints the token to stdout.

use anyhow::{Context, Result};
use clap::Parser;
use otp_core::domains::auth::{JwtService, Role};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "issue_token")]
#[command(about = "Issue a bearer token for a tenant")]
struct Cli {
    /// Tenant that owns the messaging session
    #[arg(long)]
    tenant_id: Uuid,

    #[arg(long)]
    username: String,

    /// user | superadmin
    #[arg(long, default_value = "user")]
    role: Role,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
    let issuer = std::env::var("JWT_ISSUER").unwrap_or_else(|_| "otp-gateway".to_string());

    let token = JwtService::new(&secret, issuer)
        .create_token(cli.tenant_id, cli.username, cli.role)
        .context("Failed to sign token")?;

    println!("{}", token);
    Ok(())
}
