use clap::Parser;
use haulage::{Role, TokenService};
use uuid::Uuid;

/// Mints a bearer token for local development and manual testing.
#[derive(Parser)]
#[command(name = "haulage-token")]
#[command(about = "Issue a development JWT for the haulage API")]
struct Args {
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    secret: String,

    #[arg(long)]
    user_id: Uuid,

    /// shipper, carrier or admin
    #[arg(long)]
    role: Role,

    #[arg(long, default_value = "24")]
    ttl_hours: i64,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let tokens = TokenService::new(&args.secret, args.ttl_hours);
    println!("{}", tokens.issue(args.user_id, args.role)?);
    Ok(())
}
