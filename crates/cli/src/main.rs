//! Apotheca CLI - drive the storefront session core from a terminal.
//!
//! # Usage
//!
//! ```bash
//! # Create a vendor account and its pending application
//! apotheca signup -e bob@example.com -p 'correct horse' -n "Bob" -r vendor \
//!     --business-name "Bob Pharmacy" --business-license PH-2231 \
//!     --business-address "1 Main St" --contact-person Bob
//!
//! # Sign in (password may also come from APOTHECA_PASSWORD)
//! apotheca signin -e bob@example.com
//!
//! # Show the signed-in identity and resolved profile
//! apotheca whoami
//!
//! # Follow session changes until Ctrl+C
//! apotheca watch
//!
//! # Run the whole flow against the in-memory backend
//! apotheca demo
//! ```
//!
//! # Commands
//!
//! - `signup` - Register a consumer or vendor
//! - `signin` / `signout` - Start or end the persisted session
//! - `whoami` - Print the current session state
//! - `watch` - Print every session state change
//! - `demo` - Offline walkthrough, no backend needed

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Args, Parser, Subcommand};

use apotheca_core::UserRole;
use apotheca_storefront::error::AppError;
use apotheca_storefront::telemetry::{self, LogFormat};

mod commands;

#[derive(Parser)]
#[command(name = "apotheca")]
#[command(author, version, about = "Apotheca storefront session tools")]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new account
    Signup(SignupArgs),
    /// Sign in with email and password
    Signin {
        /// Account email address
        #[arg(short, long)]
        email: String,

        /// Account password
        #[arg(short, long, env = "APOTHECA_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out of the persisted session
    Signout,
    /// Show the current identity and profile
    Whoami {
        /// Print the state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print every session change until interrupted
    Watch,
    /// Walk through sign-up, sign-in and sign-out against an in-memory backend
    Demo,
}

#[derive(Args)]
pub struct SignupArgs {
    /// Account email address
    #[arg(short, long)]
    pub email: String,

    /// Account password
    #[arg(short, long, env = "APOTHECA_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Full name
    #[arg(short, long)]
    pub name: String,

    /// Account role (`consumer`, `vendor`)
    #[arg(short, long, default_value = "consumer")]
    pub role: UserRole,

    /// Registered business name (vendors)
    #[arg(
        long,
        requires = "business_license",
        requires = "business_address",
        requires = "contact_person"
    )]
    pub business_name: Option<String>,

    /// Pharmacy license number (vendors)
    #[arg(long, requires = "business_name")]
    pub business_license: Option<String>,

    /// Business street address (vendors)
    #[arg(long, requires = "business_name")]
    pub business_address: Option<String>,

    /// Short business description (vendors)
    #[arg(long, requires = "business_name")]
    pub business_description: Option<String>,

    /// Contact person (vendors)
    #[arg(long, requires = "business_name")]
    pub contact_person: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Sentry must be up before the tracing subscriber; the demo runs without
    // backend configuration, so read its settings directly.
    dotenvy::dotenv().ok();
    let _sentry_guard = telemetry::init_sentry(
        std::env::var("SENTRY_DSN").ok().as_deref(),
        std::env::var("SENTRY_ENVIRONMENT").ok(),
    );
    let format = if cli.log_json {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    telemetry::init_tracing(telemetry::DEFAULT_LOG_FILTER, format);

    if let Err(e) = run(cli.command).await {
        e.report();
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<(), AppError> {
    match command {
        Commands::Signup(args) => commands::auth::sign_up(args).await,
        Commands::Signin { email, password } => commands::auth::sign_in(&email, password).await,
        Commands::Signout => commands::auth::sign_out().await,
        Commands::Whoami { json } => commands::session::whoami(json).await,
        Commands::Watch => commands::session::watch().await,
        Commands::Demo => commands::demo::run().await,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_vendor_signup_requires_full_business_details() {
        let partial = Cli::try_parse_from([
            "apotheca",
            "signup",
            "-e",
            "b@x.com",
            "-p",
            "pw",
            "-n",
            "Bob",
            "-r",
            "vendor",
            "--business-name",
            "Bob Pharmacy",
        ]);
        assert!(partial.is_err());

        let full = Cli::try_parse_from([
            "apotheca",
            "signup",
            "-e",
            "b@x.com",
            "-p",
            "pw",
            "-n",
            "Bob",
            "-r",
            "vendor",
            "--business-name",
            "Bob Pharmacy",
            "--business-license",
            "PH-2231",
            "--business-address",
            "1 Main St",
            "--contact-person",
            "Bob",
        ]);
        assert!(full.is_ok());
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let parsed = Cli::try_parse_from([
            "apotheca",
            "signup",
            "-e",
            "a@x.com",
            "-p",
            "pw",
            "-n",
            "Ann",
            "-r",
            "pharmacist",
        ]);
        assert!(parsed.is_err());
    }
}
