//! DOM gateway CLI: the main entry point.
//!
//! Commands:
//! - `serve`         Start the HTTP gateway
//! - `init-db`       Create the database and apply the schema
//! - `sign-session`  Issue a local session cookie for a user (dev mode)
//! - `onboard`       Write a default config file
//! - `config`        Validate or locate the configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "domgate",
    about = "DOM gateway: multi-tenant conversational decision assistant",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "DOMGATE_LOG_JSON")]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway server
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the bind address
        #[arg(long)]
        host: Option<String>,
    },

    /// Create the database and apply the schema
    InitDb,

    /// Issue a session cookie value for a user (local session mode only)
    SignSession {
        /// Email of the user to sign in; provisioned on first use
        #[arg(short, long)]
        email: String,
    },

    /// Write a default config file
    Onboard,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Load, apply environment overrides and validate
    Validate,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt().json().with_env_filter(env_filter).init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Serve { port, host } => commands::serve::run(port, host).await?,
        Commands::InitDb => commands::init_db::run().await?,
        Commands::SignSession { email } => commands::sign_session::run(&email).await?,
        Commands::Onboard => commands::onboard::run()?,
        Commands::Config { action } => match action {
            ConfigAction::Validate => commands::config_cmd::validate()?,
            ConfigAction::Path => commands::config_cmd::path(),
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_serve_overrides() {
        let cli = Cli::try_parse_from(["domgate", "-v", "serve", "--port", "9000"]).unwrap();
        assert!(cli.verbose);
        match cli.command {
            Commands::Serve { port, host } => {
                assert_eq!(port, Some(9000));
                assert!(host.is_none());
            }
            _ => panic!("expected serve"),
        }
    }

    #[test]
    fn sign_session_requires_email() {
        assert!(Cli::try_parse_from(["domgate", "sign-session"]).is_err());
        let cli = Cli::try_parse_from(["domgate", "sign-session", "--email", "ana@acme.test"]).unwrap();
        assert!(matches!(cli.command, Commands::SignSession { ref email } if email == "ana@acme.test"));
    }
}
