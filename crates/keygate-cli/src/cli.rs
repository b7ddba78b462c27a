//! CLI argument definitions for Keygate.
//!
//! All `clap` structures live here so that `main.rs` stays focused on
//! dispatching subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Keygate -- OAuth 2.0 + PKCE sign-in for the terminal.
#[derive(Parser)]
#[command(
    name = "keygate",
    version,
    about = "Keygate -- OAuth 2.0 + PKCE sign-in for the terminal",
    long_about = "Signs in against an OAuth 2.0 issuer with the authorization code flow and PKCE, \
                  keeps the resulting credentials in an encrypted local vault, and answers \
                  token and role queries for scripts."
)]
pub struct Cli {
    /// Client configuration file (TOML).
    #[arg(long, short, global = true, env = "KEYGATE_CONFIG", default_value = "keygate.toml")]
    pub config: PathBuf,

    /// Encrypted credential vault.
    #[arg(long, global = true, env = "KEYGATE_VAULT", default_value = "data/keygate.db")]
    pub vault: PathBuf,

    /// Per-request network timeout in seconds.
    #[arg(long, global = true)]
    pub timeout: Option<u64>,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Sign in through the browser.
    Login {
        /// Seconds to wait for the browser redirect.
        #[arg(long, default_value_t = 300)]
        wait: u64,
    },

    /// Revoke the session at the issuer and delete local credentials.
    Logout,

    /// Validate the stored session against the issuer.
    Status {
        /// Print the session as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print a usable access token, refreshing it if needed.
    Token,

    /// Print the signed-in user's profile as JSON.
    Whoami,

    /// Exit 0 if the signed-in user holds the given roles, 1 otherwise.
    CheckRole {
        /// Role names (case-insensitive).
        #[arg(required = true)]
        roles: Vec<String>,

        /// Require every role instead of any one.
        #[arg(long)]
        all: bool,
    },

    /// Delete local credentials without contacting the issuer.
    Reset,
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
    fn check_role_parses_flags() {
        let cli = Cli::try_parse_from(["keygate", "check-role", "admin", "ops", "--all"]).unwrap();
        match cli.command {
            Commands::CheckRole { roles, all } => {
                assert_eq!(roles, vec!["admin", "ops"]);
                assert!(all);
            }
            _ => panic!("expected check-role"),
        }
    }

    #[test]
    fn check_role_requires_a_role() {
        assert!(Cli::try_parse_from(["keygate", "check-role"]).is_err());
    }
}
