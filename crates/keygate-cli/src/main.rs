//! CLI entry point for Keygate.
//!
//! This binary provides the `keygate` command with subcommands for signing
//! in and out, printing tokens, and checking roles from scripts.

mod cli;
mod helpers;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use keygate_auth::SessionState;
use tracing::{info, warn};

use crate::cli::{Cli, Commands};
use crate::helpers::{Runtime, build_runtime, init_tracing};

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(if cli.verbose { "debug" } else { "warn" });

    let wait = match &cli.command {
        Commands::Login { wait } => Duration::from_secs(*wait),
        _ => keygate_auth::LoopbackAgent::DEFAULT_TIMEOUT,
    };
    let runtime = build_runtime(&cli.config, &cli.vault, cli.timeout, wait)?;

    let code = match cli.command {
        Commands::Login { .. } => cmd_login(&runtime).await?,
        Commands::Logout => cmd_logout(&runtime).await?,
        Commands::Status { json } => cmd_status(&runtime, json).await?,
        Commands::Token => cmd_token(&runtime).await?,
        Commands::Whoami => cmd_whoami(&runtime).await?,
        Commands::CheckRole { roles, all } => cmd_check_role(&runtime, &roles, all).await?,
        Commands::Reset => cmd_reset(&runtime).await?,
    };

    runtime.session.dispose();
    Ok(code)
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

async fn cmd_login(rt: &Runtime) -> Result<ExitCode> {
    match rt.session.login(&rt.ctx).await {
        Ok(user) => {
            let name = user.username.as_deref().or(user.email.as_deref()).unwrap_or(&user.id);
            println!("Signed in as {name}");
            Ok(ExitCode::SUCCESS)
        }
        Err(e) if e.is_cancelled() => {
            eprintln!("Sign-in cancelled.");
            Ok(ExitCode::FAILURE)
        }
        Err(e) => Err(e).context("sign-in failed"),
    }
}

async fn cmd_logout(rt: &Runtime) -> Result<ExitCode> {
    rt.session.logout(&rt.ctx).await.context("logout failed")?;
    println!("Signed out.");
    Ok(ExitCode::SUCCESS)
}

async fn cmd_status(rt: &Runtime, json: bool) -> Result<ExitCode> {
    if let Err(e) = rt.session.initialize(&rt.ctx).await {
        warn!(error = %e, "session check failed");
    }
    let state = rt.session.state();

    if json {
        let stored = rt
            .vault
            .lock()
            .map_err(|_| anyhow::anyhow!("vault mutex poisoned"))?
            .keys(&rt.namespace)?;
        let body = serde_json::json!({
            "state": state.name(),
            "user": state.user(),
            "error": state.error().map(ToString::to_string),
            "namespace": rt.namespace,
            "stored_keys": stored,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        match &state {
            SessionState::Authenticated(user) => println!("authenticated ({})", user.id),
            SessionState::Error(e) => println!("error: {e}"),
            other => println!("{}", other.name()),
        }
    }

    Ok(if state.is_authenticated() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn cmd_token(rt: &Runtime) -> Result<ExitCode> {
    match rt.session.service().get_access_token(&rt.ctx).await {
        Some(token) => {
            println!("{token}");
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("Not signed in. Run `keygate login`.");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn cmd_whoami(rt: &Runtime) -> Result<ExitCode> {
    match rt.session.service().get_user().await {
        Some(user) => {
            println!("{}", serde_json::to_string_pretty(&user)?);
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("Not signed in.");
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn cmd_check_role(rt: &Runtime, roles: &[String], all: bool) -> Result<ExitCode> {
    if rt.session.initialize(&rt.ctx).await?.is_none() {
        eprintln!("Not signed in.");
        return Ok(ExitCode::FAILURE);
    }

    let granted = if all {
        rt.session.has_all_roles(roles)
    } else {
        rt.session.has_any_role(roles)
    };
    info!(?roles, all, granted, "role check");
    Ok(if granted { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn cmd_reset(rt: &Runtime) -> Result<ExitCode> {
    rt.session.forget().await.context("reset failed")?;
    println!("Cleared stored credentials for namespace {:?}.", rt.namespace);
    Ok(ExitCode::SUCCESS)
}
