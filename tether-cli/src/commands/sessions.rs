//! Sessions management commands

use anyhow::Result;
use clap::{Args, Subcommand};
use tether_core::{CoordinationBackend, SessionDescriptor, TetherConfig};
use tracing::info;

/// Sessions management arguments
#[derive(Args, Debug)]
pub struct SessionsArgs {
    #[command(subcommand)]
    pub command: SessionsCommands,
}

/// Sessions subcommands
#[derive(Subcommand, Debug)]
pub enum SessionsCommands {
    /// List all active sessions
    List,
    /// Destroy a session, releasing its locks
    Destroy {
        /// Session ID to destroy
        session_id: String,
    },
}

/// Run sessions command
pub async fn run(args: SessionsArgs, config: TetherConfig) -> Result<()> {
    let backend = super::connect(&config)?;
    match args.command {
        SessionsCommands::List => list_sessions(backend.as_ref()).await,
        SessionsCommands::Destroy { session_id } => {
            destroy_session(backend.as_ref(), &session_id).await
        }
    }
}

/// List all active sessions
async fn list_sessions(backend: &dyn CoordinationBackend) -> Result<()> {
    let sessions = backend.list_sessions().await?;
    print!("{}", format_sessions(&sessions));
    Ok(())
}

/// Destroy a session
async fn destroy_session(backend: &dyn CoordinationBackend, session_id: &str) -> Result<()> {
    info!(session_id = %session_id, "Destroying session");
    backend.destroy_session(session_id).await?;
    println!("Destroyed session: {}", session_id);
    Ok(())
}

fn format_sessions(sessions: &[SessionDescriptor]) -> String {
    if sessions.is_empty() {
        return "No active sessions\n".to_string();
    }

    let mut out = String::from("Active sessions:\n\n");
    for session in sessions {
        let name = if session.name.is_empty() {
            "(unnamed)"
        } else {
            session.name.as_str()
        };
        out.push_str(&format!("  {} - {}\n", session.id, name));
        out.push_str(&format!(
            "    Node: {}, TTL: {}, Behavior: {}\n",
            session.node,
            if session.ttl.is_empty() { "-" } else { &session.ttl },
            session.behavior
        ));
    }
    out
}
