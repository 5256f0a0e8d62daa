//! Hold a lock for as long as the process runs

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::Args;
use tether_core::{BackendSessionManager, Error, Session, SessionState, TetherConfig};
use tracing::{debug, info, warn};

/// Lock arguments
#[derive(Args, Debug)]
pub struct LockArgs {
    /// Key to lock
    pub key: String,

    /// Value written to the key once locked
    #[arg(long, default_value = "")]
    pub value: String,

    /// Session name shown in Consul
    #[arg(long, default_value = "tether-lock")]
    pub name: String,

    /// Session TTL (e.g. "20s"), configuration default when omitted
    #[arg(long, value_parser = humantime::parse_duration)]
    pub ttl: Option<Duration>,

    /// Interval between acquisition attempts while the lock is held elsewhere
    #[arg(long, value_parser = humantime::parse_duration, default_value = "1s")]
    pub poll: Duration,
}

/// Run lock command
pub async fn run(args: LockArgs, config: TetherConfig) -> Result<()> {
    let backend = super::connect(&config)?;
    let manager = Arc::new(BackendSessionManager::new(backend.clone()));
    let ttl = args.ttl.unwrap_or(config.session.ttl);

    let session =
        Session::with_config(args.name.as_str(), ttl, backend, manager, config.session).await?;

    let acquired = tokio::select! {
        result = acquire(&session, &args) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted before the lock was acquired");
            session.destroy().await;
            return Ok(());
        }
    };
    if let Err(e) = acquired {
        session.destroy().await;
        return Err(e);
    }

    println!("Locked {} (session {})", args.key, session.id());
    println!("Holding lock... (Ctrl+C to release)");

    let mut signal = session.err();
    let lost = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        outcome = signal.recv() => outcome,
    };

    session.destroy().await;

    match lost {
        Some(e) => bail!("Lost lock on {}: {}", args.key, e),
        None => {
            println!("Released {}", args.key);
            Ok(())
        }
    }
}

/// Poll until the lock is ours or a non-transient error occurs.
async fn acquire(session: &Session, args: &LockArgs) -> Result<()> {
    loop {
        match session.acquire_lock(&args.key, args.value.as_bytes()).await {
            Ok(()) => return Ok(()),
            Err(Error::LockHeldByOther { .. }) => {
                debug!(key = %args.key, "Lock held by another session, waiting");
            }
            Err(Error::SessionInvalid)
                if session.state() == SessionState::Active && session.id().is_empty() =>
            {
                debug!("Waiting for the session to be created");
            }
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "Lock attempt failed, retrying");
            }
            Err(e) => return Err(e.into()),
        }

        tokio::time::sleep(args.poll).await;
    }
}
