//! Offline inspection of the session directory. These commands read and
//! write the store directly, so run `remove` only while the gateway is down
//! or use `DELETE /sessions/{id}` instead.

use {anyhow::Result, clap::Subcommand};

use {
    paird_config::PairdConfig,
    paird_sessions::{CredentialStore, FsCredentialStore, SessionId},
};

#[derive(Subcommand)]
pub enum SessionAction {
    /// List stored sessions with their registration state.
    List,
    /// Print the stored files of one session.
    Show { id: String },
    /// Delete everything stored for one session.
    Remove { id: String },
}

pub async fn handle_sessions(action: SessionAction, config: &PairdConfig) -> Result<()> {
    let store = FsCredentialStore::new(config.sessions.dir.clone());
    match action {
        SessionAction::List => list(&store).await,
        SessionAction::Show { id } => {
            let id = SessionId::parse(&id)?;
            let Some(files) = store.export(&id).await? else {
                anyhow::bail!("no stored session {id}");
            };
            println!("{}", serde_json::to_string_pretty(&files)?);
            Ok(())
        },
        SessionAction::Remove { id } => {
            let id = SessionId::parse(&id)?;
            if store.delete(&id).await? {
                println!("Removed session '{id}'.");
            } else {
                println!("No stored session '{id}'.");
            }
            Ok(())
        },
    }
}

async fn list(store: &FsCredentialStore) -> Result<()> {
    let ids = store.list().await?;
    if ids.is_empty() {
        println!("No sessions in {}.", store.base_dir().display());
        return Ok(());
    }
    for id in &ids {
        match store.load(id).await {
            Ok(record) => {
                let state = if record.is_registered() {
                    "registered"
                } else {
                    "pairing"
                };
                let account = record.account().unwrap_or("-");
                println!("  {id:<24} {state:<10} {account}");
            },
            Err(e) => println!("  {id:<24} unreadable ({e})"),
        }
    }
    Ok(())
}
