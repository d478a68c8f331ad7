mod backend;
mod chat;
mod common;
mod config;
mod error;
mod session;
mod terminal;
mod upload;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::sync::mpsc;

use backend::{Backend, RealtimeConnection};
use chat::client::RoomSettings;
use chat::{AvatarCache, ChatClient};
use config::AppConfig;
use error::ChatError;

#[derive(Parser)]
#[command(
    name = "rust_cloud_chat",
    version,
    about = "Chat and upload client for a hosted backend"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an account with email and password
    Signup { email: String, password: String },
    /// Sign in and store the session locally
    Login { email: String, password: String },
    /// Sign out and discard the stored session
    Logout,
    /// Show the signed-in user
    Whoami,
    /// Upload a file to the generic bucket
    Upload { file: PathBuf },
    /// Upload an image and set it as the account avatar
    Avatar { file: PathBuf },
    /// Enter the realtime chat room
    Chat,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), ChatError> {
    let config = AppConfig::from_env()?;
    let mut backend = Backend::new(&config.base_url, &config.anon_key);

    match cli.command {
        Command::Signup { email, password } => {
            match backend.sign_up(&email, &password).await? {
                Some(session) => {
                    session::save_session(&config.session_path, &session)?;
                    println!("Signed up and logged in as {email}");
                }
                None => {
                    println!("Signed up; confirm the email sent to {email}, then log in");
                }
            }
        }
        Command::Login { email, password } => {
            let session = backend.sign_in(&email, &password).await?;
            session::save_session(&config.session_path, &session)?;
            println!("Logged in as {email}");
        }
        Command::Logout => {
            if let Some(session) = session::load_session(&config.session_path) {
                backend.set_access_token(Some(session.access_token));
                if let Err(err) = backend.sign_out().await {
                    log::warn!("Server-side sign-out failed: {err}");
                }
            }
            session::clear_session(&config.session_path);
            println!("Logged out");
        }
        Command::Whoami => {
            let session = session::require_session(&config.session_path)?;
            backend.set_access_token(Some(session.access_token));
            let user = backend.get_user().await?;
            println!("id:     {}", user.id);
            println!("email:  {}", user.email.as_deref().unwrap_or("-"));
            println!("avatar: {}", user.avatar_url().as_deref().unwrap_or("-"));
        }
        Command::Upload { file } => {
            let session = session::require_session(&config.session_path)?;
            backend.set_access_token(Some(session.access_token));
            let (file_name, bytes) = read_file(&file).await?;
            let outcome = upload::upload_file(
                &backend,
                &config.upload_bucket,
                &session.user.id,
                &file_name,
                bytes,
            )
            .await?;
            println!("Uploaded {} -> {}", outcome.key, outcome.public_url);
        }
        Command::Avatar { file } => {
            let session = session::require_session(&config.session_path)?;
            backend.set_access_token(Some(session.access_token));
            let (file_name, bytes) = read_file(&file).await?;
            let outcome = upload::upload_avatar(
                &backend,
                &config.avatar_bucket,
                &session.user.id,
                &file_name,
                bytes,
            )
            .await?;
            println!("Avatar updated: {}", outcome.public_url);
        }
        Command::Chat => run_chat(config, backend).await?,
    }

    Ok(())
}

async fn run_chat(config: AppConfig, mut backend: Backend) -> Result<(), ChatError> {
    let session = session::require_session(&config.session_path)?;
    backend.set_access_token(Some(session.access_token.clone()));

    // Fresh profile read; the stored session may predate an avatar change.
    let user = backend.get_user().await?;
    let cache = AvatarCache::new(Arc::new(backend.clone()));
    cache.prime(&user.id, user.avatar_url()).await;

    let conn =
        RealtimeConnection::connect(&config.base_url, &config.anon_key, Some(session.access_token))
            .await?;

    // Front-end -> client
    let (cmd_tx, cmd_rx) = mpsc::channel(100);
    // Client -> front-end
    let (event_tx, event_rx) = mpsc::channel(100);

    let client = ChatClient::new(
        conn,
        Arc::new(backend),
        cache,
        RoomSettings {
            room: config.room.clone(),
            user_id: user.id,
            email: user.email,
            history_limit: config.history_limit,
        },
        event_tx,
        cmd_rx,
    );
    tokio::spawn(async move {
        if let Err(err) = client.run().await {
            log::error!("Chat client terminated: {err}");
        }
    });

    terminal::run(event_rx, cmd_tx).await;
    Ok(())
}

async fn read_file(path: &PathBuf) -> Result<(String, Vec<u8>), ChatError> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| ChatError::Validation(format!("{} has no usable file name", path.display())))?
        .to_string();
    let bytes = tokio::fs::read(path).await?;
    Ok((file_name, bytes))
}
