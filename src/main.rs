use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use comic_favorites::config::{Config, ConfigError};
use comic_favorites::db;
use comic_favorites::error::{ErrorCode, ErrorReport};
use comic_favorites::model::FavoriteComic;
use comic_favorites::services::auth::AuthSession;
use comic_favorites::services::favorites::{FavoriteComicsDataSource, FavoriteError, Signal};
use comic_favorites::services::session::{self, SessionError};
use comic_favorites::store::PgFavoriteStore;
use futures::StreamExt;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("missing session token; pass --session-token or set COMIC_SESSION_TOKEN")]
    MissingSessionToken,
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Favorite(#[from] FavoriteError),
    #[error("live signal ended before producing a value")]
    SignalEnded,
    #[error("output encode failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl ErrorCode for CliError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::MissingSessionToken => "E_MISSING_SESSION_TOKEN",
            Self::Config(e) => e.error_code(),
            Self::Database(_) => "E_DATABASE",
            Self::Session(e) => e.error_code(),
            Self::Favorite(e) => e.error_code(),
            Self::SignalEnded => "E_SIGNAL_ENDED",
            Self::Json(_) => "E_OUTPUT",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Favorite(e) if e.retryable())
    }
}

#[derive(Parser, Debug)]
#[command(name = "comic-favorites", about = "Manage a reader's favorite comics")]
struct Cli {
    #[arg(long, env = "COMIC_SESSION_TOKEN")]
    session_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a user and print a fresh session token.
    Register {
        #[arg(long)]
        name: String,
    },
    #[command(flatten)]
    Favorites(FavoritesCommand),
}

#[derive(Subcommand, Debug)]
enum FavoritesCommand {
    /// Print the current favorites, newest first.
    List,
    /// Stream favorites as they change until interrupted.
    Watch,
    /// Print whether a comic url is favorited.
    Check {
        #[arg(long)]
        url: String,
    },
    /// Favorite a comic, or unfavorite it if already saved.
    Toggle(ComicArgs),
    /// Unfavorite a comic; fails if it is not saved.
    Remove {
        #[arg(long)]
        url: String,
    },
}

#[derive(Args, Debug)]
struct ComicArgs {
    #[arg(long)]
    url: String,
    #[arg(long)]
    title: String,
    #[arg(long, default_value = "")]
    thumbnail: String,
    #[arg(long, default_value = "")]
    view: String,
    #[arg(long, default_value = "")]
    remote_thumbnail: String,
}

impl From<ComicArgs> for FavoriteComic {
    fn from(args: ComicArgs) -> Self {
        Self {
            url: args.url,
            title: args.title,
            thumbnail: args.thumbnail,
            view: args.view,
            remote_thumbnail: args.remote_thumbnail,
            created_at: None,
        }
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        let report = ErrorReport::from_error(&e);
        eprintln!("{}", serde_json::to_string(&report).unwrap_or_else(|_| e.to_string()));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config = Config::from_env()?;
    let pool = db::init_pool(&config).await?;

    match cli.command {
        Command::Register { name } => register(&pool, &name).await,
        Command::Favorites(command) => {
            let token = cli.session_token.ok_or(CliError::MissingSessionToken)?;
            let auth = AuthSession::new();
            let user = session::sign_in_with_token(&pool, &auth, &token).await?;
            info!(user_id = %user.id, name = %user.name, "session validated");

            let store = PgFavoriteStore::new(pool, config.database_url.as_str(), config.watch);
            let favorites = FavoriteComicsDataSource::new(Arc::new(store), Arc::new(auth));
            run_favorites(&favorites, command).await
        }
    }
}

async fn register(pool: &PgPool, name: &str) -> Result<(), CliError> {
    let user_id = session::create_user(pool, name).await?;
    let token = session::create_session(pool, user_id).await?;
    info!(%user_id, "registered user");
    print_json(&serde_json::json!({ "user_id": user_id, "session_token": token }))
}

async fn run_favorites(favorites: &FavoriteComicsDataSource, command: FavoritesCommand) -> Result<(), CliError> {
    match command {
        FavoritesCommand::List => {
            let comics = first(favorites.favorite_comics()).await?;
            print_json(&comics)
        }
        FavoritesCommand::Watch => watch(favorites).await,
        FavoritesCommand::Check { url } => {
            let favorited = first(favorites.is_favorited(&url)).await?;
            print_json(&serde_json::json!({ "url": url, "favorited": favorited }))
        }
        FavoritesCommand::Toggle(args) => {
            let outcome = favorites.toggle(args.into()).await?;
            print_json(&outcome)
        }
        FavoritesCommand::Remove { url } => {
            favorites
                .remove_from_favorite(&FavoriteComic::new(url.as_str(), ""))
                .await?;
            print_json(&serde_json::json!({ "removed": url }))
        }
    }
}

async fn watch(favorites: &FavoriteComicsDataSource) -> Result<(), CliError> {
    let mut signal = favorites.favorite_comics();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("watch interrupted");
                return Ok(());
            }
            item = signal.next() => match item {
                Some(Ok(comics)) => print_json(&comics)?,
                Some(Err(e)) => warn!(error = %e, code = e.error_code(), "favorites signal error"),
                None => return Err(CliError::SignalEnded),
            },
        }
    }
}

async fn first<T>(mut signal: Signal<T>) -> Result<T, CliError> {
    let item = signal.next().await.ok_or(CliError::SignalEnded)?;
    Ok(item?)
}

fn print_json(value: &impl Serialize) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
