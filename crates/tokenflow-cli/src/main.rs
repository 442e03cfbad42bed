//! tokenflow - log in to a token-authenticated API and call it from the terminal.
//!
//! The session is persisted between runs, so `tokenflow login` once and
//! later `tokenflow get /orders` calls go out with the stored access token,
//! renewing it on expiry.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tokenflow_core::{
    guard, ApiClient, ApiRequest, Config, Navigation, Navigator, SessionStore,
};

#[derive(Parser, Debug)]
#[command(name = "tokenflow", version, about = "Session-aware client for a token-authenticated API")]
struct Cli {
    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the session
    Login {
        #[arg(short, long)]
        username: Option<String>,
    },
    /// Create an account
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        email: String,
        /// Log in with the new account afterwards
        #[arg(long)]
        login: bool,
    },
    /// End the session and forget stored tokens
    Logout,
    /// Show who is logged in
    Status,
    /// GET a path and print the response
    Get {
        path: String,
        /// Query parameter as key=value, repeatable
        #[arg(short, long = "query", value_parser = parse_key_value)]
        query: Vec<(String, String)>,
    },
    /// POST a JSON body to a path and print the response
    Post {
        path: String,
        #[arg(short, long)]
        data: String,
    },
    /// Check whether the current session may open a route
    Check { route: String },
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", s))?;
    if key.is_empty() {
        return Err(format!("empty key in '{}'", s));
    }
    Ok((key.to_string(), value.to_string()))
}

/// Tells the user to log in again after the client ended the session.
struct TerminalNavigator;

impl Navigator for TerminalNavigator {
    fn redirect_to_login(&self, return_to: Option<&str>) {
        match return_to {
            Some(path) => eprintln!(
                "Session expired while requesting {}. Please log in again with `tokenflow login`.",
                path
            ),
            None => eprintln!("Session expired. Please log in again with `tokenflow login`."),
        }
    }
}

/// Initialize the tracing subscriber for logging
fn init_tracing(log_file: Option<&PathBuf>) -> Result<Option<WorkerGuard>> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    Ok(guard)
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// A session loaded from storage has no renewal time until this run renews it
async fn report_renewal(store: &SessionStore) {
    if let Some(renewed_at) = store.snapshot().await.renewed_at {
        eprintln!("Access token renewed at {}", renewed_at.to_rfc3339());
    }
}

async fn print_response(response: reqwest::Response) -> Result<()> {
    let text = response.text().await.context("Failed to read response body")?;
    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) => println!("{}", text),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_file.as_ref())?;

    let mut config = Config::load()?;
    let http = config.http_client()?;
    let store = Arc::new(SessionStore::open(
        http,
        config.base_url()?,
        config.open_storage()?,
    )?);
    let client = ApiClient::with_refresh_timeout(
        Arc::clone(&store),
        Arc::new(TerminalNavigator),
        config.refresh_timeout(),
    );

    match cli.command {
        Command::Login { username } => {
            let username = match username.or_else(|| config.last_username.clone()) {
                Some(name) => name,
                None => prompt("Username: ")?,
            };
            let password = rpassword::prompt_password(format!("Password for {}: ", username))?;

            let session = store.login(&username, &password).await?;
            config.last_username = Some(username.clone());
            config.save()?;

            let role = session
                .user
                .as_ref()
                .and_then(|u| u.role.as_deref())
                .unwrap_or("unknown");
            println!("Logged in as {} (role: {})", session.username().unwrap_or(&username), role);
        }
        Command::Register {
            username,
            email,
            login,
        } => {
            let password = rpassword::prompt_password("New password: ")?;
            let result = store.register(&username, &password, &email).await?;
            println!(
                "{}",
                result.message.as_deref().unwrap_or("Registration complete")
            );

            if login {
                store.login(&username, &password).await?;
                config.last_username = Some(username.clone());
                config.save()?;
                println!("Logged in as {}", username);
            }
        }
        Command::Logout => {
            if store.logout().await? {
                println!("Logged out");
            } else {
                println!("No active session");
            }
        }
        Command::Status => {
            let session = store.snapshot().await;
            if session.is_logged_in() {
                println!("Logged in as {}", session.username().unwrap_or("<unknown user>"));
                println!("Admin: {}", if session.is_admin() { "yes" } else { "no" });
                println!(
                    "Refresh token: {}",
                    if session.has_refresh_token() { "stored" } else { "missing" }
                );
            } else {
                println!("Not logged in");
            }
            println!("API: {}", store.base_url());
        }
        Command::Get { path, query } => {
            let request = query
                .into_iter()
                .fold(ApiRequest::get(path), |req, (k, v)| req.query(k, v));
            let response = client.send(&request).await?;
            report_renewal(&store).await;
            print_response(response).await?;
        }
        Command::Post { path, data } => {
            let body: serde_json::Value =
                serde_json::from_str(&data).context("--data must be valid JSON")?;
            let response = client.send(&ApiRequest::post(path).json(body)).await?;
            report_renewal(&store).await;
            print_response(response).await?;
        }
        Command::Check { route } => {
            match guard::authorize(&store, &config.routes, &route).await {
                Navigation::Allow => println!("allowed"),
                Navigation::Login { redirect } => {
                    println!("login required (return to {})", redirect)
                }
                Navigation::Home => println!("forbidden, redirect to /"),
            }
        }
    }

    info!("tokenflow finished");
    Ok(())
}
