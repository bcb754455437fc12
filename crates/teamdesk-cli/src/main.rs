//! TeamDesk CLI - drive the dashboard session from a terminal.
//!
//! Logs in against the TeamDesk backend, keeps the session where the
//! dashboard client would, and shows what the route gates decide for a
//! given page.

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use teamdesk_core::api::ApiClient;
use teamdesk_core::auth::{AuthContext, AuthError, Credentials, SessionStore};
use teamdesk_core::config::Config;
use teamdesk_core::gate::{GateDecision, ProtectedRoute, RecordingNavigator};

/// Directory for rolling log files (optional)
const LOG_DIR_ENV: &str = "TEAMDESK_LOG_DIR";

const EMAIL_ENV: &str = "TEAMDESK_EMAIL";
const PASSWORD_ENV: &str = "TEAMDESK_PASSWORD";

const USAGE: &str = "\
Usage: teamdesk <command>

Commands:
  login [email]      Log in and store the session
  logout             Forget the stored session
  whoami             Show the logged-in user
  refresh            Re-fetch the profile from the backend
  check <path>...    Show what the route gate decides for each path
  help               Show this message";

/// Initialize the tracing subscriber for logging.
/// Use RUST_LOG to control the level (e.g., RUST_LOG=debug).
fn init_tracing() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(PathBuf::from(dir), "teamdesk.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first().map(String::as_str) else {
        println!("{}", USAGE);
        return Ok(());
    };
    if matches!(command, "help" | "-h" | "--help") {
        println!("{}", USAGE);
        return Ok(());
    }

    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            Config::default()
        }
    };

    let api = ApiClient::new(&config.api_url())?;
    info!(api_url = api.base_url(), storage = ?config.storage, "TeamDesk starting");

    let store = SessionStore::new(config.session_storage());
    let context = AuthContext::new(store, Arc::new(api));
    context.resolve();

    match command {
        "login" => login(&context, &mut config, args.get(1).cloned()).await,
        "logout" => {
            context.logout();
            println!("Logged out.");
            Ok(())
        }
        "whoami" => whoami(&context).await,
        "refresh" => refresh(&context).await,
        "check" => check(&context, &config, &args[1..]),
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }
}

async fn login(context: &AuthContext, config: &mut Config, email: Option<String>) -> Result<()> {
    let email = match email
        .or_else(|| std::env::var(EMAIL_ENV).ok())
        .or_else(|| config.last_email.clone())
    {
        Some(email) => email,
        None => prompt("Email: ")?,
    };
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password(format!("Password for {}: ", email))?,
    };

    match context.login(&Credentials::new(email.clone(), password)).await {
        Ok(session) => {
            if let Some(profile) = session.profile() {
                println!("Logged in as {} ({})", profile.display_name(), profile.role);
            }
            if !context.is_persistent() {
                println!("Session storage unavailable; this login lasts for this run only.");
            }
            config.last_email = Some(email);
            if let Err(e) = config.save() {
                warn!(error = %e, "Failed to save config");
            }
            Ok(())
        }
        Err(e) => bail!(login_message(&e)),
    }
}

/// User-facing text for a failed login.
fn login_message(e: &AuthError) -> String {
    match e {
        AuthError::MissingCredentials => "Email and password required".to_string(),
        AuthError::InvalidCredentials => "Login failed, please check your credentials.".to_string(),
        AuthError::NetworkFailure(_) => {
            "Unable to connect to server. Check your internet connection.".to_string()
        }
        other => format!("Login failed: {}", other),
    }
}

async fn whoami(context: &AuthContext) -> Result<()> {
    if !context.is_authenticated() {
        println!("Not logged in.");
        return Ok(());
    }
    if let Err(e) = context.refresh_if_stale().await {
        match e {
            AuthError::SessionExpired => {
                println!("Session expired. Run `teamdesk login` again.");
                return Ok(());
            }
            other => warn!(error = %other, "Could not refresh profile, showing cached copy"),
        }
    }
    if let Some(profile) = context.current_user() {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    }
    Ok(())
}

async fn refresh(context: &AuthContext) -> Result<()> {
    match context.refresh().await {
        Ok(Some(profile)) => {
            println!("Profile refreshed: {} ({})", profile.display_name(), profile.role);
            Ok(())
        }
        Ok(None) => {
            println!("Not logged in.");
            Ok(())
        }
        Err(e) => bail!("Refresh failed: {}", e),
    }
}

fn check(context: &AuthContext, config: &Config, paths: &[String]) -> Result<()> {
    if paths.is_empty() {
        bail!("check needs at least one path");
    }

    let mut stdout = io::stdout().lock();
    for path in paths {
        let gate = config.routes.gate_for(path);
        let mut page = ProtectedRoute::new(gate, context);
        let mut navigator = RecordingNavigator::default();
        let rendered = page.render(&mut navigator, |_| ()).is_some();

        let outcome = match (rendered, navigator.last()) {
            (true, _) => "render".to_string(),
            (false, Some(to)) => format!("redirect {}", to),
            (false, None) => match page.decision() {
                GateDecision::Placeholder => "placeholder".to_string(),
                other => format!("{:?}", other),
            },
        };
        writeln!(stdout, "{:<30} {}", path, outcome)?;
    }
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}
