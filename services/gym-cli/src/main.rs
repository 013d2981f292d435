//! Gym member CLI
//!
//! Thin shell over the session layer: loads config, opens the credential
//! store and runs one subcommand. Tokens persist in the storage dir between
//! invocations, so `login` once and the other commands reuse the session.

mod cli;
mod config;

use std::io::BufRead;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use gym_api::{ApiClient, ApiError};
use gym_auth::CredentialStore;
use gym_session::{
    CheckRepository, HeartRateRepository, RegisterData, SessionFacade, User,
    spawn_occupancy_poller,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Args, Command, HeartRateCommand};
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config_path = Config::resolve_path(args.config.as_deref());
    debug!(path = %config_path.display(), "loading configuration");
    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;
    info!(
        base_url = %config.api.base_url,
        timeout_secs = config.api.timeout_secs,
        headers = config.headers.len(),
        "configuration loaded"
    );

    let store = CredentialStore::load(config.storage.dir.clone())
        .await
        .with_context(|| {
            format!(
                "failed to open credential store in {}",
                config.storage.dir.display()
            )
        })?;
    let client = ApiClient::http(config.dispatcher_config(), Arc::new(store))
        .context("failed to build API client")?;

    run(args.command, &config, client).await
}

/// Logs go to stderr so command output on stdout stays clean. Filter from
/// LOG_LEVEL, then RUST_LOG, default `warn`; JSON when LOG_FORMAT=json.
fn init_tracing() {
    let filter = EnvFilter::try_from_env("LOG_LEVEL")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(std::io::stderr)
        }))
        .with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
        .init();
}

async fn run(command: Command, config: &Config, client: ApiClient) -> Result<()> {
    let session = SessionFacade::new(client.clone());
    let checks = CheckRepository::new(client.clone());

    match command {
        Command::Login { email } => {
            let password = read_password()?;
            let auth = session.login(&email, &password).await.map_err(explain)?;
            println!("Logged in as {}", describe(&auth.user));
        }
        Command::Register { profile } => {
            let contents = std::fs::read_to_string(&profile)
                .with_context(|| format!("failed to read {}", profile.display()))?;
            let data: RegisterData = serde_json::from_str(&contents)
                .with_context(|| format!("invalid profile in {}", profile.display()))?;
            let auth = session.register(&data).await.map_err(explain)?;
            println!("Registered {}", describe(&auth.user));
        }
        Command::Whoami => {
            let user = current_user(&session).await?;
            print_profile(&user);
        }
        Command::Logout => {
            session.clear_session().await.map_err(explain)?;
            println!("Logged out");
        }
        Command::Session => {
            if session.has_active_session().await {
                println!("active");
            } else {
                println!("inactive");
            }
        }
        Command::CheckIn => println!("{}", checks.check_in().await.map_err(explain)?),
        Command::CheckOut => println!("{}", checks.check_out().await.map_err(explain)?),
        Command::Status => {
            let inside = checks.is_inside().await.map_err(explain)?;
            println!("{}", if inside { "inside" } else { "outside" });
        }
        Command::Occupancy { watch: false } => {
            println!("{}", checks.concurrency().await.map_err(explain)?);
        }
        Command::Occupancy { watch: true } => watch_occupancy(checks, config).await?,
        Command::HeartRate(sub) => {
            let user = current_user(&session).await?;
            let heart = HeartRateRepository::new(client);
            match sub {
                HeartRateCommand::Log { bpm } => {
                    let sample = heart.save(user.id, bpm).await.map_err(explain)?;
                    println!("{} bpm saved ({} {})", sample.bpm, sample.date, sample.time);
                }
                HeartRateCommand::History => {
                    let samples = heart.history(user.id).await.map_err(explain)?;
                    if samples.is_empty() {
                        println!("no readings yet");
                    }
                    for sample in samples {
                        println!("{} {}  {:>3} bpm", sample.date, sample.time, sample.bpm);
                    }
                }
            }
        }
    }
    Ok(())
}

/// Print occupancy updates until Ctrl-C.
async fn watch_occupancy(checks: CheckRepository, config: &Config) -> Result<()> {
    let (mut rx, handle) = spawn_occupancy_poller(checks, config.poll_interval());
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let count = *rx.borrow_and_update();
                if let Some(count) = count {
                    println!("{count} inside");
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    handle.abort();
    Ok(())
}

async fn current_user(session: &SessionFacade) -> Result<User> {
    match session.get_current_user().await {
        Some(user) => Ok(user),
        None => bail!("not logged in, run `gym login <email>` first"),
    }
}

/// GYM_PASSWORD, else the first line of stdin.
fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var("GYM_PASSWORD") {
        return Ok(password);
    }
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Attach the follow-up a user needs for the errors they can act on.
fn explain(err: ApiError) -> anyhow::Error {
    if err.is_auth_expired() {
        return anyhow::anyhow!("{err}\nrun `gym login <email>` to start a new session");
    }
    if let Some(fields) = err.field_errors() {
        let details: Vec<String> = fields
            .iter()
            .map(|(field, messages)| format!("  {field}: {}", messages.join(", ")))
            .collect();
        return anyhow::anyhow!("{err}\n{}", details.join("\n"));
    }
    err.into()
}

fn describe(user: &User) -> String {
    format!("{} <{}>", user.display_name(), user.email)
}

fn print_profile(user: &User) {
    println!("{}", describe(user));
    println!("  id:         {}", user.id);
    println!("  role:       {:?}", user.role);
    if let Some(membership) = user.membership {
        println!("  membership: {membership:?}");
    }
    println!("  status:     {:?}", user.status);
    if let Some(joined) = &user.join_date {
        println!("  joined:     {joined}");
    }
    if let (Some(height), Some(weight)) = (user.height, user.weight) {
        println!("  height:     {height} cm");
        println!("  weight:     {weight} kg");
    }
}
