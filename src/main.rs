use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::console::Term;
use dialoguer::{theme::ColorfulTheme, Input, Password};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use m1sync::api::DateRange;
use m1sync::config::{default_config_path, ResolvedConfig};
use m1sync::credentials::Credentials;
use m1sync::duration::format_duration;
use m1sync::pipe::{parse_datetime, FetchToggles};
use m1sync::session::M1Session;

#[derive(Parser)]
#[command(name = "m1sync")]
#[command(about = "Fetch activity history from M1 Finance")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Verbose logging
    #[arg(long)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Store username, password, and 2FA seed
    Setup,

    /// Fetch activity and print one JSON record per line
    Fetch(FetchArgs),

    /// Show current configuration
    Config,

    /// Delete the saved session
    Logout,
}

#[derive(clap::Args)]
struct FetchArgs {
    /// Earliest date to include (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_datetime)]
    begin: Option<chrono::DateTime<chrono::Utc>>,

    /// Date to stop before (YYYY-MM-DD or RFC 3339)
    #[arg(long, value_parser = parse_datetime)]
    end: Option<chrono::DateTime<chrono::Utc>>,

    /// Page size for API requests
    #[arg(long, allow_negative_numbers = true)]
    chunksize: Option<i64>,

    /// Parameters JSON document; its `m1finance` section sets the toggles
    #[arg(long, value_name = "FILE")]
    params: Option<PathBuf>,

    #[arg(long)]
    no_dividends: bool,

    #[arg(long)]
    no_trades: bool,

    #[arg(long)]
    no_cash: bool,

    #[arg(long)]
    no_positions: bool,

    #[arg(long)]
    no_transfers: bool,

    /// Restrict to a symbol (repeatable)
    #[arg(long = "symbol", value_name = "SYMBOL")]
    symbols: Vec<String>,
}

impl FetchArgs {
    fn toggles(&self) -> Result<FetchToggles> {
        let mut toggles = match &self.params {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read parameters: {}", path.display()))?;
                let parameters: serde_json::Value = serde_json::from_str(&content)
                    .with_context(|| format!("Failed to parse parameters: {}", path.display()))?;
                FetchToggles::from_parameters(&parameters)?
            }
            None => FetchToggles::default(),
        };

        toggles.dividends &= !self.no_dividends;
        toggles.trades &= !self.no_trades;
        toggles.cash &= !self.no_cash;
        toggles.positions &= !self.no_positions;
        toggles.transfers &= !self.no_transfers;
        toggles.symbols.extend(self.symbols.iter().cloned());
        Ok(toggles)
    }
}

fn init_tracing(debug: bool, json: bool) {
    let default_filter = if debug {
        "debug,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off"
    } else {
        "info,chromiumoxide=warn,chromiumoxide::conn=off,chromiumoxide::handler=off"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(layer.json())
            .init();
    } else {
        tracing_subscriber::registry().with(filter).with(layer).init();
    }
}

fn prompt_credentials() -> Result<Credentials> {
    let theme = ColorfulTheme::default();
    let term = Term::stderr();

    let username: String = Input::with_theme(&theme)
        .with_prompt("M1 Finance username")
        .interact_text_on(&term)
        .context("Failed to read username")?;
    let password = Password::with_theme(&theme)
        .with_prompt("Password")
        .interact_on(&term)
        .context("Failed to read password")?;
    let otp_seed = Password::with_theme(&theme)
        .with_prompt("2FA secret (base32)")
        .interact_on(&term)
        .context("Failed to read 2FA secret")?;

    Ok(Credentials::new(username.trim(), password, otp_seed))
}

async fn fetch(session: &M1Session, args: &FetchArgs) -> Result<()> {
    let toggles = args.toggles()?;
    let range = DateRange::new(args.begin, args.end);
    let nodes = session.fetch(&toggles, range, args.chunksize).await?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for node in &nodes {
        serde_json::to_writer(&mut out, &node.to_record())?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.log_json);

    let config = ResolvedConfig::load_or_default(&cli.config)
        .with_context(|| format!("Failed to load m1sync config: {}", cli.config.display()))?;

    if let Command::Config = cli.command {
        println!("Config file: {}", cli.config.display());
        println!("Data directory: {}", config.data_dir.display());
        println!("Credentials: {:?}", config.credentials);
        println!("GraphQL endpoint: {}", config.api.graphql_url);
        println!("Page size: {}", config.api.page_size);
        println!("Headless: {}", config.browser.headless);
        match config.session_cache_dir() {
            Ok(dir) if config.session.persist => println!(
                "Sessions: {} (max age {})",
                dir.display(),
                format_duration(config.session.max_age)
            ),
            Ok(_) => println!("Sessions: not saved"),
            Err(e) => println!("Sessions: unavailable ({e})"),
        }
        return Ok(());
    }

    let session = M1Session::from_config(&config)?;
    let result = match &cli.command {
        Command::Setup => {
            let credentials = prompt_credentials()?;
            session.setup(&credentials).await
        }
        Command::Fetch(args) => fetch(&session, args).await,
        Command::Logout => session.logout().await,
        Command::Config => Ok(()),
    };
    session.shutdown().await;
    result
}
