use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use nostr_sdk::prelude::Keys;
use nostrcal_cli::cli::{parse_calendar_time, render_entry, CliConfig, Credentials, DesktopOpener};
use nostrcal_core::constants::keys::LOCAL_CREDENTIALS;
use nostrcal_core::models::CalendarEntry;
use nostrcal_core::nostr::identity::{self, KeyPrefix};
use nostrcal_core::nostr::{auth, EventFilter};
use nostrcal_core::storage::{KeyValueStore, MemoryStore};
use nostrcal_core::{tracing_setup, ClientContext, CoreEvent};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

#[derive(Parser)]
#[command(name = "nostrcal")]
#[command(about = "Nostr calendar relay and remote-signing client")]
struct Cli {
    /// Path to JSON config file (dataDir, relays, keyring, credentials)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Directory for session state and config.json
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Relay to use (can be specified multiple times)
    #[arg(long = "relay", short = 'r')]
    relays: Vec<String>,

    /// Keep secrets in the OS keyring
    #[arg(long)]
    keyring: bool,

    /// Never open a browser or touch the clipboard for authorization URLs
    #[arg(long)]
    no_browser: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode an npub/nsec to hex, or a hex public key to npub
    Decode { input: String },

    /// Encode a hex key as npub (or nsec with --secret)
    Encode {
        hex: String,
        #[arg(long)]
        secret: bool,
    },

    /// Find the relay that opens fastest
    Probe,

    /// Fetch calendar events (or any kinds with --kind)
    Fetch {
        /// Author npub or hex (can be specified multiple times)
        #[arg(long, short = 'a')]
        author: Vec<String>,
        /// Event kind (can be specified multiple times)
        #[arg(long, short = 'k')]
        kind: Vec<u16>,
        #[arg(long)]
        since: Option<u64>,
        #[arg(long)]
        limit: Option<usize>,
        /// Print raw events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Store a local secret key (nsec or hex)
    Login {
        key: String,
        /// Encrypt the stored key (NIP-49)
        #[arg(long, short = 'p')]
        password: Option<String>,
    },

    /// Forget the stored local secret key
    Logout,

    /// Remote signer (NIP-46) commands
    Bunker {
        #[command(subcommand)]
        command: BunkerCommands,
    },

    /// Sign and publish a calendar event
    Publish {
        #[arg(long, short = 't')]
        title: String,
        /// Unix seconds, RFC 3339, or YYYY-MM-DD for an all-day event
        #[arg(long, short = 's')]
        start: String,
        #[arg(long, short = 'e')]
        end: Option<String>,
        #[arg(long, short = 'l')]
        location: Option<String>,
        #[arg(long)]
        summary: Option<String>,
        /// Hashtag (can be specified multiple times)
        #[arg(long)]
        tag: Vec<String>,
        /// `d` identifier; reuse one to publish a new revision
        #[arg(long)]
        identifier: Option<String>,
        /// Password for an encrypted local key
        #[arg(long, short = 'p')]
        password: Option<String>,
    },
}

#[derive(Subcommand)]
enum BunkerCommands {
    /// Connect with a bunker:// or nostrconnect:// URI
    Connect { uri: String },
    /// Resume the last remote signer session
    Reconnect,
    /// Sign an event template (JSON argument, or - for stdin)
    Sign {
        template: String,
        /// Per-attempt timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Ask the remote signer for the user's public key
    Pubkey,
    /// Forget the remote signer connection
    Logout,
}

#[tokio::main]
async fn main() {
    tracing_setup::init_tracing_with_default("warn");
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // commands that need no context
    match &cli.command {
        Commands::Decode { input } => return decode(input),
        Commands::Encode { hex, secret } => return encode(hex, *secret),
        _ => {}
    }

    let file_config = match &cli.config {
        Some(path) => CliConfig::load(path)?,
        None => CliConfig::default(),
    };
    let config = file_config.core_config(cli.data_dir.clone(), &cli.relays)?;
    let opener = DesktopOpener {
        browser: !cli.no_browser,
        clipboard: !cli.no_browser,
    };
    let ctx = ClientContext::open(
        config,
        Arc::new(opener),
        cli.keyring || file_config.keyring,
    );
    let printer = spawn_event_printer(ctx.subscribe());

    let result = match cli.command {
        Commands::Decode { .. } | Commands::Encode { .. } => Ok(()),
        Commands::Probe => probe(&ctx).await,
        Commands::Fetch {
            author,
            kind,
            since,
            limit,
            json,
        } => fetch(&ctx, author, kind, since, limit, json).await,
        Commands::Login { key, password } => {
            let secrets = ctx.store().secrets().as_ref();
            let keys = auth::login_with_nsec(&key, password.as_deref(), secrets)?;
            println!("{}", identity::npub(&keys.public_key())?);
            Ok(())
        }
        Commands::Logout => {
            auth::clear_credentials(ctx.store().secrets().as_ref())?;
            println!("Local key removed");
            Ok(())
        }
        Commands::Bunker { command } => bunker(&ctx, command).await,
        Commands::Publish {
            title,
            start,
            end,
            location,
            summary,
            tag,
            identifier,
            password,
        } => {
            let start = parse_calendar_time(&start)?;
            let identifier = identifier
                .unwrap_or_else(|| format!("nostrcal-{}", chrono::Utc::now().timestamp_millis()));
            let mut entry = CalendarEntry::draft(identifier, title, start);
            if let Some(end) = end {
                let end = parse_calendar_time(&end)?;
                if std::mem::discriminant(&end) != std::mem::discriminant(&entry.start) {
                    bail!("--start and --end must both be dates or both be times");
                }
                entry.end = Some(end);
            }
            entry.location = location;
            entry.summary = summary;
            entry.hashtags = tag;

            activate_signer(&ctx, file_config.credentials.as_ref(), password.as_deref()).await?;
            let report = ctx.publish(&entry.to_template()).await?;
            for (relay, outcome) in &report.outcomes {
                println!("{}: {:?}", relay, outcome);
            }
            if !report.is_accepted_anywhere() {
                bail!("no relay accepted event {}", report.event_id);
            }
            println!("{}", entry.identifier);
            Ok(())
        }
    };

    ctx.shutdown().await;
    printer.abort();
    result
}

fn decode(input: &str) -> Result<()> {
    if identity::is_hex_pubkey(input.trim()) {
        let public_key = identity::parse_public_key(input)?;
        println!("{}", identity::npub(&public_key)?);
        return Ok(());
    }
    let decoded = identity::decode(input)?;
    println!("{} {}", decoded.prefix.as_str(), decoded.to_hex());
    Ok(())
}

fn encode(hex: &str, secret: bool) -> Result<()> {
    let encoded = if secret {
        let secret_key = identity::parse_secret_key(hex)?;
        identity::encode(KeyPrefix::Nsec, &secret_key.to_secret_bytes())?
    } else {
        identity::npub(&identity::parse_public_key(hex)?)?
    };
    println!("{}", encoded);
    Ok(())
}

async fn probe(ctx: &ClientContext) -> Result<()> {
    let relays = &ctx.config().relays;
    let started = Instant::now();
    match ctx.probe().pick_fastest_relay(relays).await {
        Some(relay) => {
            println!("{} ({} ms)", relay, started.elapsed().as_millis());
            Ok(())
        }
        None => bail!("no relays configured"),
    }
}

async fn fetch(
    ctx: &ClientContext,
    authors: Vec<String>,
    kinds: Vec<u16>,
    since: Option<u64>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let mut filter = if kinds.is_empty() {
        EventFilter::kinds([
            nostrcal_core::constants::kinds::DATE_CALENDAR_EVENT,
            nostrcal_core::constants::kinds::TIME_CALENDAR_EVENT,
        ])
    } else {
        EventFilter::kinds(kinds)
    };
    if let Some(since) = since {
        filter = filter.since(since);
    }
    if let Some(limit) = limit {
        filter = filter.limit(limit);
    }

    if json {
        for event in ctx.query().fetch_events(&filter, &authors).await {
            println!("{}", serde_json::to_string(&event)?);
        }
        return Ok(());
    }

    let entries = ctx.fetch_calendar(Some(filter), &authors).await;
    if entries.is_empty() {
        eprintln!("No calendar events found");
    }
    for entry in &entries {
        println!("{}", render_entry(entry));
    }
    Ok(())
}

async fn bunker(ctx: &ClientContext, command: BunkerCommands) -> Result<()> {
    let session = ctx.session();
    match command {
        BunkerCommands::Connect { uri } => {
            let pubkey = session.connect(&uri).await?;
            println!("{}", identity::npub(&identity::parse_public_key(&pubkey)?)?);
        }
        BunkerCommands::Reconnect => match session.auto_reconnect().await? {
            Some(pubkey) => {
                println!("{}", identity::npub(&identity::parse_public_key(&pubkey)?)?)
            }
            None => bail!("no previous remote signer session to resume"),
        },
        BunkerCommands::Sign { template, timeout } => {
            let raw = if template == "-" {
                let mut buf = String::new();
                std::io::stdin()
                    .read_to_string(&mut buf)
                    .context("Failed to read template from stdin")?;
                buf
            } else {
                template
            };
            let value: serde_json::Value =
                serde_json::from_str(&raw).context("Template is not valid JSON")?;

            resume(ctx).await?;
            let event = session
                .sign_value(&value, timeout.map(Duration::from_secs))
                .await?;
            println!("{}", serde_json::to_string(&event)?);
        }
        BunkerCommands::Pubkey => {
            resume(ctx).await?;
            println!("{}", session.get_public_key().await?);
        }
        BunkerCommands::Logout => {
            session.logout().await?;
            println!("Remote signer forgotten");
        }
    }
    Ok(())
}

async fn resume(ctx: &ClientContext) -> Result<()> {
    ctx.session().auto_reconnect().await?;
    if !ctx.session().is_ready() {
        bail!("no remote signer connected; run `nostrcal bunker connect <uri>` first");
    }
    Ok(())
}

/// Use the remote signer when a session can be resumed, else a local key from
/// the config file or the secret store.
async fn activate_signer(
    ctx: &ClientContext,
    credentials: Option<&Credentials>,
    password: Option<&str>,
) -> Result<()> {
    match ctx.session().auto_reconnect().await {
        Ok(Some(_)) => return Ok(()),
        Ok(None) => {}
        Err(e) => eprintln!("Remote signer unavailable, trying local key: {}", e),
    }

    let keys = local_keys(ctx, credentials, password)?;
    ctx.local_signer().set_keys(keys);
    Ok(())
}

fn local_keys(
    ctx: &ClientContext,
    credentials: Option<&Credentials>,
    password: Option<&str>,
) -> Result<Keys> {
    if let Some(creds) = credentials {
        let store = MemoryStore::new();
        store.set(LOCAL_CREDENTIALS, &creds.key)?;
        let password = password.or(creds.password.as_deref()).unwrap_or_default();
        return auth::load_stored_keys(password, &store);
    }

    let secrets = ctx.store().secrets().as_ref();
    if !auth::has_stored_credentials(secrets) {
        bail!("not logged in; run `nostrcal login <nsec>` or `nostrcal bunker connect <uri>`");
    }
    if auth::credentials_need_password(secrets) {
        let password = password.context("stored key is encrypted; pass --password")?;
        auth::load_stored_keys(password, secrets)
    } else {
        auth::load_unencrypted_keys(secrets)
    }
}

fn spawn_event_printer(mut events: broadcast::Receiver<CoreEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(CoreEvent::AuthUrl { url, disposition }) => {
                    eprintln!("Approve this connection in your signer ({:?}):", disposition);
                    eprintln!("  {}", url);
                }
                Ok(CoreEvent::SignerState(state)) => tracing::debug!("signer state: {:?}", state),
                Ok(CoreEvent::SignerReady { .. }) => eprintln!("Remote signer ready"),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
