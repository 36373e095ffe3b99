use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use poly_crypto::SigningKey;
use poly_log::decode_servers;
use poly_sdk::{Engine, EngineConfig, Session};
use poly_sync::{FeedPage, ServerOutcome, ServerStatus};
use poly_types::{ranges, CancelToken, ContentType, CrdtItem, PublicKey};
use tracing::debug;

use crate::cli::*;

const DEFAULT_CONFIG: &str = "poly.toml";

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Keygen => cmd_keygen(),
        Command::Config => cmd_config(&config),
        Command::Head(args) => cmd_head(config, args).await,
        Command::Backfill(args) => cmd_backfill(config, args).await,
        Command::State(args) => cmd_state(config, args).await,
        Command::Publish(args) => cmd_publish(config, args).await,
        Command::Explore(args) => {
            let session = viewer(config).await?;
            let page = session
                .sync()
                .explore(&BTreeMap::new(), args.limit, &CancelToken::never())
                .await?;
            print_feed(&page);
            Ok(())
        }
        Command::Search(args) => {
            let session = viewer(config).await?;
            let page = session
                .sync()
                .search(&args.query, &BTreeMap::new(), args.limit, &CancelToken::never())
                .await?;
            print_feed(&page);
            Ok(())
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            EngineConfig::load(path).with_context(|| format!("reading {}", path.display()))?
        }
        None if Path::new(DEFAULT_CONFIG).exists() => {
            debug!(path = DEFAULT_CONFIG, "loading config");
            EngineConfig::load(Path::new(DEFAULT_CONFIG))
                .with_context(|| format!("reading {DEFAULT_CONFIG}"))?
        }
        None => EngineConfig::default(),
    };
    if !cli.servers.is_empty() {
        debug!(servers = ?cli.servers, "relays overridden from the command line");
        config.sync.default_servers = cli.servers.clone();
    }
    debug!(servers = ?config.sync.default_servers, "relays");
    Ok(config)
}

/// Throwaway identity whose store holds whatever the command pulls.
async fn viewer(config: EngineConfig) -> anyhow::Result<Session> {
    let engine = Engine::in_memory(config)?;
    let session = engine.create_identity().await?;
    debug!(system = %session.system().short_id(), "viewer identity");
    Ok(session)
}

fn parse_system(hex_key: &str) -> anyhow::Result<PublicKey> {
    PublicKey::from_hex(hex_key).with_context(|| format!("invalid identity key {hex_key:?}"))
}

fn parse_secret(hex_key: &str) -> anyhow::Result<SigningKey> {
    let bytes = hex::decode(hex_key).context("secret key is not hex")?;
    let Ok(secret) = <[u8; 32]>::try_from(bytes.as_slice()) else {
        bail!("secret key must be 32 bytes, got {}", bytes.len());
    };
    Ok(SigningKey::from_bytes(secret))
}

fn cmd_keygen() -> anyhow::Result<()> {
    let key = SigningKey::generate();
    println!("{} New identity", "✓".green().bold());
    println!("  System: {}", key.system().to_hex().cyan());
    println!("  Secret: {}", hex::encode(key.as_bytes()).yellow());
    Ok(())
}

fn cmd_config(config: &EngineConfig) -> anyhow::Result<()> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}

async fn cmd_head(config: EngineConfig, args: SystemArgs) -> anyhow::Result<()> {
    let system = parse_system(&args.system)?;
    let session = viewer(config).await?;
    let report = session
        .sync()
        .load_server_head(&system, &CancelToken::never())
        .await?;
    print_outcomes(&report.servers);
    if report.heads.is_empty() {
        println!("No events held for {}.", system.short_id().cyan());
    }
    for (process, clock) in &report.heads {
        println!("  {}  {}", process.to_hex().dimmed(), clock.to_string().bold());
    }
    Ok(())
}

async fn cmd_backfill(config: EngineConfig, args: SystemArgs) -> anyhow::Result<()> {
    let system = parse_system(&args.system)?;
    let session = viewer(config).await?;
    let report = session.backfill(&system, &CancelToken::never()).await?;
    print_outcomes(&report.servers);

    let held = session.log().ranges_for_system(&system).await?;
    let total: u64 = held.iter().map(|p| ranges::total_items(&p.ranges)).sum();
    let status = if report.complete {
        "complete".green()
    } else {
        "incomplete".yellow()
    };
    println!(
        "Backfilled {}: {} new events, {} held across {} processes ({status})",
        system.short_id().cyan(),
        report.ingested.to_string().bold(),
        total,
        held.len(),
    );
    Ok(())
}

async fn cmd_state(config: EngineConfig, args: SystemArgs) -> anyhow::Result<()> {
    let system = parse_system(&args.system)?;
    let session = viewer(config).await?;
    let report = session.backfill(&system, &CancelToken::never()).await?;
    print_outcomes(&report.servers);

    let Some(state) = session.log().load_system_state(&system).await? else {
        println!("No state known for {}.", system.short_id().cyan());
        return Ok(());
    };
    println!("Identity {}", system.to_hex().cyan().bold());
    for item in &state.crdt_items {
        println!("  {:<12} {}", item.content_type.to_string().yellow(), render(item));
    }
    println!("  {} processes", state.processes.len());
    Ok(())
}

async fn cmd_publish(config: EngineConfig, args: PublishArgs) -> anyhow::Result<()> {
    if args.username.is_none() && args.description.is_none() && args.posts.is_empty() {
        bail!("nothing to publish: pass --username, --description or --post");
    }
    let key = parse_secret(&args.key)?;
    let engine = Engine::in_memory(config)?;
    let session = engine.import_identity(key).await?;
    let cancel = CancelToken::never();

    // Pull first so new events extend the identity's existing clocks.
    session.backfill(&session.system(), &cancel).await?;
    if let Some(name) = &args.username {
        session.set_username(name).await?;
    }
    if let Some(description) = &args.description {
        let value = poly_sdk::session::encode_text(description)?;
        session.set_field(ContentType::DESCRIPTION, value).await?;
    }
    for post in &args.posts {
        let pointer = session.post(post.as_bytes()).await?;
        println!("  {} {}", "posted".green(), pointer);
    }

    let report = session.publish(&cancel).await?;
    print_outcomes(&report.servers);
    println!(
        "{} Published {} events for {}",
        "✓".green().bold(),
        report.ingested,
        session.system().short_id().cyan()
    );
    Ok(())
}

fn render(item: &CrdtItem) -> String {
    match item.content_type {
        ContentType::USERNAME | ContentType::DESCRIPTION => {
            poly_sdk::session::decode_text(&item.value).unwrap_or_else(|| "<undecodable>".into())
        }
        ContentType::SERVER => match decode_servers(&item.value) {
            Ok(servers) => servers.join(", "),
            Err(_) => "<undecodable>".into(),
        },
        _ => format!("{} bytes", item.value.len()),
    }
}

fn print_feed(page: &FeedPage) {
    print_outcomes(&page.servers);
    if page.events.is_empty() {
        println!("No events.");
    }
    for signed in &page.events {
        let Ok(event) = signed.decode_event() else {
            continue;
        };
        let body = match event.content_type {
            ContentType::POST => String::from_utf8_lossy(&event.content).into_owned(),
            other => format!("<{other}>"),
        };
        println!("{}  {}", event.system.short_id().cyan(), body);
    }
}

fn print_outcomes(outcomes: &[ServerOutcome]) {
    for outcome in outcomes {
        match &outcome.status {
            ServerStatus::Synced { ingested, .. } => {
                println!("  {} {} (+{ingested})", "✓".green(), outcome.url)
            }
            ServerStatus::Failed { error } => {
                println!("  {} {} {}", "✗".red(), outcome.url, error.dimmed())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_must_be_32_bytes() {
        assert!(parse_secret("abcd").is_err());
        assert!(parse_secret("zz").is_err());
        let key = SigningKey::generate();
        let parsed = parse_secret(&hex::encode(key.as_bytes())).unwrap();
        assert_eq!(parsed.system(), key.system());
    }

    #[test]
    fn server_flags_replace_defaults() {
        let cli = Cli {
            command: Command::Keygen,
            verbose: false,
            config: None,
            servers: vec!["https://relay.example".into()],
        };
        let config = load_config(&cli).unwrap();
        assert_eq!(config.sync.default_servers, vec!["https://relay.example"]);
    }

    #[test]
    fn config_flag_reads_file_and_flags_still_win() {
        let mut config = EngineConfig::default();
        config.sync.default_servers = vec!["https://from-file.example".into()];
        let path = std::env::temp_dir().join(format!("poly-cli-{}.toml", std::process::id()));
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let mut cli = Cli {
            command: Command::Config,
            verbose: true,
            config: Some(path.clone()),
            servers: Vec::new(),
        };
        let loaded = load_config(&cli).unwrap();
        assert_eq!(loaded.sync.default_servers, vec!["https://from-file.example"]);

        cli.servers = vec!["https://flag.example".into()];
        let loaded = load_config(&cli).unwrap();
        assert_eq!(loaded.sync.default_servers, vec!["https://flag.example"]);

        std::fs::remove_file(&path).unwrap();
        assert!(load_config(&cli).is_err());
    }

    #[test]
    fn text_fields_render_as_text() {
        let item = CrdtItem {
            content_type: ContentType::USERNAME,
            value: poly_sdk::session::encode_text("alice").unwrap(),
            unix_milliseconds: 1,
        };
        assert_eq!(render(&item), "alice");
    }
}
