#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! CLI for exercising a MAPI ROP server: logon, folders and notifications

use clap::{Parser, Subcommand, ValueEnum};
use mapi_rop_client::{
    AddressFamily, ConnectionConfig, EngineConfig, Notification, NotificationTypes, Scope,
    Session, SpecialFolder, TcpTransport, UdpPushListener,
};
use std::collections::BTreeMap;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rop-cli")]
#[command(about = "Client for MAPI ROP servers: logon, folders and notifications")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Show the effective engine tunables
    Config,

    /// Log on and list the special folders
    Logon,

    /// Create a folder under a special folder
    CreateFolder {
        /// Display name of the new folder
        name: String,

        /// Parent folder
        #[arg(long, default_value = "inbox", value_parser = parse_folder)]
        parent: SpecialFolder,
    },

    /// Subscribe and print events as they arrive
    Watch {
        /// Event categories, comma separated (new-mail,created,deleted,...)
        #[arg(long, default_value = "new-mail,created,deleted", value_parser = parse_types)]
        types: NotificationTypes,

        /// Restrict to one special folder instead of the whole store
        #[arg(long, value_parser = parse_folder)]
        folder: Option<SpecialFolder>,

        /// How to wait for events
        #[arg(long, value_enum, default_value = "poll")]
        mode: WatchMode,

        /// Stop after this many events
        #[arg(long, default_value = "1")]
        count: usize,
    },

    /// Register a UDP push callback and wait for one datagram
    Push {
        /// Local UDP port the server should send to
        #[arg(long)]
        port: u16,

        /// Opaque token echoed back in the datagram
        #[arg(long, default_value = "rop-cli")]
        opaque: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum WatchMode {
    /// Sleep and drain
    Poll,
    /// Long-poll with AsyncWait, then drain
    Async,
}

fn parse_types(s: &str) -> Result<NotificationTypes, String> {
    let types = NotificationTypes::parse_list(s)
        .map_err(|name| format!("Unknown event type '{name}'"))?;
    if types.is_empty() {
        return Err("No event types given".to_string());
    }
    Ok(types)
}

fn parse_folder(s: &str) -> Result<SpecialFolder, String> {
    SpecialFolder::from_name(s).ok_or_else(|| format!("Unknown folder '{s}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let engine = EngineConfig::from_env()?;

    if matches!(args.command, Command::Config) {
        return cmd_config(&engine, &args);
    }

    let config = ConnectionConfig::from_env()?;
    let mut session = Session::new(TcpTransport::new(), engine);
    if !session.connect(&config).await? {
        anyhow::bail!("Server rejected credentials for {}", config.username);
    }
    let logon = session.logon(&config.user_dn).await?.into_result()?;

    let result = match &args.command {
        Command::Config => Ok(()),
        Command::Logon => cmd_logon(&logon, &args),
        Command::CreateFolder { name, parent } => {
            cmd_create_folder(&mut session, &logon, &args, name, *parent).await
        }
        Command::Watch {
            types,
            folder,
            mode,
            count,
        } => cmd_watch(&mut session, &logon, &args, *types, *folder, *mode, *count).await,
        Command::Push { port, opaque } => cmd_push(&mut session, &args, *port, opaque).await,
    };

    session.disconnect().await?;
    result
}

fn cmd_config(engine: &EngineConfig, args: &Args) -> anyhow::Result<()> {
    let values: BTreeMap<&str, String> = EngineConfig::NAMES
        .iter()
        .filter_map(|name| engine.get(name).map(|value| (*name, value)))
        .collect();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&values)?);
    } else {
        for name in EngineConfig::NAMES {
            if let Some(value) = values.get(name) {
                println!("{name:<24} {value}");
            }
        }
    }
    Ok(())
}

fn cmd_logon(logon: &mapi_rop_client::Logon, args: &Args) -> anyhow::Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(&logon.mailbox)?);
        return Ok(());
    }

    let time = logon
        .mailbox
        .logon_time
        .to_naive()
        .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
    println!("Logon time: {time}");
    println!("Replica:    {}", logon.mailbox.replica_id);
    println!();
    println!("{:<20} Folder ID", "Folder");
    println!("{}", "-".repeat(40));
    for folder in SpecialFolder::ALL {
        println!("{:<20} {:#018x}", folder, logon.mailbox.folder_id(folder));
    }
    Ok(())
}

async fn cmd_create_folder(
    session: &mut Session<TcpTransport>,
    logon: &mapi_rop_client::Logon,
    args: &Args,
    name: &str,
    parent: SpecialFolder,
) -> anyhow::Result<()> {
    let parent_id = logon.mailbox.folder_id(parent);
    let opened = session
        .open_folder(logon.handle, parent_id)
        .await?
        .into_result()?;
    let created = session
        .create_generic_folder(opened.handle, name)
        .await?
        .into_result()?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&created)?);
    } else {
        println!("Created '{name}' as {:#018x} under {parent}", created.folder_id);
    }
    Ok(())
}

async fn cmd_watch(
    session: &mut Session<TcpTransport>,
    logon: &mapi_rop_client::Logon,
    args: &Args,
    types: NotificationTypes,
    folder: Option<SpecialFolder>,
    mode: WatchMode,
    count: usize,
) -> anyhow::Result<()> {
    let scope = folder.map_or(Scope::WholeStore, |f| Scope::Folder(logon.mailbox.folder_id(f)));
    session.subscribe(types, scope).await?.into_result()?;
    let context = match mode {
        WatchMode::Poll => None,
        WatchMode::Async => Some(session.async_connect().await?),
    };

    let mut seen = 0;
    while seen < count {
        let events = match context {
            Some(handle) => session.await_and_poll(handle).await?,
            None => session.poll(true).await?,
        };
        if events.is_empty() && context.is_none() {
            eprintln!("No events after {} attempts", session.config().retry_count);
            break;
        }
        for event in &events {
            print_event(event, args.json)?;
        }
        seen += events.len();
    }
    Ok(())
}

async fn cmd_push(
    session: &mut Session<TcpTransport>,
    args: &Args,
    port: u16,
    opaque: &str,
) -> anyhow::Result<()> {
    let listener = UdpPushListener::from_config(session.config());
    session
        .register_push(AddressFamily::Inet, port, opaque.as_bytes())
        .await?;

    let Some(datagram) = session
        .push_received(&listener, AddressFamily::Inet, port)
        .await?
    else {
        eprintln!("No push datagram within {:?}", session.config().push_timeout);
        return Ok(());
    };

    let drained = session.drain_until_empty().await?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&drained)?);
    } else {
        println!(
            "Datagram: {}",
            String::from_utf8_lossy(&datagram)
        );
        for event in &drained.events {
            print_event(event, false)?;
        }
    }
    Ok(())
}

fn print_event(event: &Notification, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    let kind = event
        .data
        .notification_type()
        .map_or_else(|e| e.to_string(), |t| format!("{t:?}"));
    let id = |v: Option<u64>| v.map_or_else(|| "-".to_string(), |v| format!("{v:#018x}"));
    println!(
        "{:#010x} {:<24} folder {} message {}",
        event.handle,
        kind,
        id(event.data.folder_id),
        id(event.data.message_id),
    );
    Ok(())
}
