mod config_commands;
mod recipient_commands;

use std::{collections::HashMap, path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    clap::{Args, Parser, Subcommand},
    mucnotify_config::{MucNotifyConfig, discover_and_load, load_config},
    mucnotify_transport::{
        ConfigServerDirectory, NotificationDispatcher, RoomTarget, ServerDirectory,
        TransportSettings, XmppConnector, transport_plan,
    },
    tokio::io::AsyncReadExt,
    tracing::debug,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "mucnotify", about = "mucnotify: build notifications for XMPP chat rooms")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to use instead of discovery.
    #[arg(long, global = true, env = "MUCNOTIFY_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Post one message into a chat room.
    Send(SendArgs),
    /// Check a room address without connecting.
    Validate {
        /// Room address, e.g. builds@conference.example.com.
        #[arg(long)]
        room: String,
    },
    /// Show the server notifications would go through.
    Servers,
    /// Convert stored room targets.
    Recipient {
        #[command(subcommand)]
        action: recipient_commands::RecipientAction,
    },
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

#[derive(Args)]
struct SendArgs {
    /// Room address, e.g. builds@conference.example.com. `room@` uses the
    /// server's first chat service.
    #[arg(long)]
    room: String,

    /// Room password.
    #[arg(long, env = "MUCNOTIFY_ROOM_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Preferred nickname; a random suffix is always appended.
    #[arg(long)]
    nickname: Option<String>,

    /// Message text, or `-` to read it from stdin.
    #[arg(short, long)]
    message: String,

    /// Placeholder value as NAME=VALUE, for `${NAME}` in room fields.
    #[arg(long = "var", value_parser = parse_var)]
    vars: Vec<(String, String)>,

    /// Exit with an error when a delivery attempt fails.
    #[arg(long, default_value_t = false)]
    strict: bool,
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        },
        _ => Err(format!("expected NAME=VALUE, got `{raw}`")),
    }
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

fn load(cli_config: Option<&PathBuf>) -> anyhow::Result<MucNotifyConfig> {
    match cli_config {
        Some(path) => load_config(path).with_context(|| format!("loading {}", path.display())),
        None => Ok(discover_and_load()),
    }
}

fn directory(cli_config: Option<&PathBuf>) -> ConfigServerDirectory {
    match cli_config {
        Some(path) => ConfigServerDirectory::at(path),
        None => ConfigServerDirectory::discover(),
    }
}

async fn read_message(message: String) -> anyhow::Result<String> {
    if message != "-" {
        return Ok(message);
    }
    let mut text = String::new();
    tokio::io::stdin()
        .read_to_string(&mut text)
        .await
        .context("reading message from stdin")?;
    Ok(text.trim_end().to_string())
}

async fn send(args: SendArgs, cli_config: Option<&PathBuf>) -> anyhow::Result<()> {
    let config = load(cli_config)?;
    let message = read_message(args.message).await?;
    if message.trim().is_empty() {
        anyhow::bail!("refusing to send an empty message");
    }

    let target = RoomTarget::new(args.room.trim())
        .with_password(args.password.as_deref())
        .with_nickname(args.nickname.as_deref());
    let dispatcher = NotificationDispatcher::from_config(
        &config,
        Arc::new(directory(cli_config)),
        Arc::new(XmppConnector),
    )
    .with_variables(args.vars.into_iter().collect::<HashMap<_, _>>());

    let outcome = dispatcher.notify(&target, &message).await;
    println!("{outcome}");
    if args.strict && outcome.is_failure() {
        anyhow::bail!("notification not delivered: {outcome}");
    }
    Ok(())
}

fn servers(cli_config: Option<&PathBuf>) -> anyhow::Result<()> {
    let config = load(cli_config)?;
    match directory(cli_config).current_server() {
        Some(server) => {
            let plan = transport_plan(&server, &TransportSettings::from(&config.delivery));
            println!(
                "{}@{} via {}:{} (service {}, security {:?}{})",
                server.username(),
                server.host(),
                plan.host,
                plan.port,
                plan.service_name,
                plan.security,
                if plan.direct_tls {
                    ", direct TLS"
                } else {
                    ""
                },
            );
            if config.servers.len() > 1 {
                println!("{} more registered, only the first is used", config.servers.len() - 1);
            }
        },
        None => println!("No server configured."),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    debug!(version = env!("CARGO_PKG_VERSION"), "mucnotify starting");

    let cli_config = cli.config.as_ref();
    match cli.command {
        Commands::Send(args) => send(args, cli_config).await,
        Commands::Validate { room } => recipient_commands::validate(&room),
        Commands::Servers => servers(cli_config),
        Commands::Recipient { action } => recipient_commands::handle_recipient(action),
        Commands::Config { action } => config_commands::handle_config(action, cli_config),
    }
}
