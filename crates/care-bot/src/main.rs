//! care-bot: CARE WhatsApp Bot main binary
//!
//! Usage:
//!   care-bot                      - Start the webhook server
//!   care-bot send <phone> [...]   - Send a one-off message
//!   care-bot check-token          - Verify the WhatsApp access token
//!   care-bot --help               - Show help

mod cli;

use care_core::Config;
use care_whatsapp::{WhatsAppBot, WhatsAppClient};
use tracing_subscriber::EnvFilter;

/// Run mode
#[derive(Debug, PartialEq, Eq)]
enum RunMode {
    /// Webhook + admin server
    Serve,
    Send(cli::SendCommand),
    CheckToken,
    Help,
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = parse_args(&args)?;

    match mode {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("care-bot {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        _ => {}
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = Config::load().map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    match mode {
        RunMode::Serve => run_server(config).await,
        RunMode::Send(command) => {
            let client = WhatsAppClient::from_config(&config.whatsapp)?;
            cli::send(&client, &command).await
        }
        RunMode::CheckToken => {
            let client = WhatsAppClient::from_config(&config.whatsapp)?;
            cli::check_token(&client).await
        }
        RunMode::Help | RunMode::Version => Ok(()),
    }
}

/// Parse command line arguments (program name excluded)
fn parse_args(args: &[String]) -> anyhow::Result<RunMode> {
    let Some((command, rest)) = args.split_first() else {
        return Ok(RunMode::Serve);
    };

    match command.as_str() {
        "serve" => Ok(RunMode::Serve),
        "send" => Ok(RunMode::Send(cli::parse_send(rest)?)),
        "check-token" => Ok(RunMode::CheckToken),
        "--help" | "-h" | "help" => Ok(RunMode::Help),
        "--version" | "-v" | "-V" => Ok(RunMode::Version),
        other => anyhow::bail!("Unknown command: {} (try --help)", other),
    }
}

/// Print help message
fn print_help() {
    println!("care-bot - CARE WhatsApp Bot");
    println!();
    println!("Usage:");
    println!("  care-bot [serve]                         Start the webhook server");
    println!("  care-bot send <phone>                    Send the hello_world template");
    println!("  care-bot send <phone> template [name]    Send a template message");
    println!("  care-bot send <phone> text <message>     Send a text message");
    println!("  care-bot check-token                     Verify the WhatsApp access token");
    println!("  care-bot --help                          Show this help message");
    println!("  care-bot --version                       Show version");
    println!();
    println!("Environment Variables:");
    println!("  WHATSAPP_ACCESS_TOKEN          Cloud API access token (required)");
    println!("  WHATSAPP_PHONE_NUMBER_ID       Business phone number id (required)");
    println!("  WHATSAPP_WEBHOOK_VERIFY_TOKEN  Webhook verify token (required)");
    println!("  WHATSAPP_APP_SECRET            App secret for payload signatures");
    println!("  WHATSAPP_API_VERSION           Graph API version (default: v22.0)");
    println!("  CARE_API_BASE_URL              CARE API base URL (required)");
    println!("  CARE_API_KEY                   CARE API key (required)");
    println!("  SECRET_KEY                     Bot token signing secret (required)");
    println!("  BOT_PORT                       HTTP port (default: 8000)");
    println!("  ADMIN_API_KEY                  Bearer key for /admin routes");
    println!("  DB_PATH                        SQLite path (default: data/care-bot.db)");
    println!("  SESSION_TIMEOUT_MINUTES        Idle session timeout (default: 30)");
    println!("  TOKEN_EXPIRY_MINUTES           Bot token lifetime (default: 1440)");
    println!();
    println!("A care-bot.toml in the working directory is used when present.");
}

/// Run the webhook server until Ctrl+C
async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting care-bot...");
    tracing::info!("CARE API: {}", config.care_api.base_url);

    let bot = WhatsAppBot::from_config(&config)?;

    bot.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
        }
        tracing::info!("Shutdown signal received");
    })
    .await?;

    tracing::info!("care-bot stopped");
    Ok(())
}
