use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use inbox_sync::common::{ConversationId, OutgoingMessage};
use inbox_sync::config::{self, AppConfig};
use inbox_sync::network::{ConversationFilter, HttpInboxApi, InboxApi};
use inbox_sync::InboxSession;

#[derive(Parser)]
#[command(
    name = "inbox-sync",
    version,
    about = "Keeps a marketplace inbox in sync from the command line"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Clone, PartialEq, Eq)]
enum Mode {
    /// Follow the inbox (and optionally one conversation) until Ctrl-C
    Watch {
        #[arg(long)]
        conversation: Option<u64>,
        /// Seconds between status lines
        #[arg(long, default_value_t = 10)]
        every: u64,
    },
    /// Send a text message to a conversation
    Send { conversation: u64, text: String },
    /// Print the unread count once
    Unread,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();
    let app_config = config::load_config(&cli.config);
    let token = config::api_token();
    if token.is_none() {
        log::warn!("{} is not set; requests will be anonymous", config::TOKEN_ENV);
    }
    let api: Arc<dyn InboxApi> = Arc::new(HttpInboxApi::new(app_config.api_base_url.clone(), token));

    match cli.mode.unwrap_or(Mode::Watch {
        conversation: None,
        every: 10,
    }) {
        Mode::Watch {
            conversation,
            every,
        } => run_watch(api, &app_config, conversation.map(ConversationId), every).await,
        Mode::Send { conversation, text } => {
            let session = InboxSession::new(api, None, app_config.settings());
            session.active().open(ConversationId(conversation)).await?;
            let sent = session.active().send(OutgoingMessage::text(text)).await?;
            println!("sent message {}", sent.id);
            session.shutdown();
            Ok(())
        }
        Mode::Unread => {
            println!("{}", api.unread_count().await?);
            Ok(())
        }
    }
}

async fn run_watch(
    api: Arc<dyn InboxApi>,
    app_config: &AppConfig,
    conversation: Option<ConversationId>,
    every: u64,
) -> Result<(), Box<dyn Error>> {
    // The CLI has no realtime connection, so every synchronizer polls.
    let session = InboxSession::new(api, None, app_config.settings());
    session.start(ConversationFilter::default()).await;

    if let Some(conversation_id) = conversation {
        if let Err(err) = session.select_conversation(conversation_id).await {
            log::error!("Could not open conversation {conversation_id}: {err}");
        }
    }

    let mut badge = session.badge().watch();
    let mut ticker = tokio::time::interval(Duration::from_secs(every.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = badge.changed() => {
                if changed.is_err() {
                    break;
                }
                log::info!("Unread badge: {}", *badge.borrow_and_update());
            }
            _ = ticker.tick() => print_status(&session),
        }
    }

    session.shutdown();
    Ok(())
}

fn print_status(session: &InboxSession) {
    let list = session.list().snapshot();
    let error = list
        .last_error
        .map(|err| format!(" (last error: {err})"))
        .unwrap_or_default();
    log::info!(
        "{} conversations on page {}/{}{error}",
        list.conversations.len(),
        list.pagination.current_page,
        list.pagination.last_page
    );
    for summary in list.conversations.iter().take(5) {
        let preview = summary
            .last_message
            .as_ref()
            .map(|last| last.snippet.as_str())
            .unwrap_or("");
        log::info!(
            "  #{} {} [{} unread] {preview}",
            summary.id,
            summary.participant.name,
            summary.unread_count
        );
    }

    let active = session.active().snapshot();
    if let Some(conversation_id) = active.conversation_id {
        log::info!(
            "Conversation {conversation_id}: {:?}, {} messages, push {}",
            active.phase,
            active.messages.len(),
            if active.push_connected { "on" } else { "off" }
        );
        if let Some(last) = active.messages.last() {
            log::info!("  latest #{} from {}: {}", last.id, last.sender_id, last.content);
        }
    }
}
