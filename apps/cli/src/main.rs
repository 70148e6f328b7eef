use std::sync::Arc;

use anyhow::Result;
use chat_core::{
    collaborators::{RestAgreementService, RestHistoryService, RestImageStore},
    connection::{ConnectionConfig, ConnectionManager},
    ClientEvent, ConversationClient,
};
use clap::Parser;
use shared::domain::UserId;
use tracing::warn;

mod config;

#[derive(Parser, Debug)]
struct Args {
    /// User this client signs in as.
    #[arg(long)]
    user: String,
    /// Peer whose conversation to open.
    #[arg(long)]
    peer: String,
    /// Optional text message to send once the conversation is open.
    #[arg(long)]
    message: Option<String>,
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    api_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let settings = config::load_settings();
    let server_url = args.server_url.unwrap_or(settings.server_url.clone());
    let api_url = args.api_url.unwrap_or(settings.api_url.clone());

    let mut connection_config = ConnectionConfig::new(server_url);
    connection_config.reconnect_delay = settings.reconnect_delay();
    connection_config.heartbeat = settings.heartbeat();

    let client = ConversationClient::new_with_collaborators(
        UserId::from(args.user.as_str()),
        ConnectionManager::new(connection_config),
        Arc::new(RestHistoryService::new(&api_url)),
        Arc::new(RestImageStore::new(&api_url)),
        Arc::new(RestAgreementService::new(&api_url)),
    );
    let mut events = client.subscribe_events();
    client.start().await?;

    let peer = UserId::from(args.peer.as_str());
    let conversation = client.open_conversation(peer.clone()).await?;
    for message in conversation.messages().await {
        println!("[{}] {}: {}", message.timestamp, message.sender_id, message.content);
    }

    if let Some(text) = &args.message {
        client.send_text(&peer, text).await?;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ClientEvent::MessageReceived { peer_id, message }) => {
                    println!("[{}] {}: {}", message.timestamp, peer_id, message.content);
                }
                Ok(ClientEvent::AgreementUpdated { agreement, .. }) => {
                    println!(
                        "agreement {} for '{}' is now {:?}",
                        agreement.id.0, agreement.item_name, agreement.status
                    );
                }
                Ok(ClientEvent::TimelineUpdated { .. }) => {}
                Ok(ClientEvent::Error(reason)) => warn!(%reason, "client error"),
                Err(err) => {
                    warn!("event stream lagged or closed: {err}");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.shutdown().await;
    Ok(())
}
