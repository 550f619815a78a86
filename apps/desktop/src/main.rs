use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use client_core::{
    ChatStore, ClientEvent, HttpApi, InMemoryCredentialStore, StoreChange, SyncClient, SyncConfig,
    WsTransportFactory,
};
use tracing::info;
use url::Url;

#[derive(Parser, Debug)]
struct Args {
    /// http(s) origin of the chat server
    #[arg(long)]
    server_url: String,
    /// session access token
    #[arg(long)]
    token: String,
    /// dedicated websocket endpoint, overrides the one derived from server-url
    #[arg(long)]
    websocket_url: Option<Url>,
    #[arg(long, default_value_t = false)]
    no_notifications: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let credentials = Arc::new(InMemoryCredentialStore::new(args.token));
    let store = ChatStore::new();
    let api = Arc::new(HttpApi::new(args.server_url.clone(), credentials.clone()));
    let mut config = SyncConfig::new(args.server_url);
    config.websocket_url = args.websocket_url;
    config.notifications_enabled = !args.no_notifications;

    let client = SyncClient::new(
        Arc::clone(&store),
        api,
        Arc::new(WsTransportFactory),
        credentials,
        config,
    );

    let mut events = client.subscribe_events();
    let mut changes = store.subscribe_changes();

    client.connect().await;
    info!("sync client started; press ctrl-c to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => {
                match event {
                    Ok(ClientEvent::Connected) => println!("* connected"),
                    Ok(ClientEvent::Disconnected) => println!("* disconnected"),
                    Ok(ClientEvent::SessionExpired) => {
                        println!("* session expired; sign in again");
                        break;
                    }
                    Ok(ClientEvent::Notification { title, body, .. }) => {
                        println!("[notify] {title}: {body}");
                    }
                    Ok(ClientEvent::Error(message)) => println!("[error] {message}"),
                    Err(_) => break,
                }
            }
            change = changes.recv() => {
                if let Ok(StoreChange::Chats) = change {
                    let chats = store.chats().await;
                    println!("-- {} chats --", chats.len());
                    for chat in chats.iter().take(10) {
                        let name = chat
                            .title
                            .clone()
                            .or_else(|| chat.other_display_name.clone())
                            .or_else(|| chat.other_username.clone())
                            .unwrap_or_else(|| format!("chat {}", chat.id.0));
                        let unread = if chat.unread_count > 0 {
                            format!(" ({} unread)", chat.unread_count)
                        } else {
                            String::new()
                        };
                        println!("  {name}{unread}: {}", chat.last_message.clone().unwrap_or_default());
                    }
                }
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
