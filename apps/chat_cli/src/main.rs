use std::{collections::HashSet, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    load_settings, EngineHandle, EngineSnapshot, EngineUpdate, ReconciliationEngine, UserAction,
    WsTransport, DEFAULT_CONFIG_PATH,
};
use shared::domain::MemberId;
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{broadcast, watch},
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Overrides `server_url` from the config file and environment.
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    username: String,
    /// Username of the member to open a conversation with once the roster arrives.
    #[arg(long)]
    peer: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();

    let mut settings = load_settings(&args.config)?;
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    info!(server_url = %settings.server_url, username = %args.username, "chat_cli: starting");

    let (transport, _transport_task) =
        WsTransport::connect(&settings).context("failed to start transport")?;
    let (engine, _engine_task) = ReconciliationEngine::new(transport, settings).spawn();
    let (latest_tx, latest_rx) = watch::channel(Arc::new(EngineSnapshot::default()));

    tokio::spawn(render(engine.subscribe(), engine.clone(), args.peer, latest_tx));
    engine
        .dispatch(UserAction::Join {
            username: args.username,
        })
        .await?;

    read_commands(&engine, latest_rx).await?;
    engine.dispatch(UserAction::Leave).await?;
    Ok(())
}

async fn read_commands(
    engine: &EngineHandle,
    latest: watch::Receiver<Arc<EngineSnapshot>>,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("failed to read stdin")? {
        let line = line.trim();
        let (command, rest) = line
            .split_once(' ')
            .map_or((line, ""), |(command, rest)| (command, rest.trim()));
        let action = match command {
            "" => continue,
            "/quit" => break,
            "/read" => UserAction::MarkRead,
            "/close" => UserAction::CloseConversation,
            "/typing" => UserAction::SetTyping(rest != "off"),
            "/peers" => {
                print_peers(&latest.borrow());
                continue;
            }
            "/peer" => {
                let peer = find_peer(&latest.borrow(), rest);
                match peer {
                    Some(peer) => UserAction::SelectPeer { peer },
                    None => {
                        eprintln!("! no member named '{rest}'");
                        continue;
                    }
                }
            }
            _ => UserAction::SendMessage {
                content: line.to_string(),
            },
        };
        engine.dispatch(action).await?;
    }
    Ok(())
}

async fn render(
    mut updates: broadcast::Receiver<EngineUpdate>,
    engine: EngineHandle,
    mut pending_peer: Option<String>,
    latest: watch::Sender<Arc<EngineSnapshot>>,
) {
    let mut printed = HashSet::new();
    let mut typing = None;
    let mut connected = false;
    loop {
        let snapshot = match updates.recv().await {
            Ok(EngineUpdate::Snapshot(snapshot)) => snapshot,
            Ok(EngineUpdate::ScrollToLatest(_)) => continue,
            Ok(EngineUpdate::Error(err)) => {
                eprintln!("! {err}");
                continue;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "chat_cli: snapshot stream lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => return,
        };

        if snapshot.connected != connected {
            connected = snapshot.connected;
            println!("-- {}", if connected { "connected" } else { "offline" });
        }

        if let Some(peer) = pending_peer
            .as_deref()
            .and_then(|name| find_peer(&snapshot, name))
        {
            pending_peer = None;
            if engine.dispatch(UserAction::SelectPeer { peer }).await.is_err() {
                return;
            }
        }

        if let Some(active) = &snapshot.active {
            for view in &active.messages {
                if printed.insert(view.message.id.clone()) {
                    let who = if view.is_own {
                        "you"
                    } else {
                        view.message.sender.username.as_str()
                    };
                    println!(
                        "[{}] {who}: {}",
                        view.message.created_at.format("%H:%M:%S"),
                        view.message.content
                    );
                }
            }
            let summary = active.typing_summary();
            if summary != typing {
                if let Some(summary) = &summary {
                    println!("   {summary}");
                }
                typing = summary;
            }
        }

        let _ = latest.send(snapshot);
    }
}

fn find_peer(snapshot: &EngineSnapshot, username: &str) -> Option<MemberId> {
    snapshot
        .peers
        .iter()
        .find(|peer| peer.member.username == username)
        .map(|peer| peer.member.id.clone())
}

fn print_peers(snapshot: &EngineSnapshot) {
    for peer in &snapshot.peers {
        let marker = if peer.selected { '*' } else { ' ' };
        let unread = if peer.unread > 0 {
            format!(" ({} unread)", peer.unread)
        } else {
            String::new()
        };
        println!("{marker} {} [{:?}]{unread}", peer.member.username, peer.member.status);
    }
}
