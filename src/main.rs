//! Entry point: load config, open the family (and chat) channels, log live updates.

use lentik_live::config::Config;
use lentik_live::services::{Backoff, Change};
use lentik_live::{ApiClient, ChannelContext, LinkStatus, LiveSession, Reconciler, SessionOptions};
use lentik_live::{Connector, WsConnector};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let api = ApiClient::new(&config.api_base_url, config.session_token.clone())?;
    let connector: Arc<dyn Connector> = Arc::new(WsConnector::new(
        config.ws_base_url()?,
        config.session_token.clone(),
    ));
    let options = SessionOptions {
        ping_interval: config.ping_interval,
        toast_ttl: config.toast_ttl,
        ..SessionOptions::new(config.me_username.clone())
    };

    let mut contexts = vec![ChannelContext::family(config.family_id.clone())?];
    if let Some(chat_id) = &config.chat_id {
        contexts.push(ChannelContext::chat(config.family_id.clone(), chat_id.clone())?);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();
    for context in contexts {
        let session = LiveSession::new(connector.clone(), options.clone());
        tasks.push(tokio::spawn(follow(
            session,
            context,
            api.clone(),
            shutdown_rx.clone(),
        )));
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    shutdown_tx.send_replace(true);
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

/// Keep `context` open until shutdown, reopening with backoff whenever the link drops.
/// Each reopen starts from a fresh reconciler, reseeded from REST for chat contexts.
async fn follow(
    mut session: LiveSession,
    context: ChannelContext,
    api: ApiClient,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::default();
    loop {
        let reconciler = match session.open(context.clone()).await {
            Ok(reconciler) => {
                backoff.reset();
                reconciler
            }
            Err(e) => {
                warn!(context = %context, error = %e, "open failed");
                if wait_or_shutdown(backoff.next_delay(), &mut shutdown).await {
                    return;
                }
                continue;
            }
        };
        let mut changes = reconciler.changes();
        let mut status = session.status();

        if let Some(chat_id) = &context.chat_id {
            match api.messages(&context.family_id, chat_id).await {
                Ok(history) => reconciler.load_messages(chat_id, history),
                Err(e) => warn!(context = %context, error = %e, "history fetch failed"),
            }
        }

        let stop = loop {
            tokio::select! {
                _ = shutdown.changed() => break true,
                _ = until_not_open(&mut status) => break false,
                change = changes.recv() => match change {
                    Ok(change) => report(&reconciler, &api, change).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(context = %context, skipped, "change feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break false,
                },
            }
        };

        session.close();
        if stop || wait_or_shutdown(backoff.next_delay(), &mut shutdown).await {
            return;
        }
        info!(context = %context, "reconnecting");
    }
}

async fn until_not_open(status: &mut watch::Receiver<LinkStatus>) {
    let _ = status.wait_for(|s| *s != LinkStatus::Open).await;
}

/// Sleep for `delay`; true if shutdown was requested meanwhile.
async fn wait_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
        _ = shutdown.changed() => true,
    }
}

async fn report(reconciler: &Reconciler, api: &ApiClient, change: Change) {
    match change {
        Change::Messages { chat_id } => {
            let messages = reconciler.messages(&chat_id);
            match messages.last() {
                Some(last) => info!(
                    chat_id = %chat_id,
                    count = messages.len(),
                    last_id = %last.id,
                    last_text = %last.text,
                    "messages"
                ),
                None => info!(chat_id = %chat_id, count = 0, "messages"),
            }
        }
        Change::ToastAdded { id } => {
            if let Some(toast) = reconciler.toast(&id) {
                info!(
                    toast_id = %toast.id,
                    kind = ?toast.kind,
                    chat_id = ?toast.chat_id,
                    "{}: {}",
                    toast.title,
                    toast.body
                );
            }
        }
        Change::ToastRemoved { id } => info!(toast_id = %id, "toast removed"),
        Change::Unread(unread) => info!(unread, "unread"),
        Change::MembershipStale => match api.my_families().await {
            Ok(families) => info!(
                family_id = %reconciler.family_id(),
                families = families.len(),
                "memberships refreshed"
            ),
            Err(e) => warn!(error = %e, "membership refresh failed"),
        },
    }
}
