//! Wiring of channels, feeds and the conversion viewer for one session.

use std::sync::Arc;

use anyhow::Context;
use servicedesk_conversion::{ArtifactStore, ConversionApi, ConversionStatus, ConversionViewer};
use servicedesk_inbox::{
    attach_channel, DeskApi, FrameSender, MessageFeed, NotificationFeed, NotificationFilter,
};
use servicedesk_realtime::{ChannelEndpoint, ConnectionManager, ConnectionState, Transport, TungsteniteTransport};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::AgentConfig;

/// Run a session until `shutdown` fires, then tear everything down.
pub async fn run(config: AgentConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    let transport: Arc<dyn Transport> = Arc::new(TungsteniteTransport);
    let api = Arc::new(DeskApi::new(config.api_base_url.clone(), config.auth_token.clone()));
    let pumps = shutdown.child_token();
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();
    let mut managers: Vec<Arc<ConnectionManager>> = Vec::new();

    // ---- notifications ----

    let notifications = Arc::new(NotificationFeed::new(api.clone()));
    notifications.switch_user(Some(config.user_id));

    let manager = Arc::new(ConnectionManager::new(
        "notifications",
        Arc::clone(&transport),
        config.connection(),
    ));
    notifications.set_channel(Some(manager.clone() as Arc<dyn FrameSender>));
    tasks.push(attach_channel(&manager, notifications.clone(), pumps.clone()));
    tasks.push(log_state(&manager, pumps.clone()));
    manager
        .connect(
            &ChannelEndpoint::notifications(&config.ws_base_url, config.user_id)
                .with_token(config.auth_token.clone()),
        )
        .context("notification channel endpoint")?;
    managers.push(manager);

    // ---- conversation ----

    let messages = match &config.conversation_id {
        Some(conversation_id) => {
            let feed = Arc::new(MessageFeed::new(api.clone()));
            feed.switch_conversation(Some(conversation_id.clone()));

            let manager = Arc::new(ConnectionManager::new(
                "conversation",
                Arc::clone(&transport),
                config.connection(),
            ));
            tasks.push(attach_channel(&manager, feed.clone(), pumps.clone()));
            tasks.push(log_state(&manager, pumps.clone()));
            manager
                .connect(
                    &ChannelEndpoint::conversation(&config.ws_base_url, conversation_id)
                        .with_token(config.auth_token.clone()),
                )
                .context("conversation channel endpoint")?;
            managers.push(manager);
            Some(feed)
        }
        None => None,
    };

    // ---- preview ----

    let artifacts = Arc::new(ArtifactStore::new());
    let viewer = config.preview_attachment_id.map(|attachment_id| {
        let source = Arc::new(ConversionApi::new(
            config.api_base_url.clone(),
            config.auth_token.clone(),
        ));
        let viewer = ConversionViewer::new(source, artifacts.clone());
        tasks.push(log_conversion(&viewer, pumps.clone()));
        viewer.view(attachment_id);
        viewer
    });

    tracing::info!(
        user_id = config.user_id,
        conversation_id = ?config.conversation_id,
        preview_attachment_id = ?config.preview_attachment_id,
        "Session started"
    );

    shutdown.cancelled().await;
    tracing::info!("Shutting down session");

    pumps.cancel();
    notifications.set_channel(None);
    for task in tasks {
        let _ = task.await;
    }
    for manager in &managers {
        manager.shutdown().await;
    }
    if let Some(viewer) = viewer {
        viewer.reset();
    }

    tracing::info!(
        unread = notifications.unread_count(),
        held = notifications.list(NotificationFilter::All).len(),
        messages = messages.as_ref().map_or(0, |feed| feed.log().len()),
        live_artifacts = artifacts.live_count(),
        "Session stopped"
    );
    Ok(())
}

/// Log every state change of `manager` until cancelled.
fn log_state(manager: &ConnectionManager, cancel: CancellationToken) -> JoinHandle<()> {
    let mut state = manager.watch_state();
    let channel = manager.label().to_string();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let current = *state.borrow_and_update();
                    match current {
                        ConnectionState::Closed => {
                            tracing::error!(channel = %channel, "Channel gave up reconnecting");
                        }
                        other => tracing::info!(channel = %channel, state = ?other, "Channel state changed"),
                    }
                }
            }
        }
    })
}

/// Log conversion transitions until cancelled.
fn log_conversion(viewer: &ConversionViewer, cancel: CancellationToken) -> JoinHandle<()> {
    let mut transitions = viewer.subscribe();
    let mut state = viewer.watch();

    tokio::spawn(async move {
        loop {
            let status = tokio::select! {
                _ = cancel.cancelled() => break,
                status = transitions.recv() => match status {
                    Ok(status) => status,
                    Err(_) => break,
                },
            };
            let job = state.borrow_and_update().clone();
            match status {
                ConversionStatus::Ready => {
                    tracing::info!(attachment_id = ?job.attachment_id, polls = job.poll_count, "Preview ready");
                }
                ConversionStatus::Failed | ConversionStatus::NotSupported => {
                    tracing::warn!(
                        attachment_id = ?job.attachment_id,
                        status = ?status,
                        error = job.error_message.as_deref().unwrap_or_default(),
                        "Preview unavailable, offer the original download"
                    );
                }
                other => tracing::debug!(status = ?other, "Conversion state changed"),
            }
        }
    })
}
