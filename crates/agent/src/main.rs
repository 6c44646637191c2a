//! `servicedesk-agent` -- headless real-time client.
//!
//! Connects the notification channel for one user (and optionally one
//! conversation), keeps the local stores reconciled with the REST API, and
//! can track the conversion of one attachment to a previewable artifact.
//! Runs until Ctrl-C.
//!
//! # Environment variables
//!
//! | Variable                  | Required | Default  | Description                               |
//! |---------------------------|----------|----------|-------------------------------------------|
//! | `API_BASE_URL`            | yes      | --       | REST root, e.g. `https://host/api`        |
//! | `WS_BASE_URL`             | yes      | --       | WebSocket root, e.g. `wss://host/ws`      |
//! | `USER_ID`                 | yes      | --       | Integer ID of the signed-in user          |
//! | `AUTH_TOKEN`              | no       | --       | Bearer token                              |
//! | `CONVERSATION_ID`         | no       | --       | Conversation to follow                    |
//! | `PREVIEW_ATTACHMENT_ID`   | no       | --       | Attachment to convert and preview         |
//! | `RECONNECT_MAX_ATTEMPTS`  | no       | `5`      | Reconnect budget per outage               |
//! | `RECONNECT_BASE_DELAY_MS` | no       | `1000`   | First reconnect delay                     |
//! | `RECONNECT_MAX_DELAY_MS`  | no       | `30000`  | Reconnect delay cap                       |
//! | `KEEPALIVE_INTERVAL_SECS` | no       | `30`     | Seconds between keepalive pings           |
//! | `LOG_FORMAT`              | no       | `pretty` | `pretty` or `json`                        |

use servicedesk_agent::app;
use servicedesk_agent::config::{AgentConfig, LogFormat};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str =
    "servicedesk_agent=info,servicedesk_realtime=info,servicedesk_inbox=info,servicedesk_conversion=info";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = AgentConfig::from_env();
    let log_format = config.as_ref().map_or(LogFormat::Pretty, |c| c.log_format);
    init_tracing(log_format);

    let config = config.unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        api_base_url = %config.api_base_url,
        ws_base_url = %config.ws_base_url,
        user_id = config.user_id,
        "Starting servicedesk-agent",
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            }
            shutdown.cancel();
        });
    }

    if let Err(e) = app::run(config, shutdown).await {
        tracing::error!(error = %e, "Session failed");
        std::process::exit(1);
    }
}

fn init_tracing(format: LogFormat) {
    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
    );

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
