use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use herald_core::templates::TemplateTable;
use herald_events::delivery::email::DEFAULT_FROM_ADDRESS;
use herald_events::{
    Channel, ChannelConfig, CommitMode, EmailConfig, InMemoryChannel, LogTransport, MailTransport,
    NotificationService, Notifier, ResilienceConfig, ResilientProducer, SmtpTransport,
    ValidatingConsumer,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use herald_api::config::ServerConfig;
use herald_api::router::build_app_router;
use herald_api::state::AppState;

const DEFAULT_LOG_FILTER: &str = "herald_api=debug,herald_events=debug,tower_http=debug";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ServerConfig::from_env();
    let channel_config = ChannelConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = config.port,
        topic = %channel_config.topic,
        group_id = %channel_config.group_id,
        bootstrap_servers = %channel_config.bootstrap_servers,
        "Configuration loaded"
    );

    let channel = InMemoryChannel::from_config(&channel_config);
    let shutdown = CancellationToken::new();

    let producer = Arc::new(
        ResilientProducer::new(
            Arc::new(channel.clone()),
            channel_config.topic.clone(),
            ResilienceConfig::from_env(),
        )
        .with_shutdown(shutdown.clone()),
    );
    let notifications = Arc::new(NotificationService::new(
        Arc::new(TemplateTable::new(&config.site_name)),
        Arc::new(build_notifier()),
    ));

    // Consumer runs beside the HTTP server and shares its notification path.
    let subscription = channel
        .subscribe(
            &channel_config.topic,
            &channel_config.group_id,
            channel_config.offset_reset,
        )
        .await
        .expect("Failed to join the notification consumer group");
    let consumer = ValidatingConsumer::new(Arc::clone(&notifications), CommitMode::from_env());
    let consumer_task = tokio::spawn(consumer.run(subscription, shutdown.clone()));

    let state = AppState {
        config: Arc::new(config.clone()),
        notifications,
        producer,
    };
    let app = build_app_router(state, &config);

    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");
    tracing::info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // HTTP is drained; stop publishing retries and let the consumer finish
    // its in-flight message before its partitions are released.
    shutdown.cancel();
    let grace = Duration::from_secs(config.shutdown_timeout_secs);
    match tokio::time::timeout(grace, consumer_task).await {
        Ok(Ok(())) => tracing::info!("Consumer stopped"),
        Ok(Err(e)) => tracing::error!(error = %e, "Consumer task failed"),
        Err(_) => tracing::warn!(grace_secs = grace.as_secs(), "Consumer did not stop in time"),
    }

    tracing::info!("Shutdown complete");
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// SMTP notifier when `SMTP_HOST` is set, otherwise one that only logs.
fn build_notifier() -> Notifier {
    let Some(email_config) = EmailConfig::from_env() else {
        tracing::warn!("SMTP_HOST not set, notification emails will only be logged");
        return Notifier::new(Arc::new(LogTransport), DEFAULT_FROM_ADDRESS);
    };

    let transport: Arc<dyn MailTransport> =
        Arc::new(SmtpTransport::new(&email_config).expect("Failed to build SMTP transport"));
    tracing::info!(
        host = %email_config.host,
        port = email_config.port,
        from = %email_config.from_address,
        "SMTP delivery enabled"
    );
    Notifier::new(transport, email_config.from_address)
}

/// Resolve on Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.expect("Failed to install Ctrl-C handler");
                tracing::info!("SIGINT received, shutting down");
            }
            _ = sigterm.recv() => tracing::info!("SIGTERM received, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
        tracing::info!("Ctrl-C received, shutting down");
    }
}
