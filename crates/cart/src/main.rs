//! Cart service entry point.

use std::sync::Arc;

use broker::{
    ConsumerSession, KafkaConsumerGroup, KafkaSettings, KafkaSink, Producer, SessionOptions,
    TopicSpec,
};
use cart::config::Config;
use cart::{AppState, OrderServiceClient, PostgresCartStore, UpdateCartHandler};
use common::{CREATE_ORDER_TOPIC, UPDATE_CART_TOPIC, consumer_group_id};
use sqlx::postgres::PgPoolOptions;
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Database
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    let store = PostgresCartStore::new(pool);
    store.run_migrations().await?;

    // 4. Broker: producer for create-order events, session for update-cart events
    let settings = KafkaSettings::new(config.kafka_brokers.clone());
    let producer = Arc::new(Producer::new(KafkaSink::connect(&settings)?));
    producer
        .ensure_topic(CREATE_ORDER_TOPIC, TopicSpec::default())
        .await?;
    producer
        .ensure_topic(UPDATE_CART_TOPIC, TopicSpec::default())
        .await?;

    let group = KafkaConsumerGroup::connect(
        settings,
        consumer_group_id(UPDATE_CART_TOPIC, "cart"),
    )?;
    let mut session = ConsumerSession::new(
        group,
        UpdateCartHandler::new(store.clone()),
        // SIGINT/SIGTERM belong to the HTTP server; step 7 stops the consumer.
        SessionOptions::default()
            .without_termination_signals()
            .with_drain_timeout(config.drain_timeout),
    );
    let controller = session.controller();
    let mut consumer = tokio::spawn(async move {
        let result = session.consume(&[UPDATE_CART_TOPIC]).await;
        if let Err(e) = session.close().await {
            tracing::warn!(error = %e, "failed to leave consumer group");
        }
        result
    });
    // A failed first join ends the consumer task with the join error.
    tokio::select! {
        biased;
        result = &mut consumer => {
            result??;
            return Err("consumer stopped before joining its group".into());
        }
        ready = controller.wait_ready() => ready?,
    }

    // 5. Build the application
    let orders = OrderServiceClient::new(config.order_service_url.clone(), producer)?;
    let state = Arc::new(AppState::new(store, orders));
    let app = cart::create_app(state, metrics_handle);

    // 6. Start server
    let addr = config.addr();
    tracing::info!(%addr, "starting cart service");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 7. Stop consuming after the server has drained its requests
    controller.shutdown();
    consumer.await??;

    tracing::info!("cart service shut down gracefully");
    Ok(())
}
