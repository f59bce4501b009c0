use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use e2e_key_service::{
    bus::{BrokerConnection, KafkaTransport, Publisher, RouteTable, TopicRouter},
    config::Config,
    db, handlers, logging,
    services::{alerts, KeyLifecycleService},
    state::AppState,
    store::PgKeyStore,
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> Result<()> {
    logging::init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;
    info!(port = config.port, "Starting e2e-key-service");

    let alerts = alerts::from_config(&config.alerts).context("Failed to configure alerts")?;

    config.database.log_config();
    let pool = db::init_pool(&config.database)
        .await
        .context("Failed to connect to database")?;
    db::MIGRATOR
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations applied");

    let routes = RouteTable::standard().context("Invalid inbound route table")?;

    let transport = Arc::new(KafkaTransport::new(
        config.kafka.clone(),
        config.bus.operation_timeout(),
    ));
    let connection = BrokerConnection::new(transport, config.bus.reconnect_delay());
    let connection_task = tokio::spawn(connection.clone().run());

    let publisher = Publisher::new(
        connection.clone(),
        alerts.clone(),
        config.bus.ready_timeout(),
        config.bus.operation_timeout(),
    );
    let keys = Arc::new(KeyLifecycleService::new(
        Arc::new(PgKeyStore::new(pool)),
        publisher,
        alerts.clone(),
        config.database.statement_timeout(),
    ));

    let router = TopicRouter::new(
        connection.clone(),
        routes,
        keys.clone(),
        config.bus.operation_timeout(),
    );
    let router_task = tokio::spawn(router.run());

    let state = AppState { keys, connection };
    let bind_addr = format!("0.0.0.0:{}", config.port);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(handlers::configure)
    })
    .bind(&bind_addr)
    .with_context(|| format!("Failed to bind {}", bind_addr))?
    .run();

    info!("HTTP server listening on {}", bind_addr);
    alerts.service_started();

    let result = server.await;

    router_task.abort();
    connection_task.abort();

    if let Err(e) = &result {
        error!("HTTP server error: {}", e);
    }
    result.context("HTTP server failed")
}
