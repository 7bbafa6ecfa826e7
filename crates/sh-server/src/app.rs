//! Application wiring
//!
//! Builds stores, senders, the delivery workers and the HTTP router from one
//! [`AppConfig`].

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use sh_api::AppState;
use sh_auth::{Authenticator, JwtService};
use sh_core::clock::SharedClock;
use sh_core::config::{AppConfig, NotificationConfig};
use sh_core::traits::Id;
use sh_db::{Database, PgChannelStore, PgQueueStore, PgServiceCatalog};
use sh_notifications::{
    ChannelStore, Dispatcher, MemoryChannelStore, MemoryQueueStore, MemoryServiceCatalog,
    Notifier, QueueStore, Renderer, RetentionSweeper, SenderRegistry, ServiceCatalog,
    SnapshotStore, VerificationCodeStore, WorkerPool, WorkerPoolConfig, WorkerPoolError,
};
use sh_services::ChannelService;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use crate::health::{self, HealthChecker, HealthConfig};
use crate::metrics::{self, Metrics, MetricsState};

/// Store implementations behind the notification traits
#[derive(Clone)]
pub struct Stores {
    pub queue: Arc<dyn QueueStore>,
    pub channels: Arc<dyn ChannelStore>,
    pub codes: Arc<dyn VerificationCodeStore>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub catalog: Arc<dyn ServiceCatalog>,
}

impl Stores {
    pub fn postgres(database: &Database, clock: SharedClock, config: &NotificationConfig) -> Self {
        let pool = database.pool().clone();
        let channels = Arc::new(PgChannelStore::new(pool.clone(), clock.clone()));
        let queue = Arc::new(
            PgQueueStore::new(pool.clone(), clock).with_claim_timeout(config.claim_timeout()),
        );
        Self {
            queue: queue.clone(),
            channels: channels.clone(),
            codes: channels,
            snapshots: queue,
            catalog: Arc::new(PgServiceCatalog::new(pool)),
        }
    }

    /// Process-local stores; nothing survives a restart
    pub fn memory(clock: SharedClock, service_ids: impl IntoIterator<Item = Id>) -> Self {
        let channels = Arc::new(MemoryChannelStore::new(clock.clone()));
        let queue = Arc::new(MemoryQueueStore::new(clock));
        Self {
            queue: queue.clone(),
            channels: channels.clone(),
            codes: channels,
            snapshots: queue,
            catalog: Arc::new(MemoryServiceCatalog::new(service_ids)),
        }
    }
}

/// A fully wired StatusHub notification process
pub struct Application {
    database: Option<Database>,
    queue: Arc<dyn QueueStore>,
    notifier: Arc<Notifier>,
    channels: Arc<ChannelService>,
    workers: Arc<WorkerPool>,
    sweeper: Arc<RetentionSweeper>,
    auth: Authenticator,
    metrics: Arc<Metrics>,
    health: Arc<HealthChecker>,
}

impl Application {
    /// Connect to PostgreSQL, apply migrations and wire everything on top
    pub async fn connect(
        config: &AppConfig,
        senders: SenderRegistry,
        clock: SharedClock,
    ) -> anyhow::Result<Self> {
        let database = Database::connect(&config.database).await?;
        database.migrate().await?;
        info!("Connected to database");

        let stores = Stores::postgres(&database, clock.clone(), &config.notifications);
        Ok(Self::new(config, stores, senders, clock, Some(database)))
    }

    pub fn new(
        config: &AppConfig,
        stores: Stores,
        senders: SenderRegistry,
        clock: SharedClock,
        database: Option<Database>,
    ) -> Self {
        let renderer = Renderer::new(config.server.public_base_url.clone());
        let dispatcher = Arc::new(Dispatcher::new(stores.channels.clone(), senders, renderer));

        let workers = Arc::new(WorkerPool::new(
            stores.queue.clone(),
            dispatcher.clone(),
            clock.clone(),
            WorkerPoolConfig::from(&config.notifications),
        ));
        let sweeper = Arc::new(RetentionSweeper::from_config(
            stores.queue.clone(),
            &config.notifications,
        ));

        let notifier = Arc::new(Notifier::new(
            stores.channels.clone(),
            stores.snapshots.clone(),
            stores.queue.clone(),
            clock.clone(),
            config.notifications.max_attempts,
        ));
        let channels = Arc::new(ChannelService::new(
            stores.channels.clone(),
            stores.codes.clone(),
            stores.catalog.clone(),
            dispatcher,
            clock,
            config.verification.clone(),
        ));

        let mut health = HealthChecker::new(HealthConfig::default()).with_workers(workers.clone());
        if let Some(ref database) = database {
            health = health.with_database(database.clone());
        }

        Self {
            database,
            queue: stores.queue,
            notifier,
            channels,
            workers,
            sweeper,
            auth: Authenticator::new(JwtService::from_config(&config.auth)),
            metrics: Arc::new(Metrics::new()),
            health: Arc::new(health),
        }
    }

    /// Start the delivery workers and the retention sweeper
    pub fn start(&self) -> Result<(), WorkerPoolError> {
        self.workers.start()?;
        self.sweeper.start()?;
        Ok(())
    }

    /// Event lifecycle hooks for the event engine
    pub fn notifier(&self) -> Arc<Notifier> {
        self.notifier.clone()
    }

    /// Channel service; registration calls `create_default_channel`
    pub fn channels(&self) -> Arc<ChannelService> {
        self.channels.clone()
    }

    pub fn workers(&self) -> Arc<WorkerPool> {
        self.workers.clone()
    }

    /// Build the application router
    pub fn router(&self) -> Router {
        let health_routes = Router::new()
            .route("/health", get(health::liveness))
            .route("/health/live", get(health::liveness))
            .route("/health/ready", get(health::readiness))
            .with_state(self.health.clone());

        let metrics_routes = Router::new()
            .route("/metrics", get(metrics::prometheus_metrics))
            .route("/metrics.json", get(metrics::json_metrics))
            .with_state(MetricsState {
                metrics: self.metrics.clone(),
                queue: self.queue.clone(),
                counters: self.workers.counters_handle(),
            });

        let api_routes =
            sh_api::router().with_state(AppState::new(self.channels.clone(), self.auth.clone()));

        Router::new()
            .merge(health_routes)
            .merge(metrics_routes)
            .merge(api_routes)
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CompressionLayer::new())
                    .layer(
                        CorsLayer::new()
                            .allow_origin(Any)
                            .allow_methods(Any)
                            .allow_headers(Any),
                    ),
            )
            .layer(middleware::from_fn_with_state(
                self.metrics.clone(),
                metrics::metrics_middleware,
            ))
    }

    /// Drain the workers, stop the sweeper and close the pool
    pub async fn shutdown(&self) {
        self.workers.stop().await;
        self.sweeper.stop().await;
        if let Some(ref database) = self.database {
            database.close().await;
        }
        info!(counters = ?self.workers.counters(), "Notification delivery stopped");
    }
}
