//! Server binary: wire the store, registry, engine, trigger supervisors,
//! and the API router, then serve until shutdown.

use std::sync::Arc;

use tracing::{info, warn};

use weir::api::{self, AppState};
use weir::config::Config;
use weir::engine::Engine;
use weir::nodes::registry::create_default_registry;
use weir::store::Stores;
use weir::triggers::{
    email_poller::EmailPoller, redis_subscriber::RedisSubscriber, scheduler::CronScheduler,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weir=info,tower_http=info".into()),
        )
        .init();

    let cfg = Config::load();
    let stores = Stores::in_memory();
    let registry = Arc::new(create_default_registry());
    let engine = Engine::new(stores, registry);

    let scheduler = CronScheduler::new(engine.clone());
    if let Err(e) = scheduler.start().await {
        warn!(error = %e, "failed to start scheduler");
    }
    let subscriber = RedisSubscriber::new(engine.clone());
    if let Err(e) = subscriber.start().await {
        warn!(error = %e, "failed to start redis subscriber");
    }
    let poller = EmailPoller::new(engine.clone());
    if let Err(e) = poller.start().await {
        warn!(error = %e, "failed to start email poller");
    }

    let state = AppState {
        engine,
        scheduler: scheduler.clone(),
        subscriber: subscriber.clone(),
        poller: poller.clone(),
    };
    let app = api::router(state);

    let addr = cfg.bind_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };
    info!(%addr, "weir workflow engine listening");

    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await;

    // Drain in-flight trigger work before exiting.
    scheduler.stop().await;
    subscriber.stop().await;
    poller.stop().await;

    if let Err(e) = result {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }
}
