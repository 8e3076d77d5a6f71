//! Composition root: wires the concrete `QuotationSource`, `KvStore`, `BrokerPublisher`,
//! `TradingCalendar`, and `PreheaterRegistry` into a `ReplayCoordinator`, then serves the
//! control surface. No global singletons, no service locator — everything is constructed
//! here and passed down explicitly.

use replay_engine::broker::KafkaBrokerPublisher;
use replay_engine::calendar::DefaultTradingCalendar;
use replay_engine::config::ReplayConfig;
use replay_engine::control;
use replay_engine::coordinator::ReplayCoordinator;
use replay_engine::kv::RedisKvStore;
use replay_engine::logging;
use replay_engine::preheat::{
    IndexPrecloseWarmer, MovingAverageWarmer, NineTurnWarmer, PreheatTask, PreheaterRegistry,
    SourceBackedCloseLookup,
};
use replay_engine::source::PostgresQuotationSource;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Process exit codes for each startup failure mode.
mod exit_code {
    pub const SUCCESS: u8 = 0;
    pub const INVALID_CONFIG: u8 = 1;
    pub const SOURCE_FAILURE: u8 = 2;
    #[allow(dead_code)]
    pub const PREHEAT_FATAL: u8 = 3;
    pub const BROKER_UNREACHABLE: u8 = 4;
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init_logging();

    let config = match ReplayConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(?err, "invalid configuration");
            return ExitCode::from(exit_code::INVALID_CONFIG);
        }
    };

    let source = match PostgresQuotationSource::connect(&config.source_dsn).await {
        Ok(source) => Arc::new(source),
        Err(err) => {
            error!(?err, "failed to connect to quotation source");
            return ExitCode::from(exit_code::SOURCE_FAILURE);
        }
    };

    let kv = match RedisKvStore::connect(&config.kv_endpoint).await {
        Ok(kv) => Arc::new(kv),
        Err(err) => {
            error!(?err, "failed to connect to kv store");
            return ExitCode::from(exit_code::SOURCE_FAILURE);
        }
    };

    let publisher = match KafkaBrokerPublisher::new(&config.broker_bootstrap) {
        Ok(publisher) => Arc::new(publisher),
        Err(err) => {
            error!(?err, "broker unreachable at start");
            return ExitCode::from(exit_code::BROKER_UNREACHABLE);
        }
    };

    let calendar = Arc::new(DefaultTradingCalendar);

    // No standing daily-close store exists in this deployment; every warmer derives a day's
    // close from the quotation source's own tick-level rows via this adapter.
    let close_lookup = Arc::new(SourceBackedCloseLookup::new(
        Arc::clone(&source) as Arc<dyn replay_engine::source::QuotationSource>,
        Arc::clone(&calendar) as Arc<dyn replay_engine::calendar::TradingCalendar + Send + Sync>,
    ));
    let tasks: Vec<Box<dyn PreheatTask>> = vec![
        Box::new(IndexPrecloseWarmer::new(
            Arc::clone(&kv) as Arc<dyn replay_engine::kv::KvStore>,
            Arc::clone(&calendar) as Arc<dyn replay_engine::calendar::TradingCalendar + Send + Sync>,
            Arc::clone(&close_lookup) as Arc<dyn replay_engine::preheat::CloseLookup>,
        )),
        Box::new(MovingAverageWarmer::new(
            Arc::clone(&kv) as Arc<dyn replay_engine::kv::KvStore>,
            Arc::clone(&close_lookup) as Arc<dyn replay_engine::preheat::CloseLookup>,
        )),
        Box::new(NineTurnWarmer::new(
            Arc::clone(&kv) as Arc<dyn replay_engine::kv::KvStore>,
            close_lookup as Arc<dyn replay_engine::preheat::CloseLookup>,
        )),
    ];
    let preheater = Arc::new(PreheaterRegistry::new(tasks));

    let coordinator = Arc::new(ReplayCoordinator::new(source, publisher, calendar, preheater));

    let app = control::router(Arc::clone(&coordinator));
    let listener = match tokio::net::TcpListener::bind(&config.control_bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(?err, addr = %config.control_bind_addr, "failed to bind control surface");
            return ExitCode::from(exit_code::SOURCE_FAILURE);
        }
    };

    info!(addr = %config.control_bind_addr, "control surface listening");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(?err, "control surface server error");
        return ExitCode::from(exit_code::SOURCE_FAILURE);
    }

    ExitCode::from(exit_code::SUCCESS)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
