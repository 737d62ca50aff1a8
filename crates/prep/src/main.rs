use std::sync::Arc;

use herald_common::config::AppConfig;
use herald_common::db;
use herald_common::redis_pool::create_redis_pool;
use herald_engine::journal::RedisStepJournal;
use herald_prep::preparer::Preparer;
use herald_prep::worker::PrepWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "herald_prep=info,herald_engine=info".into()),
        )
        .json()
        .init();

    tracing::info!("Herald prep worker starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    // Connect to database
    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    // Connect to Redis (step journal + prep queue)
    let redis = create_redis_pool(&config.redis_url).await?;
    let journal = Arc::new(RedisStepJournal::new(redis.clone()));

    let preparer = Preparer::postgres(pool, journal, &config);
    let mut worker = PrepWorker::new(redis, config.prep_queue_key.clone(), preparer);

    // Run with graceful shutdown on Ctrl+C
    tokio::select! {
        result = worker.run() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Prep worker exited with error");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal, stopping gracefully...");
        }
    }

    tracing::info!("Herald prep worker stopped.");
    Ok(())
}
