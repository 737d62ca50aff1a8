use redis::Client;
use redis::aio::ConnectionManager;

/// Create a Redis connection manager for async operations.
pub async fn create_redis_pool(redis_url: &str) -> anyhow::Result<ConnectionManager> {
    let client = Client::open(redis_url)?;
    let manager = ConnectionManager::new(client).await?;

    tracing::info!(redis_url = %redact(redis_url), "Connected to Redis");
    Ok(manager)
}

/// Strip credentials from a Redis URL before it is logged.
fn redact(redis_url: &str) -> String {
    match (redis_url.find("://"), redis_url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}***{}", &redis_url[..scheme_end + 3], &redis_url[at..])
        }
        _ => redis_url.to_string(),
    }
}
