use crate::error::LimiterError;
use redis::aio::MultiplexedConnection;
use redis::{Client, FromRedisValue, Pipeline};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time;

/// How long calls fail fast after the store stopped answering.
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Default)]
struct ConnectionState {
    connection: Option<MultiplexedConnection>,
    retry_at: Option<Instant>,
}

/// Shared Redis handle. The multiplexed connection is opened lazily and
/// dropped on failure; reconnects are then held off for [`RECONNECT_BACKOFF`].
/// The state lock is never held across a network round trip.
pub struct RedisClient {
    client: Client,
    state: Mutex<ConnectionState>,
    timeout: Duration,
    backoff: Duration,
}

impl RedisClient {
    pub fn new(redis_url: &str, timeout: Duration) -> Result<Self, LimiterError> {
        let client = Client::open(redis_url).map_err(|e| {
            LimiterError::Configuration(format!("Failed to create Redis client: {}", e))
        })?;

        Ok(Self {
            client,
            state: Mutex::new(ConnectionState::default()),
            timeout,
            backoff: RECONNECT_BACKOFF,
        })
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn connection(&self) -> Result<MultiplexedConnection, LimiterError> {
        {
            let state = self.state.lock().await;
            if let Some(conn) = state.connection.as_ref() {
                return Ok(conn.clone());
            }
            if state.retry_at.is_some_and(|at| Instant::now() < at) {
                return Err(LimiterError::StoreUnavailable(
                    "Redis is backing off after a failure".to_string(),
                ));
            }
        }

        // Concurrent callers may race to connect; the first stored connection wins.
        let conn = match self
            .bounded(self.client.get_multiplexed_tokio_connection())
            .await
            .and_then(|result| result.map_err(LimiterError::from))
        {
            Ok(conn) => conn,
            Err(e) => {
                self.mark_failed().await;
                return Err(LimiterError::StoreUnavailable(format!(
                    "Failed to connect to Redis: {}",
                    e
                )));
            }
        };

        let mut state = self.state.lock().await;
        state.retry_at = None;
        Ok(state.connection.get_or_insert(conn).clone())
    }

    /// Outer error: the timeout elapsed. Inner: whatever Redis said.
    async fn bounded<T, F>(&self, fut: F) -> Result<redis::RedisResult<T>, LimiterError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        time::timeout(self.timeout, fut).await.map_err(|_| {
            LimiterError::StoreUnavailable(format!(
                "Redis did not answer within {:?}",
                self.timeout
            ))
        })
    }

    async fn mark_failed(&self) {
        let mut state = self.state.lock().await;
        state.connection = None;
        state.retry_at = Some(Instant::now() + self.backoff);
    }

    /// Transport failures drop the connection and start the backoff; an
    /// error reply leaves both alone.
    async fn settle<T>(
        &self,
        outcome: Result<redis::RedisResult<T>, LimiterError>,
    ) -> Result<T, LimiterError> {
        match outcome {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) if !is_transport_error(&err) => Err(err.into()),
            Ok(Err(err)) => {
                self.mark_failed().await;
                Err(err.into())
            }
            Err(timed_out) => {
                self.mark_failed().await;
                Err(timed_out)
            }
        }
    }

    async fn run<T: FromRedisValue>(&self, cmd: redis::Cmd) -> Result<T, LimiterError> {
        let mut conn = self.connection().await?;
        let outcome = self.bounded(cmd.query_async::<_, T>(&mut conn)).await;
        self.settle(outcome).await
    }

    async fn run_pipeline<T: FromRedisValue>(&self, pipe: Pipeline) -> Result<T, LimiterError> {
        let mut conn = self.connection().await?;
        let outcome = self.bounded(pipe.query_async::<_, T>(&mut conn)).await;
        self.settle(outcome).await
    }

    pub async fn ping(&self) -> Result<String, LimiterError> {
        self.run(redis::cmd("PING")).await
    }

    /// Atomically increments `key` and reports its remaining TTL in seconds
    /// (`-1` when the key has no expiry yet).
    pub async fn incr_with_ttl(&self, key: &str) -> Result<(u64, i64), LimiterError> {
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("TTL")
            .arg(key);
        self.run_pipeline(pipe).await
    }

    pub async fn expire(&self, key: &str, seconds: u64) -> Result<(), LimiterError> {
        let mut cmd = redis::cmd("EXPIRE");
        cmd.arg(key).arg(seconds);
        let _: i64 = self.run(cmd).await?;
        Ok(())
    }

    pub async fn get_counter(&self, key: &str) -> Result<Option<u64>, LimiterError> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(key);
        self.run(cmd).await
    }
}

fn is_transport_error(err: &redis::RedisError) -> bool {
    err.is_io_error() || err.is_timeout() || err.is_connection_dropped() || err.is_connection_refusal()
}
