//! Redis-backed pub/sub for production deployments.
//!
//! Commands (PING, PUBLISH) share one multiplexed connection that is opened
//! lazily and reused. A connection that fails with an I/O error is dropped
//! so the next command dials again. Each listened channel gets its own
//! dedicated pub/sub connection, released when the returned stream is dropped.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use crate::ports::{PubSubBackend, PubSubError};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redis pub/sub backend.
pub struct RedisPubSub {
    client: redis::Client,
    conn: Mutex<Option<MultiplexedConnection>>,
    connect_timeout: Duration,
}

impl RedisPubSub {
    /// Create a backend for `redis_url`. No connection is opened yet.
    pub fn new(redis_url: &str) -> Result<Self, PubSubError> {
        let client = redis::Client::open(redis_url).map_err(unavailable)?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// Bound on opening a connection to the server.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Get the shared command connection, opening it on first use.
    async fn connection(&self) -> Result<MultiplexedConnection, PubSubError> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = tokio::time::timeout(
            self.connect_timeout,
            self.client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| self.connect_timed_out())?
        .map_err(unavailable)?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Map a command error, forgetting the shared connection if it is dead.
    async fn command_failed(&self, e: redis::RedisError) -> PubSubError {
        let error = command(e);
        if matches!(error, PubSubError::Unavailable(_)) && self.conn.lock().await.take().is_some() {
            tracing::warn!(error = %error, "Dropped broken Redis connection");
        }
        error
    }

    fn connect_timed_out(&self) -> PubSubError {
        PubSubError::Unavailable(format!(
            "connect timed out after {:?}",
            self.connect_timeout
        ))
    }
}

fn unavailable(e: redis::RedisError) -> PubSubError {
    PubSubError::Unavailable(e.to_string())
}

fn command(e: redis::RedisError) -> PubSubError {
    if e.is_io_error()
        || e.is_connection_dropped()
        || e.is_connection_refusal()
        || e.is_timeout()
    {
        PubSubError::Unavailable(e.to_string())
    } else {
        PubSubError::Command(e.to_string())
    }
}

#[async_trait]
impl PubSubBackend for RedisPubSub {
    async fn ping(&self) -> Result<(), PubSubError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;
        match result {
            Ok(_) => Ok(()),
            Err(e) => Err(self.command_failed(e).await),
        }
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<u64, PubSubError> {
        let mut conn = self.connection().await?;
        let result: redis::RedisResult<i64> = conn.publish(channel, payload).await;
        match result {
            Ok(receivers) => Ok(receivers.max(0) as u64),
            Err(e) => Err(self.command_failed(e).await),
        }
    }

    async fn listen(&self, channel: &str) -> Result<BoxStream<'static, String>, PubSubError> {
        let conn = tokio::time::timeout(self.connect_timeout, self.client.get_async_connection())
            .await
            .map_err(|_| self.connect_timed_out())?
            .map_err(unavailable)?;
        let mut pubsub = conn.into_pubsub();
        pubsub.subscribe(channel).await.map_err(command)?;

        tracing::debug!(channel = %channel, "Opened Redis subscription");

        let stream = pubsub
            .into_on_message()
            .filter_map(|msg| async move {
                match msg.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(e) => {
                        tracing::warn!(error = %e, "Dropping undecodable Redis payload");
                        None
                    }
                }
            })
            .boxed();
        Ok(stream)
    }

    async fn close(&self) {
        self.conn.lock().await.take();
    }
}
