//! Valkey/Redis implementation of [`StreamStore`].

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::RedisError;
use tracing::info;

use super::{StreamError, StreamStore};

/// Stream store backed by a multiplexed, auto-reconnecting connection.
///
/// Cloning is cheap; every clone shares the underlying connection.
#[derive(Clone)]
pub struct RedisStreamStore {
    conn: ConnectionManager,
}

impl RedisStreamStore {
    /// Connect and health-check with `PING`.
    pub async fn connect(url: &str) -> Result<Self, StreamError> {
        let client =
            redis::Client::open(url).map_err(|e| StreamError::Connection(e.to_string()))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StreamError::Connection(e.to_string()))?;

        let store = RedisStreamStore { conn };
        let pong = store.ping().await?;
        info!("Stream store health-check passed: {}", pong);
        Ok(store)
    }

    pub async fn ping(&self) -> Result<String, StreamError> {
        let mut conn = self.conn.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(command_err("PING"))
    }
}

fn command_err(command: &'static str) -> impl Fn(RedisError) -> StreamError {
    move |e| StreamError::command(command, e.to_string())
}

#[async_trait]
impl StreamStore for RedisStreamStore {
    async fn key_type(&self, key: &str) -> Result<String, StreamError> {
        let mut conn = self.conn.clone();
        let kind: String = redis::cmd("TYPE")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(command_err("TYPE"))?;
        Ok(kind)
    }

    async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> Result<String, StreamError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (field, value) in fields {
            cmd.arg(*field).arg(*value);
        }
        let id: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(command_err("XADD"))?;
        Ok(id)
    }

    async fn hash_set_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, StreamError> {
        let mut conn = self.conn.clone();
        let set: bool = redis::cmd("HSETNX")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async(&mut conn)
            .await
            .map_err(command_err("HSETNX"))?;
        Ok(set)
    }

    async fn sorted_set_add(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> Result<bool, StreamError> {
        let mut conn = self.conn.clone();
        let added: i64 = redis::cmd("ZADD")
            .arg(key)
            .arg("NX")
            .arg(score)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(command_err("ZADD"))?;
        Ok(added > 0)
    }
}
