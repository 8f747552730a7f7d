//! devpulse-eventlog
//!
//! A durable, replayable append-only log with a single named consumer group,
//! backed by a Redis stream (spec §4.B). Producers append one entry per
//! accepted event; consumers read in batches, process, and acknowledge.
//! Unacknowledged entries are redelivered after Redis's own visibility
//! timeout (governed by `XCLAIM`/`XAUTOCLAIM`, not reimplemented here).
#![deny(unsafe_code)]
#![warn(missing_docs)]

use devpulse_core::Event;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, RedisError};
use std::fmt;

/// Field name under which the JSON-encoded event is stored in each stream
/// entry.
const PAYLOAD_FIELD: &str = "payload";

/// Errors surfaced by the durable log. Every variant maps to spec §7's
/// `TransientDependencyError`.
#[derive(Debug)]
pub enum LogError {
    /// The underlying Redis connection or command failed.
    Redis(RedisError),
    /// A stream entry's payload could not be decoded as an [`Event`].
    Decode {
        /// Opaque stream entry id, for diagnostics.
        entry_id: String,
        /// Decode failure detail.
        reason: String,
    },
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redis(e) => write!(f, "event log unavailable: {e}"),
            Self::Decode { entry_id, reason } => {
                write!(f, "malformed log entry {entry_id}: {reason}")
            }
        }
    }
}

impl std::error::Error for LogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Redis(e) => Some(e),
            Self::Decode { .. } => None,
        }
    }
}

impl From<RedisError> for LogError {
    fn from(e: RedisError) -> Self {
        Self::Redis(e)
    }
}

/// A single entry read back from the log: its opaque sequence id and the
/// decoded event it carries.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Opaque to producers; a Redis stream entry id (`<ms>-<seq>`).
    pub sequence_id: String,
    /// The decoded event payload.
    pub event: Event,
}

/// A durable event log backed by a single Redis stream.
#[derive(Clone)]
pub struct EventLog {
    conn: ConnectionManager,
    stream_key: String,
}

impl EventLog {
    /// Connect to Redis and bind to `stream_key`.
    pub async fn connect(redis_url: &str, stream_key: impl Into<String>) -> Result<Self, LogError> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            stream_key: stream_key.into(),
        })
    }

    /// Wrap an existing connection manager (used by tests against a shared
    /// Redis instance).
    pub fn from_connection(conn: ConnectionManager, stream_key: impl Into<String>) -> Self {
        Self {
            conn,
            stream_key: stream_key.into(),
        }
    }

    /// Create `group` on the stream if it doesn't already exist, starting
    /// from `$` (only entries appended after group creation are delivered).
    /// Called once at startup; idempotent.
    pub async fn ensure_group(&self, group: &str) -> Result<(), LogError> {
        let mut conn = self.conn.clone();
        let result: Result<(), RedisError> = conn
            .xgroup_create_mkstream(&self.stream_key, group, "$")
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Append one event. Total order is preserved within this stream only.
    /// Synchronous from the ingest route's perspective: a failure here must
    /// surface as a 5xx, never silently retried server-side.
    pub async fn append(&self, event: &Event) -> Result<String, LogError> {
        let payload = serde_json::to_string(event).map_err(|e| LogError::Decode {
            entry_id: event.id.to_string(),
            reason: e.to_string(),
        })?;
        let mut conn = self.conn.clone();
        let sequence_id: String = conn
            .xadd(&self.stream_key, "*", &[(PAYLOAD_FIELD, payload)])
            .await?;
        Ok(sequence_id)
    }

    /// Read up to `count` pending (never-delivered) entries for `consumer`
    /// within `group`, blocking up to `block_ms` for new entries if none are
    /// immediately available.
    pub async fn read_pending(
        &self,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: usize,
    ) -> Result<Vec<LogEntry>, LogError> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(group, consumer)
            .count(count)
            .block(block_ms);
        let reply: StreamReadReply = conn
            .xread_options(&[self.stream_key.as_str()], &[">"], &opts)
            .await?;

        let mut entries = Vec::new();
        for stream_key in reply.keys {
            for stream_id in stream_key.ids {
                let payload: Option<String> = stream_id
                    .map
                    .get(PAYLOAD_FIELD)
                    .and_then(|v| match v {
                        redis::Value::BulkString(bytes) => {
                            String::from_utf8(bytes.clone()).ok()
                        }
                        redis::Value::SimpleString(s) => Some(s.clone()),
                        _ => None,
                    });

                let Some(payload) = payload else {
                    tracing::warn!(entry_id = %stream_id.id, "log entry missing payload field");
                    continue;
                };

                match serde_json::from_str::<Event>(&payload) {
                    Ok(event) => entries.push(LogEntry {
                        sequence_id: stream_id.id.clone(),
                        event,
                    }),
                    Err(e) => {
                        tracing::warn!(entry_id = %stream_id.id, error = %e, "dropping malformed log entry");
                    }
                }
            }
        }
        Ok(entries)
    }

    /// Acknowledge a processed entry. Idempotent: acking an already-acked or
    /// unknown id is a no-op, not an error.
    pub async fn ack(&self, group: &str, sequence_id: &str) -> Result<(), LogError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.xack(&self.stream_key, group, &[sequence_id]).await?;
        Ok(())
    }

    /// Cheapest possible reachability probe, for the health endpoint.
    pub async fn ping(&self) -> Result<(), LogError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_error_display_wraps_redis_errors() {
        let err = LogError::Decode {
            entry_id: "1-1".into(),
            reason: "bad json".into(),
        };
        assert_eq!(err.to_string(), "malformed log entry 1-1: bad json");
    }
}
