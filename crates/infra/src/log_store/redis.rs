//! Redis Streams-backed event log (XADD/XREAD).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::Value;
use redis::aio::ConnectionManager;

use shopsync_core::EntryId;
use shopsync_events::envelope::ProductEvent;
use shopsync_events::{RawEntry, codec};

use super::{EventLog, LogError};

impl From<redis::RedisError> for LogError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_timeout() {
            LogError::Timeout
        } else {
            LogError::Transport(e.to_string())
        }
    }
}

/// Redis Streams event log.
///
/// Each instance owns its connection. A blocking `XREAD` occupies the
/// connection for the whole blocking window, so give the consumer its own
/// instance rather than sharing one with producers.
#[derive(Clone)]
pub struct RedisEventLog {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisEventLog").finish_non_exhaustive()
    }
}

impl RedisEventLog {
    /// Connect to Redis and set up an auto-reconnecting connection.
    pub async fn connect(url: &str) -> Result<Self, LogError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { conn })
    }

    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl EventLog for RedisEventLog {
    async fn append(&self, stream: &str, event: &ProductEvent) -> Result<EntryId, LogError> {
        let fields = codec::encode_fields(event)?;

        // XADD with "*": the log assigns the entry id.
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("*");
        for (field, value) in &fields {
            cmd.arg(*field).arg(value);
        }

        let mut conn = self.conn.clone();
        let id: String = cmd.query_async(&mut conn).await?;
        id.parse()
            .map_err(|e| LogError::Transport(format!("log returned unparseable entry id: {e}")))
    }

    async fn read(
        &self,
        stream: &str,
        after: EntryId,
        max_count: usize,
        block: Duration,
    ) -> Result<Vec<RawEntry>, LogError> {
        let mut cmd = redis::cmd("XREAD");
        cmd.arg("COUNT")
            .arg(max_count)
            .arg("BLOCK")
            .arg(block.as_millis() as u64)
            .arg("STREAMS")
            .arg(stream)
            .arg(after.to_string());

        let mut conn = self.conn.clone();
        let reply: Value = cmd.query_async(&mut conn).await?;
        parse_xread_reply(stream, reply)
    }
}

/// Parse an XREAD reply into raw entries.
///
/// Reply shape: `[[stream-name, [[entry-id, [field, value, ...]], ...]], ...]`,
/// or nil when the blocking window expired with no new entries.
fn parse_xread_reply(stream: &str, reply: Value) -> Result<Vec<RawEntry>, LogError> {
    let streams = match reply {
        Value::Nil => return Ok(vec![]),
        Value::Bulk(streams) => streams,
        other => {
            return Err(LogError::Transport(format!(
                "unexpected XREAD reply: {other:?}"
            )));
        }
    };

    let mut entries = Vec::new();
    for entry_list in streams {
        let Value::Bulk(pair) = entry_list else {
            return Err(LogError::Transport("malformed XREAD stream element".into()));
        };
        if pair.len() != 2 {
            return Err(LogError::Transport("malformed XREAD stream element".into()));
        }

        // Only the requested stream was asked for; skip anything else.
        if as_string(&pair[0]).as_deref() != Some(stream) {
            continue;
        }

        let Value::Bulk(raw_entries) = &pair[1] else {
            return Err(LogError::Transport("malformed XREAD entry list".into()));
        };

        for raw in raw_entries {
            entries.push(parse_entry(raw)?);
        }
    }

    Ok(entries)
}

fn parse_entry(raw: &Value) -> Result<RawEntry, LogError> {
    let Value::Bulk(parts) = raw else {
        return Err(LogError::Transport("malformed stream entry".into()));
    };
    if parts.len() != 2 {
        return Err(LogError::Transport("malformed stream entry".into()));
    }

    let id: EntryId = as_string(&parts[0])
        .ok_or_else(|| LogError::Transport("missing stream entry id".into()))?
        .parse()
        .map_err(|e| LogError::Transport(format!("invalid stream entry id: {e}")))?;

    let Value::Bulk(field_values) = &parts[1] else {
        return Err(LogError::Transport("malformed stream entry fields".into()));
    };

    let mut fields = HashMap::with_capacity(field_values.len() / 2);
    for chunk in field_values.chunks(2) {
        if let [field, value] = chunk {
            if let (Some(field), Some(value)) = (as_string(field), as_string(value)) {
                fields.insert(field, value);
            }
        }
    }

    Ok(RawEntry::new(id, fields))
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Status(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> Value {
        Value::Data(s.as_bytes().to_vec())
    }

    #[test]
    fn nil_reply_is_an_empty_batch() {
        assert!(parse_xread_reply("s", Value::Nil).unwrap().is_empty());
    }

    #[test]
    fn reply_parses_ids_and_fields() {
        let reply = Value::Bulk(vec![Value::Bulk(vec![
            data("s"),
            Value::Bulk(vec![
                Value::Bulk(vec![
                    data("1700000000000-0"),
                    Value::Bulk(vec![data("event"), data("{}")]),
                ]),
                Value::Bulk(vec![
                    data("1700000000000-1"),
                    Value::Bulk(vec![data("event"), data("{}")]),
                ]),
            ]),
        ])]);

        let entries = parse_xread_reply("s", reply).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, EntryId::new(1_700_000_000_000, 0));
        assert_eq!(entries[1].id, EntryId::new(1_700_000_000_000, 1));
        assert_eq!(entries[0].fields.get("event").unwrap(), "{}");
    }

    #[test]
    fn unexpected_reply_shape_is_a_transport_error() {
        assert!(matches!(
            parse_xread_reply("s", Value::Int(3)),
            Err(LogError::Transport(_))
        ));
    }
}
