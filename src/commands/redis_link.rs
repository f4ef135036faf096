use std::sync::Mutex;
use std::time::Duration;

use crate::error::{PodwatchError, Result};

/// One lazily opened Redis connection shared by a tier. A dropped connection
/// is discarded and reopened on the next call.
pub struct RedisLink {
    client: redis::Client,
    conn: Mutex<Option<redis::Connection>>,
    timeout: Duration,
}

impl RedisLink {
    /// Parses the URL only; nothing is dialled until the first command.
    pub fn open(url: &str, timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| PodwatchError::Config(format!("Invalid redis url {url}: {e}")))?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            timeout,
        })
    }

    /// Runs `f` on the shared connection, dialling first if needed.
    pub fn run<T, F>(&self, f: F) -> redis::RedisResult<T>
    where
        F: FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    {
        let mut guard = self.conn.lock().map_err(|_| {
            redis::RedisError::from((redis::ErrorKind::ClientError, "redis connection lock poisoned"))
        })?;

        if guard.is_none() {
            *guard = Some(self.connect()?);
        }
        let Some(conn) = guard.as_mut() else {
            return Err(redis::RedisError::from((redis::ErrorKind::ClientError, "redis connection missing")));
        };

        let result = f(conn);
        if let Err(err) = &result {
            if err.is_connection_dropped() || err.is_io_error() || err.is_timeout() {
                log::warn!("redis connection lost, reconnecting on next call: {err}");
                *guard = None;
            }
        }
        result
    }

    fn connect(&self) -> redis::RedisResult<redis::Connection> {
        let conn = self.client.get_connection_with_timeout(self.timeout)?;
        conn.set_read_timeout(Some(self.timeout))?;
        conn.set_write_timeout(Some(self.timeout))?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_url_is_a_config_error() {
        let err = RedisLink::open("not a url", Duration::from_millis(200)).err();
        assert!(matches!(err, Some(PodwatchError::Config(_))));
    }

    #[test]
    fn unreachable_server_fails_the_call_not_the_constructor() {
        let link = RedisLink::open("redis://127.0.0.1:1/", Duration::from_millis(200)).expect("url parses");
        let result: redis::RedisResult<Option<String>> = link.run(|conn| redis::cmd("GET").arg("k").query(conn));
        assert!(result.is_err());
    }
}
