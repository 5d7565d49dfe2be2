use std::future::Future;
use std::time::{Duration, Instant};

use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::{KmlError, Result};

/// Generate a 64-hex-character secret (32 random bytes, hex-encoded).
///
/// Used for the session `access_token` and for tunnel secrets.
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Shell-quote a value for embedding in a `sh -c` command line: wrap in
/// single quotes, escaping any embedded single quote as `'"'"'`.
pub fn shell_escape(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}

/// Current time as an ISO-8601 / RFC-3339 timestamp, for `created_at` fields
/// persisted to the catalog.
pub fn iso8601_now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Poll `f` every `interval` until it returns `Some(value)` or `timeout`
/// elapses, in which case `Err(Timeout)` is returned naming `what`.
pub async fn poll_until<F, Fut, T>(
    what: &str,
    timeout: Duration,
    interval: Duration,
    mut f: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let start = Instant::now();
    loop {
        if let Some(value) = f().await? {
            return Ok(value);
        }
        if start.elapsed() >= timeout {
            return Err(KmlError::Timeout {
                what: what.to_string(),
                after: timeout,
            });
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_token_is_64_hex_chars() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generate_token_is_random() {
        assert_ne!(generate_token(), generate_token());
    }

    #[test]
    fn shell_escape_wraps_in_single_quotes() {
        assert_eq!(shell_escape("hello"), "'hello'");
    }

    #[test]
    fn shell_escape_escapes_embedded_quote() {
        assert_eq!(shell_escape("it's"), r#"'it'"'"'s'"#);
    }

    #[tokio::test]
    async fn poll_until_returns_once_ready() {
        let mut calls = 0;
        let result = poll_until("widget", Duration::from_secs(1), Duration::from_millis(1), || {
            calls += 1;
            let ready = calls >= 3;
            async move { Ok(ready.then_some(42)) }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn poll_until_times_out() {
        let result: Result<u8> = poll_until(
            "widget",
            Duration::from_millis(20),
            Duration::from_millis(5),
            || async { Ok(None) },
        )
        .await;
        assert!(matches!(result, Err(KmlError::Timeout { .. })));
    }
}
