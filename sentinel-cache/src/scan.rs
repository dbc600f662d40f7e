//! Cursor-based keyspace iteration

use crate::client::FailoverClient;
use crate::command::{Command, Reply};
use crate::error::{CacheError, Result};
use crate::types::{Endpoint, Routing};
use std::collections::VecDeque;
use tracing::warn;

/// Pages through SCAN results one round-trip at a time.
///
/// A SCAN cursor is only meaningful on the node that issued it, so the
/// cursor is pinned to the serving node. When a failover moves the scan to
/// another node the scan starts over from cursor 0.
pub(crate) struct ScanPages {
    client: FailoverClient,
    pattern: String,
    count: usize,
    routing: Routing,
    cursor: u64,
    endpoint: Option<Endpoint>,
    finished: bool,
}

impl ScanPages {
    pub(crate) fn new(
        client: FailoverClient,
        pattern: String,
        count: usize,
        routing: Routing,
    ) -> Self {
        Self {
            client,
            pattern,
            count: count.max(1),
            routing,
            cursor: 0,
            endpoint: None,
            finished: false,
        }
    }

    /// Next page of matching keys, `None` once the scan is complete
    pub(crate) fn next_page(&mut self) -> Result<Option<Vec<String>>> {
        while !self.finished {
            let command = Command::Scan {
                cursor: self.cursor,
                pattern: self.pattern.clone(),
                count: self.count,
            };
            let served =
                self.client
                    .execute_pinned(&command, self.routing, self.endpoint.as_ref())?;

            if let Some(previous) = &self.endpoint {
                if previous != &served.endpoint {
                    warn!(
                        "Scan for '{}' moved from {} to {}; restarting",
                        self.pattern, previous, served.endpoint
                    );
                    self.endpoint = Some(served.endpoint);
                    self.cursor = 0;
                    continue;
                }
            }
            self.endpoint = Some(served.endpoint);

            let (next, keys) = parse_scan_reply(served.value)?;
            self.cursor = next;
            self.finished = next == 0;
            return Ok(Some(keys));
        }
        Ok(None)
    }
}

/// Lazy iterator over keys matching a pattern.
///
/// Yields raw keys (prefix and version stripped). Each underlying SCAN asks
/// for at most `itersize` keys; nothing beyond the current page is held.
pub struct KeyIter {
    pages: ScanPages,
    buffer: VecDeque<String>,
    strip: String,
    failed: bool,
}

impl KeyIter {
    pub(crate) fn new(pages: ScanPages, strip: String) -> Self {
        Self {
            pages,
            buffer: VecDeque::new(),
            strip,
            failed: false,
        }
    }

    fn raw_key(&self, key: String) -> String {
        if let Some(raw) = key.strip_prefix(self.strip.as_str()) {
            return raw.to_string();
        }
        key
    }
}

impl Iterator for KeyIter {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(key) = self.buffer.pop_front() {
                return Some(Ok(self.raw_key(key)));
            }
            if self.failed {
                return None;
            }

            match self.pages.next_page() {
                Ok(Some(keys)) => self.buffer.extend(keys),
                Ok(None) => return None,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

fn parse_scan_reply(reply: Reply) -> Result<(u64, Vec<String>)> {
    let mut parts = reply.into_array()?.into_iter();
    let (Some(cursor), Some(keys)) = (parts.next(), parts.next()) else {
        return Err(CacheError::Store("malformed SCAN reply".to_string()));
    };

    let cursor = cursor.into_string()?;
    let cursor = cursor
        .parse::<u64>()
        .map_err(|_| CacheError::Store(format!("invalid SCAN cursor '{}'", cursor)))?;

    let keys = keys
        .into_array()?
        .into_iter()
        .map(Reply::into_string)
        .collect::<Result<Vec<_>>>()?;

    Ok((cursor, keys))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scan_reply() {
        let reply = Reply::Array(vec![
            Reply::Bytes(b"17".to_vec()),
            Reply::Array(vec![Reply::Bytes(b"a".to_vec()), Reply::Bytes(b"b".to_vec())]),
        ]);
        let (cursor, keys) = parse_scan_reply(reply).unwrap();
        assert_eq!(cursor, 17);
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_scan_reply_malformed() {
        assert!(parse_scan_reply(Reply::Array(vec![Reply::Bytes(b"0".to_vec())])).is_err());
        assert!(
            parse_scan_reply(Reply::Array(vec![
                Reply::Bytes(b"x".to_vec()),
                Reply::Array(vec![])
            ]))
            .is_err()
        );
    }
}
