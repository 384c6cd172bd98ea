//! The published-messages database: an append-only sink keyed on round.
//! Collaborator of the core; this implementation backs the in-process
//! deployments and the test harness.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;

use crate::rpc::{DbRpc, RpcError};

const LOG_TARGET: &str = "atom::db";

#[derive(Default)]
struct Entry {
    writers: usize,
    msgs: Vec<Vec<u8>>,
}

/// In-memory round database. `read` blocks until the expected number of
/// groups have written their share of the round.
#[derive(Default)]
pub struct Database {
    entries: DashMap<u32, Entry>,
    written: Notify,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DbRpc for Database {
    async fn write(
        &self,
        round: u32,
        _num_groups: usize,
        msgs: Vec<Vec<u8>>,
    ) -> Result<(), RpcError> {
        {
            let mut entry = self.entries.entry(round).or_default();
            entry.writers += 1;
            entry.msgs.extend(msgs);
            tracing::debug!(
                target: LOG_TARGET,
                round,
                writers = entry.writers,
                total = entry.msgs.len(),
                "round write"
            );
        }
        self.written.notify_waiters();
        Ok(())
    }

    async fn read(&self, round: u32, num_groups: usize) -> Result<Vec<Vec<u8>>, RpcError> {
        loop {
            // Register for the write signal before checking, so a write
            // landing in between cannot be missed.
            let written = self.written.notified();
            tokio::pin!(written);
            written.as_mut().enable();
            if let Some(entry) = self.entries.get(&round) {
                if entry.writers >= num_groups {
                    return Ok(entry.msgs.clone());
                }
            }
            written.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn read_blocks_until_all_groups_write() {
        let db = Arc::new(Database::new());

        let reader = {
            let db = Arc::clone(&db);
            tokio::spawn(async move { db.read(0, 2).await })
        };

        db.write(0, 2, vec![b"one".to_vec()]).await.unwrap();
        assert!(!reader.is_finished());
        db.write(0, 2, vec![b"two".to_vec()]).await.unwrap();

        let msgs = reader.await.unwrap().unwrap();
        assert_eq!(msgs, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[tokio::test]
    async fn rounds_are_independent() {
        let db = Database::new();
        db.write(3, 1, vec![b"late round".to_vec()]).await.unwrap();
        assert_eq!(db.read(3, 1).await.unwrap(), vec![b"late round".to_vec()]);
    }
}
