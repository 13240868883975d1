//! Readiness multiplexing across every open query connection.
//!
//! One `collect()` call drives all sockets of a batch from a single task: it
//! waits for any socket to become readable, drains one receive from each
//! ready socket, and repeats until the shared deadline passes, every socket
//! has finished, or a wait comes back empty.

use crate::connection::Connection;
use bytes::Bytes;
use std::collections::HashMap;
use std::future::poll_fn;
use std::hash::Hash;
use std::io;
use std::task::Poll;
use std::time::Duration;
use tokio::time::Instant;

/// Default receive size (32 KiB).
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone)]
pub struct Poller {
    total_timeout: Duration,
    poll_timeout: Duration,
    max_datagram_size: usize,
}

impl Poller {
    pub fn new(total_timeout: Duration, poll_timeout: Duration) -> Self {
        Self {
            total_timeout,
            poll_timeout,
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
        }
    }

    pub fn with_max_datagram_size(mut self, size: usize) -> Self {
        self.max_datagram_size = size.max(1);
        self
    }

    pub fn total_timeout(&self) -> Duration {
        self.total_timeout
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Reads from every open connection until the batch is done.
    ///
    /// Returns the received chunks per key, in arrival order. Keys whose
    /// connection produced nothing are absent. Running out of time or
    /// readiness is not an error; whatever arrived so far is returned.
    pub async fn collect<K>(&self, connections: &[(K, &Connection)]) -> HashMap<K, Vec<Bytes>>
    where
        K: Clone + Eq + Hash,
    {
        let started = Instant::now();
        let mut responses: HashMap<K, Vec<Bytes>> = HashMap::new();
        let mut active: Vec<usize> = connections
            .iter()
            .enumerate()
            .filter(|(_, (_, conn))| conn.is_open())
            .map(|(i, _)| i)
            .collect();
        let mut buf = vec![0u8; self.max_datagram_size];

        while !active.is_empty() {
            let remaining = self.total_timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                tracing::debug!("Poll deadline reached with {} sockets open", active.len());
                break;
            }

            let wait = self.poll_timeout.min(remaining);
            let ready = match tokio::time::timeout(wait, wait_readable(connections, &active)).await {
                Ok(ready) => ready,
                Err(_) => {
                    tracing::debug!("No socket became readable within {:?}", wait);
                    break;
                }
            };

            let mut dropped = Vec::new();
            for (index, readiness) in ready {
                let (key, conn) = &connections[index];
                if let Err(e) = readiness {
                    tracing::debug!("Readiness error on {}: {}", conn.addr(), e);
                    dropped.push(index);
                    continue;
                }

                match conn.try_read(&mut buf) {
                    Ok(0) => {
                        tracing::debug!("End of response stream from {}", conn.addr());
                        dropped.push(index);
                    }
                    Ok(n) => {
                        tracing::debug!("Received {} bytes from {}", n, conn.addr());
                        responses
                            .entry(key.clone())
                            .or_default()
                            .push(Bytes::copy_from_slice(&buf[..n]));
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => {
                        tracing::debug!("Receive from {} failed: {}", conn.addr(), e);
                        dropped.push(index);
                    }
                }
            }

            active.retain(|index| !dropped.contains(index));
        }

        responses
    }
}

/// Resolves once at least one of the `active` connections is readable (or
/// reports an error), yielding each such index with its readiness result.
async fn wait_readable<K>(
    connections: &[(K, &Connection)],
    active: &[usize],
) -> Vec<(usize, io::Result<()>)> {
    poll_fn(|cx| {
        let mut ready = Vec::new();
        for &index in active {
            if let Poll::Ready(result) = connections[index].1.poll_read_ready(cx) {
                ready.push((index, result));
            }
        }
        if ready.is_empty() {
            Poll::Pending
        } else {
            Poll::Ready(ready)
        }
    })
    .await
}
