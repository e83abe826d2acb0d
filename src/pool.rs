// ABOUTME: Per-address bounded pool of idle backend framers with lease/return and keep-alive
// ABOUTME: A single coarse lock guards first-time queue creation; lease/return after that are channel operations

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, mpsc};

use crate::error::RouterError;
use crate::frame::Framer;
use crate::resp::Reply;

pub type BackendFramer = Framer<TcpStream>;

struct PoolEntry {
    sender: mpsc::Sender<BackendFramer>,
    receiver: Mutex<mpsc::Receiver<BackendFramer>>,
}

/// A bounded FIFO queue of idle backend connections per address.
///
/// Capacity is fixed at creation and never grows: every framer that ever
/// exists for an address was dialed once, during that address's first
/// [`Pool::lease`], and is either idle in the channel or leased to exactly
/// one caller.
pub struct Pool {
    capacity: usize,
    read_timeout: Duration,
    write_timeout: Duration,
    entries: RwLock<HashMap<String, Arc<PoolEntry>>>,
    create_lock: Mutex<()>,
}

impl Pool {
    pub fn new(capacity: usize, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            capacity,
            read_timeout,
            write_timeout,
            entries: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
        }
    }

    /// Returns an idle framer for `addr`, blocking if none is available yet.
    /// Lazily dials `capacity` connections the first time `addr` is seen.
    pub async fn lease(&self, addr: &str) -> Result<BackendFramer, RouterError> {
        let entry = self.entry_for(addr).await?;
        let mut receiver = entry.receiver.lock().await;
        receiver
            .recv()
            .await
            .ok_or_else(|| RouterError::ClusterNotReady(format!("pool for {addr} is closed")))
    }

    /// Clears the framer and returns it to `addr`'s queue. Never blocks
    /// indefinitely: every outstanding lease vacated exactly one slot.
    pub async fn return_framer(&self, addr: &str, mut framer: BackendFramer) {
        framer.clear();
        if let Some(entry) = self.entries.read().await.get(addr) {
            // The channel has room for every framer the pool ever created,
            // so this send cannot block.
            let _ = entry.sender.send(framer).await;
        }
    }

    /// Ensures a queue exists for `addr` without leasing from it, used by
    /// the router's discovery path when it learns of a new shard.
    pub async fn ensure_address(&self, addr: &str) -> Result<(), RouterError> {
        self.entry_for(addr).await.map(drop)
    }

    async fn entry_for(&self, addr: &str) -> Result<Arc<PoolEntry>, RouterError> {
        if let Some(entry) = self.entries.read().await.get(addr) {
            return Ok(entry.clone());
        }

        let _guard = self.create_lock.lock().await;
        // Re-check: another task may have created the entry while we waited
        // for the creation lock.
        if let Some(entry) = self.entries.read().await.get(addr) {
            return Ok(entry.clone());
        }

        let (sender, receiver) = mpsc::channel(self.capacity);
        for _ in 0..self.capacity {
            let framer = dial(addr, self.read_timeout, self.write_timeout).await?;
            sender
                .send(framer)
                .await
                .map_err(|_| RouterError::ClusterNotReady(format!("pool for {addr} is closed")))?;
        }

        let entry = Arc::new(PoolEntry {
            sender,
            receiver: Mutex::new(receiver),
        });
        self.entries
            .write()
            .await
            .insert(addr.to_string(), entry.clone());
        Ok(entry)
    }

    /// Periodic keep-alive: for every known address, probes idle framers
    /// with `PING` and replaces any that fail to answer `PONG`.
    pub async fn refresh(&self) -> Result<(), RouterError> {
        let addrs: Vec<String> = self.entries.read().await.keys().cloned().collect();
        for addr in addrs {
            self.refresh_address(&addr).await?;
        }
        Ok(())
    }

    async fn refresh_address(&self, addr: &str) -> Result<(), RouterError> {
        let entry = match self.entries.read().await.get(addr) {
            Some(entry) => entry.clone(),
            None => return Ok(()),
        };

        for _ in 0..self.capacity {
            let mut framer = {
                let mut receiver = entry.receiver.lock().await;
                match receiver.try_recv() {
                    Ok(framer) => framer,
                    Err(_) => break,
                }
            };

            let healthy = probe(&mut framer).await;
            let framer = if healthy {
                framer
            } else {
                framer.close().await;
                dial(addr, self.read_timeout, self.write_timeout).await?
            };

            let _ = entry.sender.send(framer).await;
        }

        Ok(())
    }
}

async fn probe(framer: &mut BackendFramer) -> bool {
    if framer.write_cmd("PING").await.is_err() {
        return false;
    }
    matches!(framer.read_reply().await, Ok(Reply::Status(s)) if s.as_ref() == &b"PONG"[..])
}

async fn dial(
    addr: &str,
    read_timeout: Duration,
    write_timeout: Duration,
) -> Result<BackendFramer, RouterError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(RouterError::Dial)?;
    Ok(Framer::new(stream, read_timeout, write_timeout))
}
