// ABOUTME: Owns the slot table, address set, admin connection, and backend pool
// ABOUTME: Implements cluster discovery at startup and the MOVED/ASK redirection policy for each request

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::time::sleep;

use crate::error::RouterError;
use crate::frame::Framer;
use crate::pool::Pool;
use crate::resp::{Reply, RespError};
use crate::slot::SLOT_COUNT;

/// A fixed-length table of 16,384 slot owners, plus the set of addresses
/// known to the proxy (insertion-ordered, for logging).
struct SlotTable {
    owners: Vec<Option<String>>,
    addrs: Vec<String>,
}

impl SlotTable {
    fn new() -> Self {
        Self {
            owners: vec![None; SLOT_COUNT as usize],
            addrs: Vec::new(),
        }
    }

    fn set_range(&mut self, from: usize, to: usize, addr: &str) {
        for slot in &mut self.owners[from..=to] {
            *slot = Some(addr.to_string());
        }
        if !self.addrs.iter().any(|a| a == addr) {
            self.addrs.push(addr.to_string());
        }
    }

    fn set_single(&mut self, slot: usize, addr: &str) {
        self.owners[slot] = Some(addr.to_string());
        if !self.addrs.iter().any(|a| a == addr) {
            self.addrs.push(addr.to_string());
        }
    }
}

pub struct Router {
    slot_table: RwLock<SlotTable>,
    admin: tokio::sync::Mutex<Framer<TcpStream>>,
    pool: Pool,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl Router {
    /// Dials `bootstrap`, verifies the cluster is healthy, and installs the
    /// initial slot map. Any failure here is bootstrap-fatal.
    pub async fn connect(
        bootstrap: &str,
        pool_size: usize,
        read_timeout: Duration,
        write_timeout: Duration,
    ) -> Result<Self, RouterError> {
        let stream = TcpStream::connect(bootstrap)
            .await
            .map_err(RouterError::Dial)?;
        let admin = Framer::new(stream, read_timeout, write_timeout);

        let router = Self {
            slot_table: RwLock::new(SlotTable::new()),
            admin: tokio::sync::Mutex::new(admin),
            pool: Pool::new(pool_size, read_timeout, write_timeout),
            read_timeout,
            write_timeout,
        };

        router.check_state().await?;
        router.init_slot_map().await?;
        Ok(router)
    }

    /// Spawns the keep-alive loop on the current Tokio runtime. Call once,
    /// after `connect` succeeds.
    pub fn spawn_keep_alive(self: &Arc<Self>, interval: Duration) {
        let router = self.clone();
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                if let Err(err) = router.pool.refresh().await {
                    tracing::error!(error = %err, "pool keep-alive refresh failed");
                    std::process::exit(1);
                }
            }
        });
    }

    async fn check_state(&self) -> Result<(), RouterError> {
        let mut admin = self.admin.lock().await;
        admin.write_cmd("CLUSTER INFO").await?;
        let reply = admin.read_reply().await?;
        let text = bulk_to_string(&reply).ok_or_else(|| {
            RouterError::ClusterNotReady("CLUSTER INFO did not return a bulk reply".to_string())
        })?;

        let ready = text
            .lines()
            .any(|line| line.trim() == "cluster_state:ok");
        if !ready {
            return Err(RouterError::ClusterNotReady(
                "cluster_state is not ok".to_string(),
            ));
        }
        Ok(())
    }

    async fn init_slot_map(&self) -> Result<(), RouterError> {
        let reply = {
            let mut admin = self.admin.lock().await;
            admin.write_cmd("CLUSTER SLOTS").await?;
            admin.read_reply().await?
        };

        let entries = match reply {
            Reply::Array(Some(entries)) => entries,
            _ => {
                return Err(RouterError::MalformedSlotsReply(
                    "CLUSTER SLOTS did not return an array".to_string(),
                ));
            }
        };

        let mut table = self.slot_table.write().await;
        for entry in entries {
            let tuple = match entry {
                Reply::Array(Some(tuple)) => tuple,
                _ => {
                    return Err(RouterError::MalformedSlotsReply(
                        "slot entry is not an array".to_string(),
                    ));
                }
            };

            if tuple.len() < 3 {
                return Err(RouterError::MalformedSlotsReply(
                    "slot tuple has fewer than 3 elements".to_string(),
                ));
            }

            let from = integer_of(&tuple[0])?;
            let to = integer_of(&tuple[1])?;
            let addr = addr_of(&tuple[2])?;

            if from < 0 || to < 0 || to >= SLOT_COUNT as i64 || from > to {
                return Err(RouterError::MalformedSlotsReply(format!(
                    "invalid slot range {from}-{to}"
                )));
            }

            table.set_range(from as usize, to as usize, &addr);
            self.pool.ensure_address(&addr).await?;
        }

        Ok(())
    }

    /// Routes `raw_bytes` (the verbatim request) to the owner of `slot`,
    /// resolving at most one MOVED and one ASK redirect.
    #[tracing::instrument(skip(self, raw_bytes))]
    pub async fn slot_do(&self, raw_bytes: &[u8], slot: u16) -> Result<Vec<u8>, RouterError> {
        if slot as u32 >= SLOT_COUNT as u32 {
            return Err(RouterError::SlotOutOfRange(slot as i64));
        }

        let addr = self
            .slot_table
            .read()
            .await
            .owners
            .get(slot as usize)
            .cloned()
            .flatten()
            .ok_or_else(|| RouterError::ClusterNotReady(format!("no owner for slot {slot}")))?;

        match self.exec(raw_bytes, &addr, false).await {
            Ok(resp) => Ok(resp),
            Err(RedirectOrError::Error(err)) => Err(err),
            Err(RedirectOrError::Moved { slot: moved_slot, addr: new_addr }) => {
                self.slot_table
                    .write()
                    .await
                    .set_single(moved_slot as usize, &new_addr);

                match self.exec(raw_bytes, &new_addr, false).await {
                    Ok(resp) => Ok(resp),
                    Err(RedirectOrError::Error(err)) => Err(err),
                    Err(RedirectOrError::Ask { addr: ask_addr, .. }) => {
                        self.exec_ask(raw_bytes, &ask_addr).await
                    }
                    Err(RedirectOrError::Moved { .. }) => Err(RouterError::MovedAfterMoved),
                }
            }
            Err(RedirectOrError::Ask { addr: ask_addr, .. }) => {
                self.exec_ask(raw_bytes, &ask_addr).await
            }
        }
    }

    async fn exec_ask(&self, raw_bytes: &[u8], addr: &str) -> Result<Vec<u8>, RouterError> {
        match self.exec(raw_bytes, addr, true).await {
            Ok(resp) => Ok(resp),
            Err(RedirectOrError::Error(err)) => Err(err),
            Err(RedirectOrError::Moved { .. }) | Err(RedirectOrError::Ask { .. }) => {
                Err(RouterError::ClusterNotReady(
                    "unexpected redirect after ASKING".to_string(),
                ))
            }
        }
    }

    async fn exec(
        &self,
        raw_bytes: &[u8],
        addr: &str,
        ask: bool,
    ) -> Result<Vec<u8>, RedirectOrError> {
        let mut framer = self.pool.lease(addr).await.map_err(RedirectOrError::from_router)?;

        let result = self.exec_leased(&mut framer, raw_bytes, ask).await;
        self.pool.return_framer(addr, framer).await;
        result
    }

    async fn exec_leased(
        &self,
        framer: &mut crate::pool::BackendFramer,
        raw_bytes: &[u8],
        ask: bool,
    ) -> Result<Vec<u8>, RedirectOrError> {
        if ask {
            framer
                .write_cmd("ASKING")
                .await
                .map_err(|e| RedirectOrError::Error(e.into()))?;
            framer
                .read_reply()
                .await
                .map_err(|e| RedirectOrError::Error(e.into()))?;
        }

        framer.clear();
        framer
            .write_bytes(raw_bytes)
            .await
            .map_err(|e| RedirectOrError::Error(e.into()))?;
        let reply = framer
            .read_reply()
            .await
            .map_err(|e| RedirectOrError::Error(e.into()))?;
        let response = framer.response_bytes().to_vec();
        framer.clear();

        if let Reply::Error(RespError::Moved { slot, addr }) = &reply {
            return Err(RedirectOrError::Moved {
                slot: *slot,
                addr: addr.clone(),
            });
        }
        if let Reply::Error(RespError::Ask { slot, addr }) = &reply {
            return Err(RedirectOrError::Ask {
                slot: *slot,
                addr: addr.clone(),
            });
        }

        Ok(response)
    }

    #[cfg(test)]
    pub(crate) async fn set_slot_owner_for_test(&self, slot: u16, addr: &str) {
        self.slot_table
            .write()
            .await
            .set_single(slot as usize, addr);
        let _ = self.pool.ensure_address(addr).await;
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(admin: Framer<TcpStream>, pool_size: usize) -> Self {
        Self {
            slot_table: RwLock::new(SlotTable::new()),
            admin: tokio::sync::Mutex::new(admin),
            pool: Pool::new(pool_size, Duration::from_secs(1), Duration::from_secs(1)),
            read_timeout: Duration::from_secs(1),
            write_timeout: Duration::from_secs(1),
        }
    }
}

/// Internal control-flow type: distinguishes a hard error from the two
/// kinds of redirect so `slot_do` can implement the exact tie-break policy.
enum RedirectOrError {
    Error(RouterError),
    Moved { slot: i64, addr: String },
    Ask { slot: i64, addr: String },
}

impl RedirectOrError {
    fn from_router(err: RouterError) -> Self {
        RedirectOrError::Error(err)
    }
}

fn bulk_to_string(reply: &Reply) -> Option<String> {
    match reply {
        Reply::Bulk(Some(bytes)) => String::from_utf8(bytes.to_vec()).ok(),
        _ => None,
    }
}

fn integer_of(reply: &Reply) -> Result<i64, RouterError> {
    match reply {
        Reply::Integer(n) => Ok(*n),
        _ => Err(RouterError::MalformedSlotsReply(
            "expected integer in slot tuple".to_string(),
        )),
    }
}

fn addr_of(reply: &Reply) -> Result<String, RouterError> {
    let tuple = match reply {
        Reply::Array(Some(tuple)) => tuple,
        _ => {
            return Err(RouterError::MalformedSlotsReply(
                "expected address tuple in slot entry".to_string(),
            ));
        }
    };
    if tuple.len() < 2 {
        return Err(RouterError::MalformedSlotsReply(
            "address tuple has fewer than 2 elements".to_string(),
        ));
    }
    let host = match &tuple[0] {
        Reply::Bulk(Some(bytes)) => {
            String::from_utf8(bytes.to_vec()).map_err(|_| {
                RouterError::MalformedSlotsReply("non-utf8 host in slot entry".to_string())
            })?
        }
        _ => {
            return Err(RouterError::MalformedSlotsReply(
                "expected bulk host in slot entry".to_string(),
            ));
        }
    };
    let port = integer_of(&tuple[1])?;
    Ok(format!("{host}:{port}"))
}
