// ABOUTME: Per-client request loop: frame, filter, hash, route, and write back exactly one response
// ABOUTME: Requests within a session are answered strictly in order; there is no cross-session ordering

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use tokio::net::TcpStream;

use crate::filter::is_denied;
use crate::frame::Framer;
use crate::resp::Reply;
use crate::router::Router;
use crate::slot::key_slot;

pub struct Session {
    framer: Framer<TcpStream>,
    peer: SocketAddr,
    created_at: SystemTime,
    ops: u64,
    elapsed_micros: u64,
}

enum Outcome {
    Continue,
    Close,
}

impl Session {
    pub fn new(stream: TcpStream, peer: SocketAddr, read_timeout: std::time::Duration, write_timeout: std::time::Duration) -> Self {
        Self {
            framer: Framer::new(stream, read_timeout, write_timeout),
            peer,
            created_at: SystemTime::now(),
            ops: 0,
            elapsed_micros: 0,
        }
    }

    /// Drives the client's request loop until it disconnects or sends `QUIT`.
    pub async fn run(mut self, router: Arc<Router>) {
        let close_reason = loop {
            match self.handle_one(&router).await {
                Ok(Outcome::Continue) => continue,
                Ok(Outcome::Close) => break "client quit".to_string(),
                Err(reason) => break reason,
            }
        };

        self.framer.close().await;
        tracing::info!(
            reason = %close_reason,
            created_at = ?self.created_at,
            closed_at = ?SystemTime::now(),
            ops = self.ops,
            elapsed_micros = self.elapsed_micros,
            peer = %self.peer,
            "session closed",
        );
    }

    async fn handle_one(&mut self, router: &Arc<Router>) -> Result<Outcome, String> {
        self.framer.clear();

        let start = Instant::now();

        let request = self
            .framer
            .read_reply()
            .await
            .map_err(|e| e.to_string())?;

        let items = match request {
            Reply::Array(Some(items)) if !items.is_empty() => items,
            _ => return Err("expected a non-empty array request".to_string()),
        };

        let cmd_bytes = match &items[0] {
            Reply::Bulk(Some(bytes)) => bytes.clone(),
            _ => return Err("command name must be a bulk string".to_string()),
        };
        let cmd = String::from_utf8_lossy(&cmd_bytes).trim().to_uppercase();

        if is_denied(&cmd) {
            let line = format!("-unsupported cmd {cmd}\r\n");
            self.framer
                .write_bytes(line.as_bytes())
                .await
                .map_err(|e| e.to_string())?;
            self.record_op(start);
            return Ok(Outcome::Continue);
        }

        if cmd == "QUIT" {
            return Ok(Outcome::Close);
        }

        if cmd == "PING" {
            self.framer
                .write_bytes(b"+PONG\r\n")
                .await
                .map_err(|e| e.to_string())?;
            self.record_op(start);
            return Ok(Outcome::Continue);
        }

        let key = match items.get(1) {
            Some(Reply::Bulk(Some(bytes))) => bytes.clone(),
            _ => return Err(format!("{cmd} requires a key argument")),
        };
        let slot = key_slot(&key);

        let raw_bytes = self.framer.response_bytes().to_vec();

        match router.slot_do(&raw_bytes, slot).await {
            Ok(response) => {
                self.framer
                    .write_bytes(&response)
                    .await
                    .map_err(|e| e.to_string())?;
            }
            Err(err) => {
                let line = format!("-{err}\r\n");
                self.framer
                    .write_bytes(line.as_bytes())
                    .await
                    .map_err(|e| e.to_string())?;
            }
        }

        self.record_op(start);
        Ok(Outcome::Continue)
    }

    fn record_op(&mut self, start: Instant) {
        self.ops += 1;
        self.elapsed_micros += start.elapsed().as_micros() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::time::Duration;

    async fn spawn_echo_backend(reply: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 4096];
                    loop {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(_) => {
                                if socket.write_all(reply).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });
        addr
    }

    async fn router_with_backend(slot: u16, backend_addr: &str) -> Arc<Router> {
        let admin_addr = spawn_echo_backend(b"+OK\r\n").await;
        let admin_stream = TcpStream::connect(&admin_addr).await.unwrap();
        let admin = Framer::new(admin_stream, Duration::from_secs(1), Duration::from_secs(1));
        let router = Router::new_for_test(admin, 2);
        router.set_slot_owner_for_test(slot, backend_addr).await;
        Arc::new(router)
    }

    async fn run_session_with(router: Arc<Router>, request: &'static [u8]) -> Vec<u8> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, peer) = listener.accept().await.unwrap();
            let session = Session::new(socket, peer, Duration::from_secs(1), Duration::from_secs(1));
            session.run(router).await;
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(request).await.unwrap();

        let mut buf = vec![0u8; 4096];
        let n = client.read(&mut buf).await.unwrap();
        drop(client);
        server.await.unwrap();
        buf[..n].to_vec()
    }

    #[tokio::test]
    async fn local_ping_never_touches_backend() {
        let backend = spawn_echo_backend(b"$1\r\n1\r\n").await;
        let router = router_with_backend(0, &backend).await;
        let resp = run_session_with(router, b"*1\r\n$4\r\nPING\r\n").await;
        assert_eq!(resp, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn denied_command_answered_locally() {
        let backend = spawn_echo_backend(b"$1\r\n1\r\n").await;
        let router = router_with_backend(0, &backend).await;
        let resp = run_session_with(router, b"*1\r\n$4\r\nKEYS\r\n").await;
        assert_eq!(resp, b"-unsupported cmd KEYS\r\n");
    }

    #[tokio::test]
    async fn happy_get_forwards_verbatim_reply() {
        let backend = spawn_echo_backend(b"$3\r\nbar\r\n").await;
        // slot("foo") == 12182, per the spec's worked example.
        let router = router_with_backend(12182, &backend).await;
        let resp = run_session_with(router, b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n").await;
        assert_eq!(resp, b"$3\r\nbar\r\n");
    }
}
