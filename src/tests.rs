//! Cross-component integration tests exercising the full client → session →
//! router → pool → backend path, mirroring the end-to-end scenarios.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::frame::Framer;
use crate::router::Router;
use crate::session::Session;

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

async fn start_proxy(router: Arc<Router>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            let router = router.clone();
            tokio::spawn(async move {
                let session = Session::new(socket, peer, Duration::from_secs(1), Duration::from_secs(1));
                session.run(router).await;
            });
        }
    });
    addr
}

#[tokio::test]
async fn multiple_requests_on_one_session_are_answered_in_order() {
    let backend = spawn_echo_backend(b"$3\r\nbar\r\n").await;
    let router = router_with_backend(12182, &backend).await;
    let addr = start_proxy(router).await;

    let mut client = TcpStream::connect(addr).await.unwrap();

    // PING, then a denied command, then a real GET; each answer must line
    // up with the request that produced it.
    client.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
    let mut buf = vec![0u8; 64];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"+PONG\r\n");

    client.write_all(b"*1\r\n$4\r\nKEYS\r\n").await.unwrap();
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"-unsupported cmd KEYS\r\n");

    client
        .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
        .await
        .unwrap();
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"$3\r\nbar\r\n");
}

#[tokio::test]
async fn quit_closes_the_session_without_a_response() {
    let backend = spawn_echo_backend(b"$3\r\nbar\r\n").await;
    let router = router_with_backend(0, &backend).await;
    let addr = start_proxy(router).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"*1\r\n$4\r\nQUIT\r\n").await.unwrap();

    let mut buf = vec![0u8; 64];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "expected the server to close the connection with no reply");
}

async fn sequenced_backend(replies: Vec<&'static [u8]>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let mut idx = 0;
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let reply = replies.get(idx).copied().unwrap_or(b"+OK\r\n" as &[u8]);
                    idx += 1;
                    if socket.write_all(reply).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    addr
}

#[tokio::test]
async fn moved_then_moved_reaches_the_client_as_the_literal_error_line() {
    let backend_c = spawn_echo_backend(b"$1\r\n1\r\n").await;
    let moved_to_c: String = format!("-MOVED 0 {backend_c}\r\n");
    let backend_b = sequenced_backend(vec![Box::leak(moved_to_c.into_boxed_str()).as_bytes()]).await;
    let moved_to_b: String = format!("-MOVED 0 {backend_b}\r\n");
    let backend_a = sequenced_backend(vec![Box::leak(moved_to_b.into_boxed_str()).as_bytes()]).await;

    let slot = crate::slot::key_slot(b"x");
    let router = router_with_backend(slot, &backend_a).await;
    let addr = start_proxy(router).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nx\r\n")
        .await
        .unwrap();

    let mut buf = vec![0u8; 64];
    let n = client.read(&mut buf).await.unwrap();
    assert_eq!(&buf[..n], b"-Error! MOVED after MOVED\r\n");
}

#[tokio::test]
async fn out_of_range_slot_is_rejected_without_touching_the_pool() {
    let backend = spawn_echo_backend(b"$3\r\nbar\r\n").await;
    let router = router_with_backend(0, &backend).await;

    let err = router
        .slot_do(b"*1\r\n$3\r\nGET\r\n", 16384)
        .await
        .unwrap_err();
    assert!(matches!(err, crate::error::RouterError::SlotOutOfRange(16384)));
}
