use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use slotproxy::config::Config;
use slotproxy::error::ProxyError;
use slotproxy::router::Router;
use slotproxy::session::Session;

#[tokio::main]
async fn main() -> Result<(), ProxyError> {
    let config = Config::load();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(if config.debug { Level::DEBUG } else { Level::INFO })
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    tracing::info!(bootstrap = %config.bootstrap, "bootstrapping cluster discovery");
    let router = Arc::new(
        Router::connect(
            &config.bootstrap,
            config.pool_size,
            config.read_timeout,
            config.write_timeout,
        )
        .await?,
    );
    router.spawn_keep_alive(config.refresh_interval);

    let listener = TcpListener::bind(&config.listen)
        .await
        .map_err(ProxyError::Listen)?;
    tracing::info!(listen = %config.listen, "proxy listening");

    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(error = %err, "failed to accept connection");
                continue;
            }
        };

        let router = router.clone();
        let read_timeout = config.read_timeout;
        let write_timeout = config.write_timeout;
        tokio::spawn(async move {
            let session = Session::new(socket, peer, read_timeout, write_timeout);
            session.run(router).await;
        });
    }
}
