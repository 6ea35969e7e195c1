//! Two peers over a loopback TCP socket.
//!
//! Run with:
//!   cargo run -p tandem-core --example tcp_pair

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use tandem_core::{Connection, Result, Server, StreamTransport};

#[derive(Debug, Default, Deserialize, Serialize)]
struct Greet {
    name: String,
}

fn new_server(prefix: &'static str) -> Arc<Server> {
    let seq = AtomicI64::new(0);
    let server = Server::new(move || {
        format!("{}-{}", prefix, seq.fetch_add(1, Ordering::Relaxed))
    });
    server.register("greet", |_notify, params: &Greet, reply: &mut String| {
        *reply = format!("hello, {}", params.name);
        Ok(())
    });
    Arc::new(server)
}

#[tokio::main]
async fn main() -> Result<()> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let accepting = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        Ok::<_, tandem_core::Error>(stream)
    });

    let stream = tokio::net::TcpStream::connect(addr).await?;
    let client = Connection::new(
        new_server("client"),
        StreamTransport::from_tcp(true, stream, Some(Duration::from_millis(200))),
    );

    let stream = accepting.await.expect("accept task panicked")?;
    let peer = Connection::new(
        new_server("peer"),
        StreamTransport::from_tcp(true, stream, Some(Duration::from_millis(200))),
    );

    let shutdown = CancellationToken::new();
    let peer_loop = {
        let conn = peer.clone();
        let token = shutdown.clone();
        tokio::spawn(async move { conn.serve(token).await })
    };
    let client_loop = {
        let conn = client.clone();
        let token = shutdown.clone();
        tokio::spawn(async move { conn.serve(token).await })
    };

    let (tx, rx) = tokio::sync::oneshot::channel();
    client
        .send("greet", Some(&Greet { name: "tandem".into() }), move |reply: &String| {
            let _ = tx.send(reply.clone());
            Ok(())
        })
        .await?;

    println!("{}", rx.await.expect("no reply"));

    shutdown.cancel();
    let _ = client_loop.await;
    let _ = peer_loop.await;
    Ok(())
}
