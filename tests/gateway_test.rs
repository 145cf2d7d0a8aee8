//! Gateway over a real socket, in front of real runners

mod common;

use std::net::SocketAddr;
use std::sync::Arc;

use btrfaas::config::GatewayConfig;
use btrfaas::gateway::GatewayServer;
use btrfaas::runner::Uppercase;
use common::*;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

async fn post_invoke(addr: SocketAddr, chain: &str, options: &str, body: &[u8]) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "POST /api/invoke HTTP/1.1\r\n\
         Host: localhost\r\n\
         X-Btrfaas-Chain: {}\r\n\
         X-Btrfaas-Options: {}\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\r\n",
        chain,
        options,
        body.len()
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    stream.write_all(body).await.unwrap();

    let mut response = Vec::new();
    stream.read_to_end(&mut response).await.unwrap();
    String::from_utf8(response).unwrap()
}

#[tokio::test]
async fn test_gateway_serves_chains_until_stopped() {
    let runner = spawn_insecure_runner(Arc::new(Uppercase)).await;

    let mut config = GatewayConfig::default();
    config.http_addr = "127.0.0.1:0".parse().unwrap();
    let server = GatewayServer::bind(&config, insecure_executor(&[runner.entry("uppercase")]))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let stop = CancellationToken::new();
    let serving = tokio::spawn(server.serve(stop.clone()));

    let response = post_invoke(
        addr,
        "uppercase|uppercase",
        r#"[{"skip":"o"},{"skip":"o"}]"#,
        b"foobar",
    )
    .await;
    assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
    assert!(response.ends_with("\r\n\r\nFooBAR"), "{}", response);

    let response = post_invoke(addr, "uppercase", "[{},{}]", b"foobar").await;
    assert!(response.starts_with("HTTP/1.1 400"), "{}", response);

    stop.cancel();
    serving.await.unwrap().unwrap();
    runner.stop().await;
}
