//! End-to-end lifecycle tests: a real listener driven over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use callchain_core::{keys, CallContext, CallResult, MapConfig, MemoryLogger};
use callchain_server::{
    Interceptor, LifecycleState, Next, RpcServer, ServerOptions, UnaryCall,
};
use serde_json::{json, Value};
use tracing::Level;

async fn say_hello(_ctx: CallContext, req: Value) -> CallResult {
    let name = req["name"].as_str().unwrap_or("stranger").to_string();
    Ok(json!({ "message": format!("Hello {name}") }))
}

async fn slow(_ctx: CallContext, _req: Value) -> CallResult {
    tokio::time::sleep(Duration::from_millis(300)).await;
    Ok(json!({ "done": true }))
}

async fn explode(_ctx: CallContext, _req: Value) -> CallResult {
    panic!("boom");
}

async fn started(options: ServerOptions) -> (RpcServer, SocketAddr) {
    let mut server = RpcServer::new("127.0.0.1:0", options);
    server.register("/helloworld.Greeter/SayHello", say_hello).unwrap();
    server.register("/helloworld.Greeter/Slow", slow).unwrap();
    server.register("/helloworld.Greeter/Explode", explode).unwrap();
    let addr = server.start().await;
    (server, addr)
}

fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

/// Polls until `expected` calls are in flight, failing after two seconds.
async fn wait_for_in_flight(server: &RpcServer, expected: u64) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while server.in_flight_count() != expected {
        assert!(
            Instant::now() < deadline,
            "expected {expected} calls in flight, found {}",
            server.in_flight_count()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn address_is_connectable_right_after_start() {
    let (mut server, addr) = started(ServerOptions::new()).await;

    let stream = tokio::net::TcpStream::connect(addr).await;
    assert!(stream.is_ok());
    assert_eq!(server.state(), LifecycleState::Listening);

    server.graceful_shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn serves_unary_calls_over_http() {
    let (mut server, addr) = started(ServerOptions::new()).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(url(addr, "/helloworld.Greeter/SayHello"))
        .json(&json!({ "name": "world" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["rpc-status"], "OK");
    assert!(resp.headers().contains_key("x-request-id"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "message": "Hello world" }));

    let health: Value = client
        .get(url(addr, "/health"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["state"], "listening");

    server.graceful_shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn reflection_lists_services() {
    let (mut server, addr) = started(ServerOptions::new()).await;

    let body: Value = reqwest::Client::new()
        .post(url(addr, "/rpc.reflection.ServerReflection/ListServices"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(
        body["services"][0],
        json!({ "name": "helloworld.Greeter", "methods": ["Explode", "SayHello", "Slow"] })
    );

    server.graceful_shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_panic_becomes_error_and_server_keeps_serving() {
    let logger = Arc::new(MemoryLogger::new());
    let (mut server, addr) = started(ServerOptions::new().logger(logger.clone())).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(url(addr, "/helloworld.Greeter/Explode"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "INTERNAL");
    assert!(body["message"].as_str().unwrap().contains("boom"));

    let errors = logger.at_level(Level::ERROR);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("boom"));

    let resp = client
        .post(url(addr, "/helloworld.Greeter/SayHello"))
        .json(&json!({ "name": "again" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    server.graceful_shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn custom_interceptor_panic_is_contained() {
    async fn boom(_call: UnaryCall, _next: Next) -> CallResult {
        panic!("boom");
    }

    let logger = Arc::new(MemoryLogger::new());
    let custom: [Arc<dyn Interceptor>; 1] = [Arc::new(boom)];
    let (mut server, addr) =
        started(ServerOptions::new().logger(logger.clone()).interceptors(custom)).await;

    let resp = reqwest::Client::new()
        .post(url(addr, "/helloworld.Greeter/SayHello"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    let body: Value = resp.json().await.unwrap();
    assert!(body["message"].as_str().unwrap().contains("boom"));
    assert_eq!(logger.at_level(Level::ERROR).len(), 1);

    server.graceful_shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn metrics_are_exposed_when_enabled() {
    let config = MapConfig::new().set(keys::ENABLE_METRICS, true);
    let (mut server, addr) = started(ServerOptions::new().config(Arc::new(config))).await;
    let client = reqwest::Client::new();

    client
        .post(url(addr, "/helloworld.Greeter/SayHello"))
        .send()
        .await
        .unwrap();
    let text = client
        .get(url(addr, "/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("rpc_server_handled_total"));
    assert!(text.contains("rpc_method=\"SayHello\""));

    server.graceful_shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn graceful_shutdown_waits_for_in_flight_calls() {
    let (mut server, addr) = started(ServerOptions::new()).await;

    let in_flight = tokio::spawn(async move {
        reqwest::Client::new()
            .post(url(addr, "/helloworld.Greeter/Slow"))
            .send()
            .await
            .unwrap()
            .json::<Value>()
            .await
            .unwrap()
    });

    wait_for_in_flight(&server, 1).await;

    let shutdown_started = Instant::now();
    server.graceful_shutdown().await;
    assert!(shutdown_started.elapsed() >= Duration::from_millis(50));
    assert_eq!(server.state(), LifecycleState::Stopped);
    assert_eq!(server.in_flight_count(), 0);

    assert_eq!(in_flight.await.unwrap(), json!({ "done": true }));

    let after = reqwest::Client::new()
        .post(url(addr, "/helloworld.Greeter/SayHello"))
        .timeout(Duration::from_secs(2))
        .send()
        .await;
    assert!(after.is_err());
}
