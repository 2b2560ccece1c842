//! End-to-end event-bus bridge test over a real websocket connection.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pontoon_runtime::streams::fn_handler;
use pontoon_runtime::{EventBusCore, HttpServer, SockJSServer};
use pontoon_script::{ScriptEnv, Value};
use serde_json::json;
use tokio::runtime::Handle;
use tokio_tungstenite::tungstenite::Message as WsMessage;

async fn bound_addr(server: &HttpServer) -> SocketAddr {
    for _ in 0..100 {
        if let Some(addr) = server.core().local_addr() {
            return addr;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server never bound");
}

fn permitted(addresses: &[&str]) -> Value {
    let entries: Vec<Value> = addresses
        .iter()
        .map(|address| {
            Value::Array(pontoon_script::Array::from_pairs(vec![(
                pontoon_script::ArrayKey::Str("address".to_string()),
                Value::Str(address.to_string()),
            )]))
        })
        .collect();
    Value::Array(pontoon_script::Array::from_values(entries))
}

#[tokio::test]
async fn the_bridge_moves_messages_between_socket_and_bus() {
    let env = ScriptEnv::new("bridge.php");
    let bus = EventBusCore::new();

    // Native subscriber that echoes whatever arrives back through the reply
    // address.
    let reply_bus = bus.clone();
    bus.register(
        "echo",
        fn_handler(move |message: pontoon_runtime::BusMessage| {
            if let Some(reply_address) = message.reply_address {
                reply_bus.send(&reply_address, json!({"echoed": message.body}), None);
            }
        }),
    );

    let server = HttpServer::new(Handle::current(), env.clone());
    let sockjs = SockJSServer::new(server.core().clone(), bus.clone(), env.clone());
    sockjs
        .bridge(
            &Value::Array(pontoon_script::Array::from_pairs(vec![(
                pontoon_script::ArrayKey::Str("prefix".to_string()),
                Value::Str("/eventbus".to_string()),
            )])),
            &permitted(&["echo"]),
            &permitted(&["news"]),
        )
        .unwrap();
    server
        .listen(&Value::Int(0), &Value::Str("127.0.0.1".into()), &Value::Null)
        .unwrap();
    let addr = bound_addr(&server).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/eventbus/websocket"))
        .await
        .expect("websocket handshake");

    // Outbound: register on a permitted address, then publish to it.
    ws.send(WsMessage::text(
        json!({"type": "register", "address": "news"}).to_string(),
    ))
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    bus.publish("news", json!("headline"));

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("delivery in time")
        .expect("stream open")
        .expect("frame");
    let delivered: serde_json::Value = serde_json::from_slice(&frame.into_data()).unwrap();
    assert_eq!(delivered, json!({"address": "news", "body": "headline"}));

    // Inbound: send to a permitted address and collect the reply.
    ws.send(WsMessage::text(
        json!({
            "type": "send",
            "address": "echo",
            "body": {"n": 7},
            "replyAddress": "client.reply.1",
        })
        .to_string(),
    ))
    .await
    .unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("reply in time")
        .expect("stream open")
        .expect("frame");
    let reply: serde_json::Value = serde_json::from_slice(&frame.into_data()).unwrap();
    assert_eq!(
        reply,
        json!({"address": "client.reply.1", "body": {"echoed": {"n": 7}}})
    );

    // A non-permitted inbound address is dropped silently.
    ws.send(WsMessage::text(
        json!({"type": "publish", "address": "forbidden", "body": 1}).to_string(),
    ))
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(bus.subscriber_count("forbidden"), 0);

    ws.close(None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    // The close tears the registration down; further publishes have no
    // subscriber left.
    assert_eq!(bus.subscriber_count("news"), 0);

    server.close(&Value::Null).unwrap();
}
