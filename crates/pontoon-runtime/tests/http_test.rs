//! End-to-end HTTP tests: script-style handlers behind a real socket,
//! exercised with a real client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pontoon_runtime::{
    Buffer, HttpClient, HttpClientResponse, HttpServer, HttpServerRequest, HttpServerResponse,
    RouteMatcher,
};
use pontoon_script::{Callable, ScriptEnv, Value};
use tokio::runtime::Handle;

async fn bound_addr(server: &HttpServer) -> SocketAddr {
    for _ in 0..100 {
        if let Some(addr) = server.core().local_addr() {
            return addr;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("server never bound");
}

fn echo_handler() -> Callable {
    Callable::new("handleRequest", |_env, args| {
        let request = args[0]
            .as_resource()
            .and_then(|r| r.downcast::<HttpServerRequest>())
            .expect("request resource");
        let response = request
            .response()
            .as_resource()
            .and_then(|r| r.downcast::<HttpServerResponse>())
            .expect("response resource");
        response.set_status_code(&Value::Int(200))?;
        response.put_header(
            &Value::Str("X-Served-By".into()),
            &Value::Str("pontoon".into()),
        )?;
        let path = request.path();
        response.end(&Value::Str(format!(
            "hello {}",
            path.as_str().unwrap_or_default()
        )))?;
        Ok(())
    })
}

#[tokio::test]
async fn a_script_request_handler_serves_real_traffic() {
    let env = ScriptEnv::new("http.php");
    let server = HttpServer::new(Handle::current(), env.clone());
    server
        .request_handler(&Value::Callable(echo_handler()))
        .unwrap();
    server
        .listen(&Value::Int(0), &Value::Str("127.0.0.1".into()), &Value::Null)
        .unwrap();
    let addr = bound_addr(&server).await;

    let response = reqwest::get(format!("http://{addr}/greet")).await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.headers().get("X-Served-By").unwrap(),
        &"pontoon"
    );
    assert_eq!(response.text().await.unwrap(), "hello /greet");

    server.close(&Value::Null).unwrap();
}

#[tokio::test]
async fn a_route_matcher_dispatches_by_method_and_pattern() {
    let env = ScriptEnv::new("routes.php");
    let matcher = RouteMatcher::new(env.clone());

    let on_user = Callable::new("showUser", |_env, args| {
        let request = args[0]
            .as_resource()
            .and_then(|r| r.downcast::<HttpServerRequest>())
            .expect("request resource");
        let params = request.params();
        let user = params
            .as_array()
            .and_then(|a| a.get_str("id").cloned())
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let response = request
            .response()
            .as_resource()
            .and_then(|r| r.downcast::<HttpServerResponse>())
            .expect("response resource");
        response.end(&Value::Str(format!("user {user}")))?;
        Ok(())
    });
    matcher
        .get(
            &Value::Str("/users/:id".into()),
            &Value::Callable(on_user),
        )
        .unwrap();

    let server = HttpServer::new(Handle::current(), env.clone());
    server.request_handler(&matcher.value()).unwrap();
    server
        .listen(&Value::Int(0), &Value::Str("127.0.0.1".into()), &Value::Null)
        .unwrap();
    let addr = bound_addr(&server).await;

    let hit = reqwest::get(format!("http://{addr}/users/42")).await.unwrap();
    assert_eq!(hit.status().as_u16(), 200);
    assert_eq!(hit.text().await.unwrap(), "user 42");

    let miss = reqwest::get(format!("http://{addr}/nope")).await.unwrap();
    assert_eq!(miss.status().as_u16(), 404);

    server.close(&Value::Null).unwrap();
}

#[tokio::test]
async fn the_script_client_talks_to_the_script_server() {
    let env = ScriptEnv::new("client.php");
    let server = HttpServer::new(Handle::current(), env.clone());
    server
        .request_handler(&Value::Callable(echo_handler()))
        .unwrap();
    server
        .listen(&Value::Int(0), &Value::Str("127.0.0.1".into()), &Value::Null)
        .unwrap();
    let addr = bound_addr(&server).await;

    let client = HttpClient::new(Handle::current(), env.clone());
    client
        .set_host(&Value::Str("127.0.0.1".into()))
        .unwrap();
    client.set_port(&Value::Int(addr.port() as i64)).unwrap();

    let (tx, rx) = tokio::sync::oneshot::channel::<(i64, String)>();
    let tx = parking_lot::Mutex::new(Some(tx));
    let on_response = Callable::new("onResponse", move |_env, args| {
        let response = args[0]
            .as_resource()
            .and_then(|r| r.downcast::<HttpClientResponse>())
            .expect("response resource");
        let status = response.status_code().as_int().unwrap_or_default();
        let collected: Arc<parking_lot::Mutex<String>> = Arc::default();
        let sink = collected.clone();
        response.body_handler(&Value::Callable(Callable::new(
            "onBody",
            move |_env, args| {
                let buffer = args[0]
                    .as_resource()
                    .and_then(|r| r.downcast::<Buffer>())
                    .expect("buffer resource");
                *sink.lock() = buffer.to_utf8();
                Ok(())
            },
        )))?;
        let body = collected.lock().clone();
        if let Some(tx) = tx.lock().take() {
            let _ = tx.send((status, body));
        }
        Ok(())
    });
    client
        .get_now(&Value::Str("/ping".into()), &Value::Callable(on_response))
        .unwrap();

    let (status, body) = tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("response in time")
        .expect("response delivered");
    assert_eq!(status, 200);
    assert_eq!(body, "hello /ping");

    server.close(&Value::Null).unwrap();
}
