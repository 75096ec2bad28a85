//! The real WebSocket transport against an in-process server.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mango_chat::{ChatClient, ChatError, ClientConfig, ConnectionError, EventReceiver, MessageType, StaticToken};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

type ServerStream = tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>;

async fn next_text(ws: &mut ServerStream) -> String {
    loop {
        match ws.next().await.expect("client stays connected").expect("read") {
            Message::Text(text) => return text,
            Message::Close(_) => panic!("client closed early"),
            _ => continue,
        }
    }
}

async fn drive_until(
    client: &mut ChatClient,
    events: &mut EventReceiver,
    mut done: impl FnMut(&ChatClient) -> bool,
) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !done(&*client) {
            let event = events.recv().await.expect("event channel open");
            client.handle_event(event);
        }
    })
    .await
    .expect("condition reached in time");
}

fn config_for(addr: std::net::SocketAddr) -> ClientConfig {
    ClientConfig {
        server_url: format!("http://{addr}"),
        ..ClientConfig::default()
    }
}

#[tokio::test]
async fn test_full_session_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let connect = next_text(&mut ws).await;
        assert!(connect.starts_with("CONNECT\n"), "{connect:?}");
        assert!(connect.contains("accept-version:1.2\n"));
        assert!(connect.contains("Authorization:Bearer T\n"));
        ws.send(Message::Text("CONNECTED\nversion:1.2\nheart-beat:0,0\n\n\0".to_string()))
            .await
            .unwrap();

        let subscribe = next_text(&mut ws).await;
        assert!(subscribe.starts_with("SUBSCRIBE\n"));
        assert!(subscribe.contains("destination:/topic/chat/10\n"));
        ws.send(Message::Text(
            "MESSAGE\ndestination:/topic/chat/10\nmessage-id:1\n\n{\"id\":1,\"content\":\"hello\"}\0".to_string(),
        ))
        .await
        .unwrap();

        let send = next_text(&mut ws).await;
        assert!(send.starts_with("SEND\ndestination:/app/chat-message\n"));
        assert!(send.contains(r#""content":"hi""#));

        let disconnect = next_text(&mut ws).await;
        assert!(disconnect.starts_with("DISCONNECT\n"));
    });

    let (mut client, mut events) =
        ChatClient::with_websocket(config_for(addr), StaticToken::new("T")).unwrap();
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    client.on_connection_status_change(move |c| sink.lock().unwrap().push(c));

    client.connect().unwrap();
    drive_until(&mut client, &mut events, ChatClient::is_connected).await;

    let seen = Arc::new(Mutex::new(Vec::<serde_json::Value>::new()));
    let recorder = Arc::clone(&seen);
    client
        .subscribe_to_room(10, Box::new(move |v| recorder.lock().unwrap().push(v)), None)
        .unwrap();
    drive_until(&mut client, &mut events, |_| !seen.lock().unwrap().is_empty()).await;
    assert_eq!(seen.lock().unwrap()[0]["content"], "hello");

    client.send_message(10, "hi", MessageType::Text).unwrap();
    client.disconnect();

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server finished")
        .expect("server assertions hold");
    assert_eq!(*statuses.lock().unwrap(), vec![true, false]);
}

#[tokio::test]
async fn test_refused_connection_reports_false() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (mut client, mut events) =
        ChatClient::with_websocket(config_for(addr), StaticToken::new("T")).unwrap();
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&statuses);
    client.on_connection_status_change(move |c| sink.lock().unwrap().push(c));

    client.connect().unwrap();
    drive_until(&mut client, &mut events, |c| !c.connection_status().connecting).await;

    assert_eq!(*statuses.lock().unwrap(), vec![false]);
    assert!(matches!(
        client.last_error(),
        Some(ChatError::Connection(ConnectionError::Transport(_)))
    ));
}
