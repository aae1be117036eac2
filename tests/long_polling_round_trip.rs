//! Drives a `Socket` against a minimal in-process HTTP/1.1 server instead of
//! a real Atmosphere endpoint, exercising the public API directly against a
//! loopback peer rather than mocking at the transport layer.

use atmosphere_client::{Event, RequestBuilder, Socket, TransportKind, TypeTag};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

/// Read one HTTP/1.1 request off `stream` far enough to recover its method
/// and body, ignoring header values the test doesn't care about.
async fn read_request(stream: tokio::net::TcpStream) -> (String, String, tokio::net::TcpStream) {
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader.read_line(&mut request_line).await.expect("read request line");
    let method = request_line.split_whitespace().next().unwrap_or("").to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).await.expect("read header line");
        if line == "\r\n" || line.is_empty() {
            break;
        }
        if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }

    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        reader.read_exact(&mut body).await.expect("read request body");
    }

    (method, String::from_utf8_lossy(&body).into_owned(), reader.into_inner())
}

async fn write_response(mut stream: tokio::net::TcpStream, body: &str) {
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await.expect("write response");
    let _ = stream.shutdown().await;
}

/// Accept connections forever, acking every long-poll GET with an empty body
/// and echoing every write POST's body back prefixed with `echo:` — this is
/// the one response a real Atmosphere server would also synthesize for a
/// broadcast-to-self write, and it's what lets the test observe the POST's
/// response decoded as an inbound message.
async fn serve(listener: TcpListener) {
    loop {
        let Ok((stream, _addr)) = listener.accept().await else {
            return;
        };
        tokio::spawn(async move {
            let (method, body, stream) = read_request(stream).await;
            let response_body = if method == "POST" { format!("echo:{body}") } else { String::new() };
            write_response(stream, &response_body).await;
        });
    }
}

#[tokio::test]
async fn long_polling_write_round_trip_decodes_post_response() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback listener");
    let addr = listener.local_addr().expect("listener local addr");
    tokio::spawn(serve(listener));

    let request = RequestBuilder::new(format!("http://{addr}/socket"))
        .transport(TransportKind::LongPolling)
        .connect_timeout(Duration::from_secs(5))
        .read_timeout(Duration::from_secs(5))
        .request_timeout(Duration::from_secs(5))
        .build();

    let client = atmosphere_client::ClientFactory::new().create();
    let socket: Socket = client.open(request).await.expect("socket connects");

    let received = Arc::new(Mutex::new(Vec::new()));
    let received_clone = received.clone();
    socket.on_type(
        TypeTag::Text,
        Arc::new(move |event, payload| {
            if event == Event::Message {
                received_clone.lock().unwrap().push(payload.into_text_lossy());
            }
        }),
    );

    socket.fire("ping").await.expect("write succeeds");

    assert_eq!(*received.lock().unwrap(), vec!["echo:ping".to_string()]);

    socket.close().await;
}

#[tokio::test]
async fn long_polling_connect_fails_when_server_refuses() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback listener");
    let addr = listener.local_addr().expect("listener local addr");
    drop(listener);

    let request = RequestBuilder::new(format!("http://{addr}/socket"))
        .transport(TransportKind::LongPolling)
        .connect_timeout(Duration::from_secs(2))
        .build();

    let client = atmosphere_client::ClientFactory::new().create();
    let err = client.open(request).await.unwrap_err();
    assert!(!err.to_string().is_empty());
}
