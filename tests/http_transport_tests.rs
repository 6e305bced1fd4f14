use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use wxbus::telemetry::{DisableReason, SinkError, TelemetrySink};
use wxbus::transport::{CollectorTransport, HttpTransport, TransportError};
use wxbus::SinkConfig;

#[derive(Debug, Clone)]
struct CapturedRequest {
    request_line: String,
    headers: Vec<String>,
    body: String,
}

/// Minimal collector answering each connection with the next canned response.
async fn spawn_collector(responses: Vec<String>) -> (String, Arc<Mutex<Vec<CapturedRequest>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let captured = Arc::new(Mutex::new(Vec::new()));
    let server_captured = Arc::clone(&captured);

    tokio::spawn(async move {
        for response in responses {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut reader = BufReader::new(reader);

            let mut request_line = String::new();
            reader.read_line(&mut request_line).await.unwrap();

            let mut headers = Vec::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).await.unwrap();
                let line = line.trim_end().to_string();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
                headers.push(line);
            }

            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).await.unwrap();

            server_captured.lock().unwrap().push(CapturedRequest {
                request_line: request_line.trim_end().to_string(),
                headers,
                body: String::from_utf8(body).unwrap(),
            });

            writer.write_all(response.as_bytes()).await.unwrap();
            writer.shutdown().await.unwrap();
        }
    });

    (format!("http://{addr}"), captured)
}

fn json_response(status: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    )
}

#[tokio::test]
async fn test_http_get_and_post_round_trip() {
    let (base_url, captured) = spawn_collector(vec![
        json_response("200 OK", r#"{"runId":"abc"}"#),
        json_response("200 OK", r#"{"accepted":2}"#),
    ])
    .await;

    let transport = HttpTransport::new(&format!("{base_url}/telemetry")).unwrap();

    let session = transport.get("/session").await.unwrap();
    assert_eq!(session.status, 200);
    assert_eq!(session.body, r#"{"runId":"abc"}"#);

    let posted = transport
        .post("/log", "application/x-ndjson", "a\nb\n".to_string())
        .await
        .unwrap();
    assert!(posted.is_success());

    let requests = captured.lock().unwrap().clone();
    assert_eq!(requests[0].request_line, "GET /telemetry/session HTTP/1.1");
    assert_eq!(requests[1].request_line, "POST /telemetry/log HTTP/1.1");
    assert_eq!(requests[1].body, "a\nb\n");
    assert!(requests[1]
        .headers
        .iter()
        .any(|h| h.eq_ignore_ascii_case("content-type: application/x-ndjson")));
}

#[tokio::test]
async fn test_connection_refused_is_connect_error() {
    // Bind then drop to get a port nobody is listening on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let transport = HttpTransport::new(&format!("http://{addr}")).unwrap();
    let result = transport.get("/session").await;
    assert!(matches!(result, Err(TransportError::Connect(_))));
}

#[tokio::test]
async fn test_sink_delivers_over_http() {
    let (base_url, captured) = spawn_collector(vec![
        json_response("200 OK", r#"{"runId":"http-run"}"#),
        json_response("200 OK", r#"{"accepted":3}"#),
    ])
    .await;

    let config = SinkConfig::new(base_url).with_flush_delay(Duration::from_millis(20));
    let sink = TelemetrySink::new(config).unwrap();

    assert_eq!(sink.init().await.unwrap().run_id, "http-run");
    sink.enqueue("one");
    sink.enqueue("two");
    sink.enqueue("three");

    for _ in 0..100 {
        if sink.stats().batches == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(sink.stats().delivered, 3);
    let requests = captured.lock().unwrap().clone();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].body, "one\ntwo\nthree\n");
}

#[tokio::test]
async fn test_unreachable_collector_disables_sink() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let sink = TelemetrySink::new(SinkConfig::new(format!("http://{addr}"))).unwrap();
    assert!(sink.init().await.is_none());
    assert!(matches!(
        sink.disable_reason(),
        Some(DisableReason::Session(SinkError::Transport(TransportError::Connect(_))))
    ));
}
