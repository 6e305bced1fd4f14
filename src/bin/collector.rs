use clap::{App, Arg};
use colored::*;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: &str = "7070";
const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

struct CollectorState {
    run_prefix: String,
    sessions: AtomicU64,
    records: AtomicU64,
    quiet: bool,
    reject_logs: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = App::new("wxbus-collector")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Local log collector for wxbus telemetry")
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Port to listen on")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .validator(|v| match v.parse::<u16>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Port must be a number between 0 and 65535".into()),
                }),
        )
        .arg(
            Arg::with_name("quiet")
                .short("q")
                .long("quiet")
                .help("Do not print received records"),
        )
        .arg(
            Arg::with_name("reject-logs")
                .long("reject-logs")
                .help("Answer every POST /log with 503 to exercise the sink's failure path"),
        )
        .get_matches();

    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let started = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis();

    let state = Arc::new(CollectorState {
        run_prefix: format!("run-{started}"),
        sessions: AtomicU64::new(0),
        records: AtomicU64::new(0),
        quiet: matches.is_present("quiet"),
        reject_logs: matches.is_present("reject-logs"),
    });

    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!("collector listening on 127.0.0.1:{}", port);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let client_state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, client_state).await {
                        warn!("client {} error: {}", addr, e);
                    }
                });
            }
            Err(e) => {
                error!("failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, state: Arc<CollectorState>) -> Result<(), BoxError> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let mut request_line = String::new();
    if reader.read_line(&mut request_line).await? == 0 {
        return Ok(());
    }
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts
        .next()
        .unwrap_or_default()
        .split('?')
        .next()
        .unwrap_or_default()
        .to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let (status, payload) = if content_length > MAX_BODY_BYTES {
        ("413 Payload Too Large", json!({ "error": "body too large" }))
    } else {
        let mut body = vec![0u8; content_length];
        reader.read_exact(&mut body).await?;
        route(&method, &path, &body, &state)
    };

    let payload = payload.to_string();
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{payload}",
        payload.len()
    );
    writer.write_all(response.as_bytes()).await?;
    writer.shutdown().await?;
    Ok(())
}

fn route(method: &str, path: &str, body: &[u8], state: &CollectorState) -> (&'static str, Value) {
    match (method, path) {
        ("GET", "/session") => {
            let session = state.sessions.fetch_add(1, Ordering::Relaxed) + 1;
            let run_id = format!("{}-{}", state.run_prefix, session);
            info!(run_id = %run_id, "session issued");
            (
                "200 OK",
                json!({
                    "runId": run_id,
                    "collector": "wxbus-collector",
                    "version": env!("CARGO_PKG_VERSION"),
                }),
            )
        }
        ("POST", "/log") => {
            if state.reject_logs {
                return ("503 Service Unavailable", json!({ "error": "logs rejected" }));
            }

            let text = String::from_utf8_lossy(body);
            let mut accepted = 0u64;
            for line in text.lines().filter(|line| !line.trim().is_empty()) {
                accepted += 1;
                if !state.quiet {
                    print_record(line);
                }
            }
            let total = state.records.fetch_add(accepted, Ordering::Relaxed) + accepted;
            ("200 OK", json!({ "accepted": accepted, "total": total }))
        }
        _ => ("404 Not Found", json!({ "error": "not found" })),
    }
}

fn print_record(line: &str) {
    match serde_json::from_str::<Value>(line) {
        Ok(record) => {
            let t = record["t"].as_f64().unwrap_or(f64::NAN);
            let sensor = record["sensor"].as_str().unwrap_or("?");
            let kind = record["kind"].as_str().unwrap_or("?");
            println!(
                "{} {} {} {}",
                format!("t={t:>8.1}").dimmed(),
                sensor.cyan().bold(),
                kind.yellow(),
                record["data"]
            );
        }
        Err(_) => println!("{}", line),
    }
}
