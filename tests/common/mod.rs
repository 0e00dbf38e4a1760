//! Shared utilities for integration testing.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use llm_gateway::config::{Config, EndpointConfig, ProviderConfig};
use llm_gateway::guardrails::{Executor, ExecutorConfig, Guardrail};
use llm_gateway::http::{build_router, server};
use llm_gateway::providers::ProviderSet;
use llm_gateway::proxy::AppState;
use llm_gateway::storage::{
    GuardrailMetric, LogBatchWriter, MemoryStorage, MetricBatchWriter, RequestLog, Sink,
    SinkConfig, Storage,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// A scripted upstream response: status, extra headers, body bytes.
pub type ScriptedResponse = (u16, Vec<(String, String)>, Vec<u8>);

/// Raw-TCP mock upstream with exact control over response bytes.
pub struct MockUpstream {
    pub addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockUpstream {
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Number of upstream round-trips observed.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Raw request texts (start line, headers, body) received so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a mock upstream answering every request with the scripted response.
pub async fn start_upstream<F>(script: F) -> MockUpstream
where
    F: Fn() -> ScriptedResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let requests = Arc::new(Mutex::new(Vec::new()));
    let script = Arc::new(script);

    let upstream = MockUpstream {
        addr,
        hits: hits.clone(),
        requests: requests.clone(),
    };

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            let hits = hits.clone();
            let requests = requests.clone();
            let script = script.clone();
            tokio::spawn(async move {
                let raw = match read_http_request(&mut socket).await {
                    Some(raw) => raw,
                    None => return,
                };
                hits.fetch_add(1, Ordering::SeqCst);
                requests.lock().unwrap().push(raw);

                let (status, headers, body) = script();
                let status_text = match status {
                    200 => "200 OK",
                    404 => "404 Not Found",
                    500 => "500 Internal Server Error",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };
                let mut response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n",
                    status_text,
                    body.len()
                );
                for (name, value) in &headers {
                    response.push_str(&format!("{}: {}\r\n", name, value));
                }
                response.push_str("\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.write_all(&body).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    upstream
}

/// Read one HTTP/1.1 request (headers plus Content-Length body) as text.
async fn read_http_request(socket: &mut tokio::net::TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > 1 << 20 {
            return None;
        }
    };

    let headers = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = headers
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())?
        })
        .unwrap_or(0);

    let body_start = header_end + 4;
    while buf.len() < body_start + content_length {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Some(String::from_utf8_lossy(&buf).to_string())
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Options for a test gateway instance.
pub struct GatewayOptions {
    pub upstream_base: String,
    pub endpoints: Vec<EndpointConfig>,
    pub input_guardrails: Vec<Arc<dyn Guardrail>>,
    pub output_guardrails: Vec<Arc<dyn Guardrail>>,
    pub max_body_size: usize,
}

impl GatewayOptions {
    pub fn new(upstream_base: String) -> Self {
        Self {
            upstream_base,
            endpoints: vec![
                endpoint("/v1/chat/completions", &["POST"]),
                endpoint("/v1/completions", &["POST"]),
            ],
            input_guardrails: Vec::new(),
            output_guardrails: Vec::new(),
            max_body_size: 64 * 1024,
        }
    }
}

pub fn endpoint(path: &str, methods: &[&str]) -> EndpointConfig {
    EndpointConfig {
        path: path.into(),
        methods: methods.iter().map(|m| m.to_string()).collect(),
        headers: Default::default(),
        timeout: Some(10),
    }
}

/// A gateway bound to an ephemeral port with in-memory storage.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub storage: Arc<MemoryStorage>,
    pub log_sink: Arc<Sink<RequestLog>>,
    pub metrics_sink: Arc<Sink<GuardrailMetric>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Drain both sinks so storage assertions are deterministic.
    pub async fn drain(&self) {
        self.log_sink.close().await;
        self.metrics_sink.close().await;
    }

    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

pub async fn start_gateway(options: GatewayOptions) -> TestGateway {
    let mut config = Config::default();
    config.storage.backend = "memory".into();
    config.logging.max_body_size = options.max_body_size;
    config.providers = vec![ProviderConfig {
        name: "openai".into(),
        base_url: options.upstream_base,
        endpoints: options.endpoints,
    }];
    let config = Arc::new(config);

    let storage = Arc::new(MemoryStorage::new());
    let storage_dyn: Arc<dyn Storage> = storage.clone();

    let sink_config = SinkConfig {
        buffer_size: 100,
        batch_size: 100,
        flush_interval: Duration::from_millis(50),
        workers: 1,
    };
    let log_sink = Arc::new(Sink::new(
        sink_config.clone(),
        Arc::new(LogBatchWriter(storage_dyn.clone())),
    ));
    let metrics_sink = Arc::new(Sink::new(
        sink_config,
        Arc::new(MetricBatchWriter(storage_dyn)),
    ));

    let executor = if options.input_guardrails.is_empty() && options.output_guardrails.is_empty()
    {
        None
    } else {
        Some(Arc::new(Executor::new(ExecutorConfig {
            input_guardrails: options.input_guardrails,
            output_guardrails: options.output_guardrails,
            metrics: Some(metrics_sink.clone()),
            timeout: Duration::from_secs(5),
        })))
    };

    let providers = Arc::new(ProviderSet::from_config(&config.providers).unwrap());
    let state = AppState {
        providers,
        executor,
        log_sink: Some(log_sink.clone()),
        metrics_sink: Some(metrics_sink.clone()),
        config,
    };
    let router = build_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        let _ = server::serve(listener, router, shutdown_rx).await;
    });

    TestGateway {
        addr,
        storage,
        log_sink,
        metrics_sink,
        shutdown_tx,
    }
}

/// HTTP client that talks straight to the local gateway.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap()
}

pub fn gzip(data: &[u8]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}
