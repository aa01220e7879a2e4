//! Minimal HTTP/2 origin for the integration tests
//!
//! Serves canned responses by path and records every request it receives.

use bytes::Bytes;
use h2::server::SendResponse;
use h2::RecvStream;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};

/// A canned response
#[derive(Debug, Clone)]
pub struct Route {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

/// What the server saw for one request
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Default)]
struct Shared {
    routes: HashMap<String, Route>,
    requests: Mutex<Vec<RecordedRequest>>,
    connections: AtomicUsize,
}

/// Handle to a running test server
pub struct TestServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
}

impl TestServer {
    /// Binds an ephemeral port on 127.0.0.1 and starts serving `routes`
    pub async fn start(routes: Vec<(&str, Route)>) -> Self {
        let shared = Arc::new(Shared {
            routes: routes
                .into_iter()
                .map(|(path, route)| (path.to_string(), route))
                .collect(),
            ..Shared::default()
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let accept_shared = shared.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_shared.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_connection(socket, accept_shared.clone()));
            }
        });

        Self { addr, shared }
    }

    /// Absolute URI for `path` on this server
    pub fn uri(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared.requests.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }
}

async fn serve_connection(socket: TcpStream, shared: Arc<Shared>) {
    let mut connection = match h2::server::handshake(socket).await {
        Ok(connection) => connection,
        Err(_) => return,
    };

    while let Some(Ok((request, respond))) = connection.accept().await {
        tokio::spawn(handle_request(request, respond, shared.clone()));
    }
}

async fn handle_request(
    request: http::Request<RecvStream>,
    mut respond: SendResponse<Bytes>,
    shared: Arc<Shared>,
) {
    let (parts, mut body) = request.into_parts();

    let mut received = Vec::new();
    while let Some(chunk) = body.data().await {
        let Ok(chunk) = chunk else { return };
        let _ = body.flow_control().release_capacity(chunk.len());
        received.extend_from_slice(&chunk);
    }

    let path = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let mut headers = vec![(
        ":authority".to_string(),
        parts
            .uri
            .authority()
            .map(|a| a.to_string())
            .unwrap_or_default(),
    )];
    for (name, value) in &parts.headers {
        headers.push((
            name.as_str().to_string(),
            String::from_utf8_lossy(value.as_bytes()).into_owned(),
        ));
    }

    shared.requests.lock().unwrap().push(RecordedRequest {
        method: parts.method.to_string(),
        path: path.clone(),
        headers,
        body: received,
    });

    let route = shared.routes.get(&path).cloned().unwrap_or(Route {
        status: 404,
        headers: Vec::new(),
        body: Vec::new(),
    });

    let mut response = http::Response::builder().status(route.status);
    for (name, value) in &route.headers {
        response = response.header(name.as_str(), value.as_str());
    }
    let response = response.body(()).unwrap();

    let end_of_stream = route.body.is_empty();
    let Ok(mut send) = respond.send_response(response, end_of_stream) else {
        return;
    };
    if !end_of_stream {
        let _ = send.send_data(Bytes::from(route.body), true);
    }
}
