use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub content_type: String,
    pub chunks: Vec<String>,
    /// Close-delimited body without `Content-Length`, written chunk by chunk.
    pub streaming: bool,
}

impl MockResponse {
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            chunks: vec![body.to_string()],
            streaming: false,
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            content_type: "text/plain; charset=utf-8".to_string(),
            ..Self::json(status, body)
        }
    }

    pub fn streaming(status: u16, content_type: &str, chunks: Vec<&str>) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            chunks: chunks.into_iter().map(ToString::to_string).collect(),
            streaming: true,
        }
    }

    fn body(&self) -> String {
        self.chunks.concat()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl RecordedRequest {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }
}

/// Scripted HTTP/1.1 server on `127.0.0.1:0`. The n-th request receives the
/// n-th response; the last response repeats.
pub struct MockWebhook {
    pub endpoint: String,
    request_count: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MockWebhook {
    pub fn start(responses: Vec<MockResponse>) -> Self {
        let scripted = if responses.is_empty() {
            vec![MockResponse::json(500, r#"{"error":"empty_script"}"#)]
        } else {
            responses
        };
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock webhook");
        listener
            .set_nonblocking(true)
            .expect("set nonblocking listener");
        let addr = listener.local_addr().expect("addr");
        let request_count = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(Mutex::new(Vec::new()));
        let count_thread = Arc::clone(&request_count);
        let requests_thread = Arc::clone(&requests);
        let (tx, rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            loop {
                if rx.try_recv().is_ok() {
                    break;
                }
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        let recorded = read_request(&mut stream).unwrap_or_default();
                        if let Ok(mut guard) = requests_thread.lock() {
                            guard.push(recorded);
                        }
                        let idx = count_thread.fetch_add(1, Ordering::SeqCst);
                        let selected = scripted
                            .get(idx)
                            .or_else(|| scripted.last())
                            .cloned()
                            .expect("scripted response");
                        let _ = write_response(&mut stream, &selected);
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(2));
                    }
                    Err(_) => break,
                }
            }
        });
        Self {
            endpoint: format!("http://{addr}/webhook/chat"),
            request_count,
            requests,
            stop_tx: Some(tx),
            handle: Some(handle),
        }
    }

    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Drop for MockWebhook {
    fn drop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Status",
    }
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let mut headers = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        response.content_type
    );
    if response.streaming {
        headers.push_str("\r\n");
        stream.write_all(headers.as_bytes())?;
        stream.flush()?;
        for chunk in &response.chunks {
            stream.write_all(chunk.as_bytes())?;
            stream.flush()?;
            thread::sleep(Duration::from_millis(5));
        }
    } else {
        let body = response.body();
        headers.push_str(&format!("Content-Length: {}\r\n\r\n", body.len()));
        stream.write_all(headers.as_bytes())?;
        stream.write_all(body.as_bytes())?;
        stream.flush()?;
    }
    stream.shutdown(std::net::Shutdown::Write)
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<RecordedRequest> {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    let mut header_end = None;
    while header_end.is_none() {
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
        header_end = find_subsequence(&buffer, b"\r\n\r\n").map(|idx| idx + 4);
        if buffer.len() > 1_048_576 {
            break;
        }
    }
    let header_len = header_end.unwrap_or(buffer.len());
    let head = String::from_utf8_lossy(&buffer[..header_len]).to_string();
    let mut lines = head.lines();
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect();
    let content_length = headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buffer[header_len..].to_vec();
    while body.len() < content_length {
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    Ok(RecordedRequest {
        method,
        path,
        headers,
        body: String::from_utf8_lossy(&body).to_string(),
    })
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
