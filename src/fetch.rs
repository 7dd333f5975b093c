use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use ureq::Agent;

use crate::error::FetchError;
use crate::request::FetchRequest;

pub const HISTORICAL_DATA_URL: &str = "https://jp.investing.com/instruments/HistoricalDataAjax";

/// Headers the provider expects from its own page's XHR. The form encoder adds `Content-Type`.
const PROVIDER_HEADERS: [(&str, &str); 5] = [
    (
        "Referer",
        "https://jp.investing.com/currencies/usd-jpy-historical-data",
    ),
    ("Accept", "text/plain, */*; q=0.01"),
    (
        "User-Agent",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_11_6) AppleWebKit/603.2.5 (KHTML, like Gecko) Version/10.1.1 Safari/603.2.5",
    ),
    ("Origin", "https://jp.investing.com"),
    ("X-Requested-With", "XMLHttpRequest"),
];

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Source of the raw historical-data HTML for a request.
pub trait Fetch {
    fn fetch(&self, request: &FetchRequest) -> Result<String, FetchError>;
}

/// Runs the external downloader script and captures its standard output.
///
/// The script's exit status and stderr are not inspected; a failed download shows up as an
/// empty or malformed document.
#[derive(Debug, Clone)]
pub struct Downloader {
    pub interpreter: String,
    pub script: PathBuf,
    /// Unlimited when `None`
    pub timeout: Option<Duration>,
}

impl Downloader {
    pub fn new(interpreter: impl Into<String>, script: impl Into<PathBuf>) -> Self {
        Downloader {
            interpreter: interpreter.into(),
            script: script.into(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, request: &FetchRequest) -> Command {
        let mut command = Command::new(&self.interpreter);
        command
            .arg(&self.script)
            .args(request.downloader_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped());
        command
    }
}

impl Fetch for Downloader {
    fn fetch(&self, request: &FetchRequest) -> Result<String, FetchError> {
        let mut command = self.command(request);
        info!(
            "running command: {} {} {}",
            self.interpreter,
            self.script.display(),
            request.downloader_args().join(" ")
        );

        let started = Instant::now();
        let mut child = ChildGuard(command.spawn().map_err(|source| FetchError::Spawn {
            program: self.interpreter.clone(),
            source,
        })?);
        let mut stdout = child
            .0
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("downloader stdout was not captured"))?;

        // Drained on a separate thread so the wait below can give up
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = tx.send(stdout.read_to_end(&mut buf).map(|_| buf));
        });

        let Some(timeout) = self.timeout else {
            let output = rx.recv().map_err(|_| reader_gone())??;
            let status = child.0.wait()?;
            debug!(%status, bytes = output.len(), "downloader finished");
            return Ok(String::from_utf8(output)?);
        };

        // One deadline covers both draining stdout and the process exiting
        let deadline = started + timeout;
        let timed_out = || {
            warn!(?timeout, "downloader timed out, killing it");
            FetchError::Timeout(timeout)
        };
        let output = match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(output) => output?,
            Err(RecvTimeoutError::Timeout) => return Err(timed_out()),
            Err(RecvTimeoutError::Disconnected) => return Err(reader_gone().into()),
        };
        let status = loop {
            if let Some(status) = child.0.try_wait()? {
                break status;
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(timed_out());
            }
            thread::sleep(EXIT_POLL_INTERVAL.min(deadline - now));
        };

        debug!(%status, bytes = output.len(), "downloader finished");
        Ok(String::from_utf8(output)?)
    }
}

fn reader_gone() -> std::io::Error {
    std::io::Error::other("downloader output reader stopped unexpectedly")
}

/// Kills the child if it is still running and reaps it, on every exit path.
struct ChildGuard(Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        if let Ok(None) = self.0.try_wait() {
            let _ = self.0.kill();
        }
        let _ = self.0.wait();
    }
}

/// Posts the request straight to the provider's historical-data endpoint.
///
/// Redirects are not followed; any non-2xx response is an error.
#[derive(Clone)]
pub struct HttpFetcher {
    pub endpoint: String,
    agent: Agent,
}

impl HttpFetcher {
    pub fn new(endpoint: impl Into<String>, timeout: Option<Duration>) -> Self {
        let agent: Agent = Agent::config_builder()
            .max_redirects(0)
            .http_status_as_error(false)
            .timeout_global(timeout)
            .build()
            .into();

        HttpFetcher {
            endpoint: endpoint.into(),
            agent,
        }
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, request: &FetchRequest) -> Result<String, FetchError> {
        info!(endpoint = %self.endpoint, pair = %request.pair, "requesting history");

        let mut post = self.agent.post(&self.endpoint);
        for (name, value) in PROVIDER_HEADERS {
            post = post.header(name, value);
        }
        let mut resp = post.send_form(request.form_payload())?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
            });
        }

        let body = resp.body_mut().read_to_string()?;
        debug!(bytes = body.len(), "provider responded");
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;

    use super::*;
    use crate::request::Interval;

    fn usd_jpy() -> FetchRequest {
        FetchRequest::new("USD/JPY", "2020/01/01", "2020/01/31", Some(Interval::Daily)).unwrap()
    }

    fn script(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_downloader_passes_arguments() {
        let file = script("printf '%s|' \"$@\"\n");
        let output = Downloader::new("sh", file.path()).fetch(&usd_jpy()).unwrap();

        assert_eq!(output, "-p|USD/JPY|-b|2020/01/01|-e|2020/01/31|-d|");
    }

    #[test]
    fn test_downloader_ignores_exit_status() {
        let file = script("echo '<div></div>'\necho oops >&2\nexit 3\n");
        let output = Downloader::new("sh", file.path()).fetch(&usd_jpy()).unwrap();

        assert_eq!(output, "<div></div>\n");
    }

    #[test]
    fn test_downloader_timeout() {
        let file = script("sleep 5\n");
        let started = Instant::now();
        let result = Downloader::new("sh", file.path())
            .with_timeout(Some(Duration::from_millis(200)))
            .fetch(&usd_jpy());

        assert!(matches!(result, Err(FetchError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_downloader_timeout_after_stdout_closed() {
        let file = script("echo '<div></div>'\nexec >&-\nsleep 6\n");
        let started = Instant::now();
        let result = Downloader::new("sh", file.path())
            .with_timeout(Some(Duration::from_millis(300)))
            .fetch(&usd_jpy());

        assert!(matches!(result, Err(FetchError::Timeout(_))));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn test_downloader_within_timeout() {
        let file = script("echo '<div></div>'\n");
        let output = Downloader::new("sh", file.path())
            .with_timeout(Some(Duration::from_secs(10)))
            .fetch(&usd_jpy())
            .unwrap();

        assert_eq!(output, "<div></div>\n");
    }

    #[test]
    fn test_downloader_missing_program() {
        let result = Downloader::new("fx-history-no-such-program", "x").fetch(&usd_jpy());
        assert!(matches!(result, Err(FetchError::Spawn { .. })));
    }

    #[test]
    fn test_downloader_rejects_invalid_utf8() {
        let file = script("printf '\\377\\376'\n");
        let result = Downloader::new("sh", file.path()).fetch(&usd_jpy());
        assert!(matches!(result, Err(FetchError::Decode(_))));
    }

    /// Serves one canned response and hands back the raw request it received.
    fn serve_once(response: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!(
            "http://{}/instruments/HistoricalDataAjax",
            listener.local_addr().unwrap()
        );

        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request = String::new();
            let mut content_length = 0;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some((name, value)) = line.split_once(':') {
                    if name.eq_ignore_ascii_case("content-length") {
                        content_length = value.trim().parse().unwrap();
                    }
                }
                request.push_str(&line);
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            let mut body = vec![0; content_length];
            reader.read_exact(&mut body).unwrap();
            request.push_str(&String::from_utf8(body).unwrap());

            stream.write_all(response.as_bytes()).unwrap();
            request
        });

        (url, handle)
    }

    #[test]
    fn test_http_fetch_posts_form() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: 11\r\nConnection: close\r\n\r\n<div></div>",
        );

        let body = HttpFetcher::new(url, Some(Duration::from_secs(10)))
            .fetch(&usd_jpy())
            .unwrap();
        assert_eq!(body, "<div></div>");

        let request = server.join().unwrap();
        let lowered = request.to_ascii_lowercase();
        assert!(request.starts_with("POST /instruments/HistoricalDataAjax"));
        assert!(lowered.contains("x-requested-with: xmlhttprequest"));
        assert!(lowered.contains("content-type: application/x-www-form-urlencoded"));
        for field in ["action=historical_data", "curr_id=3", "st_date=2020", "interval_sec=Daily"] {
            assert!(request.contains(field), "missing {field} in {request}");
        }
    }

    #[test]
    fn test_http_fetch_error_status() {
        let (url, server) = serve_once(
            "HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );

        let result = HttpFetcher::new(url, Some(Duration::from_secs(10))).fetch(&usd_jpy());
        assert!(matches!(result, Err(FetchError::Status { status: 503 })));
        server.join().unwrap();
    }

    #[test]
    fn test_http_fetch_does_not_follow_redirects() {
        let (url, server) = serve_once(
            "HTTP/1.1 302 Found\r\nLocation: http://127.0.0.1:1/elsewhere\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        );

        let result = HttpFetcher::new(url, Some(Duration::from_secs(10))).fetch(&usd_jpy());
        assert!(matches!(result, Err(FetchError::Status { status: 302 })));
        server.join().unwrap();
    }
}
