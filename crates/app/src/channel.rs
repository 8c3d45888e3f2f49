//! WebSocket session channel.
//!
//! One worker thread owns the socket. It performs the setup handshake,
//! forwards queued capture chunks and turns server messages into session
//! events. The socket is polled with a short read timeout so outbound audio
//! never waits long behind a quiet server.

use atlasvoice_core::error::ChannelError;
use atlasvoice_core::protocol::{decode_server_message, realtime_input_json, SetupMessage};
use atlasvoice_core::{EncodedChunk, EventSender, SessionChannel, SessionEvent};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{debug, info, warn};
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::client::IntoClientRequest;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{Message, WebSocket};

const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Bound on TCP connect and on each read or write of the TLS and HTTP
/// upgrade.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

enum Outbound {
    Chunk(EncodedChunk),
    Close,
}

/// Flags shared between the handle and its worker.
#[derive(Default)]
struct Link {
    handshake_done: AtomicBool,
    closing: AtomicBool,
}

/// Handle held by the session. Sending only queues; the worker does I/O.
pub struct WsChannel {
    outbound: Sender<Outbound>,
    worker: Option<JoinHandle<()>>,
    link: Arc<Link>,
    closed: bool,
}

impl WsChannel {
    /// Spawns the worker and returns immediately. The outcome of the
    /// handshake arrives on `events`.
    pub fn connect(
        url: String,
        setup: &SetupMessage,
        events: EventSender,
    ) -> Result<Self, ChannelError> {
        Self::spawn(url, setup, events, HANDSHAKE_TIMEOUT)
    }

    fn spawn(
        url: String,
        setup: &SetupMessage,
        events: EventSender,
        handshake_timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let setup_json = setup.to_json()?;
        let (outbound, queue) = crossbeam_channel::unbounded();
        let link = Arc::new(Link::default());
        let worker_link = link.clone();

        let worker = thread::Builder::new()
            .name("atlasvoice-socket".into())
            .spawn(move || {
                run_socket(&url, handshake_timeout, setup_json, queue, events, &worker_link)
            })
            .map_err(|e| ChannelError::Connect(format!("Failed to spawn socket thread: {}", e)))?;

        Ok(Self {
            outbound,
            worker: Some(worker),
            link,
            closed: false,
        })
    }
}

impl SessionChannel for WsChannel {
    fn send(&mut self, chunk: EncodedChunk) -> Result<(), ChannelError> {
        if self.closed {
            return Err(ChannelError::Closed);
        }
        self.outbound
            .send(Outbound::Chunk(chunk))
            .map_err(|_| ChannelError::Closed)
    }

    fn close(&mut self) -> Result<(), ChannelError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.link.closing.store(true, Ordering::Release);
        // The worker may already be gone after a remote close
        let _ = self.outbound.send(Outbound::Close);
        if let Some(worker) = self.worker.take() {
            if !self.link.handshake_done.load(Ordering::Acquire) {
                // Still connecting: the worker sees `closing` once the
                // handshake returns and exits without a word
                debug!("Leaving unfinished handshake to time out");
                return Ok(());
            }
            if worker.join().is_err() {
                warn!("Socket thread panicked");
            }
        }
        Ok(())
    }
}

/// Appends the API key to the service endpoint.
pub fn session_url(endpoint: &str, api_key: &str) -> String {
    let separator = if endpoint.contains('?') { '&' } else { '?' };
    format!("{}{}key={}", endpoint, separator, api_key)
}

/// TCP connect, TLS and the HTTP upgrade, each bounded by `timeout`.
fn open_socket(url: &str, timeout: Duration) -> Result<Socket, String> {
    let request = url.into_client_request().map_err(|e| e.to_string())?;
    let uri = request.uri();
    let host = uri
        .host()
        .ok_or_else(|| format!("No host in {}", uri))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = uri
        .port_u16()
        .unwrap_or(if uri.scheme_str() == Some("wss") { 443 } else { 80 });

    let addrs = (host.as_str(), port)
        .to_socket_addrs()
        .map_err(|e| format!("Could not resolve {}: {}", host, e))?;
    let mut last_err = format!("No address for {}", host);
    let mut stream = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(e) => last_err = format!("{}: {}", addr, e),
        }
    }
    let stream = stream.ok_or(last_err)?;
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|_| stream.set_write_timeout(Some(timeout)))
        .map_err(|e| e.to_string())?;

    let (socket, _) = tungstenite::client_tls(request, stream).map_err(|e| e.to_string())?;
    Ok(socket)
}

fn set_read_timeout(socket: &Socket, timeout: Option<Duration>) -> io::Result<()> {
    match socket.get_ref() {
        MaybeTlsStream::Plain(stream) => stream.set_read_timeout(timeout),
        MaybeTlsStream::NativeTls(stream) => stream.get_ref().set_read_timeout(timeout),
        _ => Ok(()),
    }
}

fn is_timeout(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::Io(e)
            if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
    )
}

/// Emits the events carried by one server frame. Malformed frames are
/// dropped.
fn forward_server_frame(raw: &str, events: &EventSender) -> bool {
    match decode_server_message(raw) {
        Ok(decoded) => decoded.into_iter().all(|event| events.send(event).is_ok()),
        Err(e) => {
            warn!("Dropping malformed server message: {}", e);
            true
        }
    }
}

fn run_socket(
    url: &str,
    handshake_timeout: Duration,
    setup_json: String,
    queue: Receiver<Outbound>,
    events: EventSender,
    link: &Link,
) {
    let connected = open_socket(url, handshake_timeout);
    link.handshake_done.store(true, Ordering::Release);
    let mut socket = match connected {
        Ok(socket) => socket,
        Err(e) => {
            if !link.closing.load(Ordering::Acquire) {
                let _ = events.send(SessionEvent::ChannelError(format!("Connection failed: {}", e)));
            }
            return;
        }
    };
    if link.closing.load(Ordering::Acquire) {
        let _ = socket.close(None);
        let _ = socket.flush();
        return;
    }
    info!("Connected to voice service, sending setup");

    if let Err(e) = set_read_timeout(&socket, Some(POLL_INTERVAL)) {
        let _ = events.send(SessionEvent::ChannelError(e.to_string()));
        return;
    }
    if let Err(e) = socket.send(Message::Text(setup_json)) {
        let _ = events.send(SessionEvent::ChannelError(e.to_string()));
        return;
    }

    loop {
        loop {
            match queue.try_recv() {
                Ok(Outbound::Chunk(chunk)) => {
                    let sent = realtime_input_json(&chunk)
                        .map_err(|e| e.to_string())
                        .and_then(|json| socket.send(Message::Text(json)).map_err(|e| e.to_string()));
                    if let Err(e) = sent {
                        let _ = events.send(SessionEvent::ChannelError(e));
                        return;
                    }
                }
                Ok(Outbound::Close) | Err(TryRecvError::Disconnected) => {
                    debug!("Closing socket");
                    let _ = socket.close(None);
                    let _ = socket.flush();
                    return;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match socket.read() {
            Ok(Message::Text(text)) => {
                if !forward_server_frame(&text, &events) {
                    return;
                }
            }
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => {
                    if !forward_server_frame(&text, &events) {
                        return;
                    }
                }
                Err(_) => warn!("Dropping non-UTF-8 binary frame"),
            },
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                    .filter(|r| !r.trim().is_empty());
                let _ = events.send(SessionEvent::ChannelClosed { reason });
                return;
            }
            Ok(_) => {}
            Err(e) if is_timeout(&e) => {}
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                let _ = events.send(SessionEvent::ChannelClosed { reason: None });
                return;
            }
            Err(e) => {
                let _ = events.send(SessionEvent::ChannelError(e.to_string()));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atlasvoice_core::InboundMessage;

    #[test]
    fn test_session_url_appends_key() {
        assert_eq!(
            session_url("wss://example.test/live", "abc"),
            "wss://example.test/live?key=abc"
        );
        assert_eq!(
            session_url("wss://example.test/live?alt=json", "abc"),
            "wss://example.test/live?alt=json&key=abc"
        );
    }

    #[test]
    fn test_timeouts_are_not_errors() {
        let timeout = tungstenite::Error::Io(io::Error::new(io::ErrorKind::WouldBlock, "poll"));
        assert!(is_timeout(&timeout));
        let reset = tungstenite::Error::Io(io::Error::new(io::ErrorKind::ConnectionReset, "rst"));
        assert!(!is_timeout(&reset));
        assert!(!is_timeout(&tungstenite::Error::ConnectionClosed));
    }

    #[test]
    fn test_server_frame_forwarding() {
        let (tx, rx) = crossbeam_channel::unbounded();
        assert!(forward_server_frame(
            r#"{"serverContent":{"interrupted":true}}"#,
            &tx
        ));
        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::ChannelMessage(InboundMessage::Interrupted)
        );

        // Malformed frames are dropped, the socket stays up
        assert!(forward_server_frame("{oops", &tx));
        assert!(rx.try_recv().is_err());

        drop(rx);
        assert!(!forward_server_frame(r#"{"setupComplete":{}}"#, &tx));
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_sends() {
        let (outbound, queue) = crossbeam_channel::unbounded();
        let mut channel = WsChannel {
            outbound,
            worker: None,
            link: Arc::new(Link::default()),
            closed: false,
        };
        channel
            .send(EncodedChunk::from_samples(&[0.0; 4]))
            .unwrap();
        channel.close().unwrap();
        channel.close().unwrap();

        assert!(matches!(queue.try_recv(), Ok(Outbound::Chunk(_))));
        assert!(matches!(queue.try_recv(), Ok(Outbound::Close)));
        assert!(queue.try_recv().is_err());
        assert!(matches!(
            channel.send(EncodedChunk::from_samples(&[0.0; 4])),
            Err(ChannelError::Closed)
        ));
    }

    #[test]
    fn test_unreachable_server_reports_channel_error() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let config = atlasvoice_core::SessionConfig::default();
        let mut channel = WsChannel::connect(
            "ws://127.0.0.1:9".to_string(),
            &SetupMessage::from_config(&config),
            tx,
        )
        .unwrap();

        let event = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(matches!(event, SessionEvent::ChannelError(_)));
        channel.close().unwrap();
    }

    fn silent_server() -> std::net::SocketAddr {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            // Accept and never answer the upgrade
            let held = listener.accept();
            thread::sleep(Duration::from_secs(5));
            drop(held);
        });
        addr
    }

    #[test]
    fn test_close_while_handshaking_returns_promptly() {
        let addr = silent_server();
        let (tx, rx) = crossbeam_channel::unbounded();
        let config = atlasvoice_core::SessionConfig::default();
        let mut channel = WsChannel::spawn(
            format!("ws://{}", addr),
            &SetupMessage::from_config(&config),
            tx,
            Duration::from_secs(3),
        )
        .unwrap();
        thread::sleep(Duration::from_millis(100));

        let started = std::time::Instant::now();
        channel.close().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        // The abandoned handshake stays quiet when it gives up
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_stalled_handshake_times_out() {
        let addr = silent_server();
        let (tx, rx) = crossbeam_channel::unbounded();
        let config = atlasvoice_core::SessionConfig::default();
        let mut channel = WsChannel::spawn(
            format!("ws://{}", addr),
            &SetupMessage::from_config(&config),
            tx,
            Duration::from_millis(200),
        )
        .unwrap();

        let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(event, SessionEvent::ChannelError(_)));
        channel.close().unwrap();
    }
}
