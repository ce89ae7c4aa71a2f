//! WebSocket transport over tokio-tungstenite.
//!
//! `connect` opens the socket and spawns a message loop task on the ambient
//! tokio runtime. The loop multiplexes inbound frames (forwarded to the
//! event channel) with the outbound command queue; the [`WebSocketTransport`]
//! handle owned by the room is just the command sender plus an open flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use futures_channel::mpsc;
use http::Uri;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::transport::{Transport, TransportError, TransportEvent};

enum Command {
    Send(Vec<u8>),
    Close { code: u16, reason: String },
}

pub struct WebSocketTransport {
    commands: mpsc::UnboundedSender<Command>,
    open: Arc<AtomicBool>,
}

impl WebSocketTransport {
    /// Connects and spawns the socket task. Returns the transport handle and
    /// the event stream the room will drain.
    pub async fn connect(
        endpoint: Uri,
    ) -> Result<(WebSocketTransport, mpsc::UnboundedReceiver<TransportEvent>), TransportError>
    {
        let (stream, _response) = connect_async(endpoint).await?;
        let (commands_tx, commands_rx) = mpsc::unbounded();
        let (events_tx, events_rx) = mpsc::unbounded();
        let open = Arc::new(AtomicBool::new(true));

        let _ = events_tx.unbounded_send(TransportEvent::Open);
        tokio::spawn(message_loop(stream, commands_rx, events_tx, open.clone()));

        Ok((
            WebSocketTransport {
                commands: commands_tx,
                open,
            },
            events_rx,
        ))
    }
}

impl Transport for WebSocketTransport {
    fn send(&self, bytes: Vec<u8>) {
        if !self.is_open() {
            return;
        }
        if self.commands.unbounded_send(Command::Send(bytes)).is_err() {
            log::warn!("websocket task is gone; dropping outbound frame");
        }
    }

    fn close(&self, code: u16, reason: &str) {
        self.open.store(false, Ordering::SeqCst);
        let _ = self.commands.unbounded_send(Command::Close {
            code,
            reason: reason.to_string(),
        });
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

async fn message_loop(
    stream: tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<TransportEvent>,
    open: Arc<AtomicBool>,
) {
    let (mut write, mut read) = stream.split();
    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(Message::Binary(bytes))) => {
                    let _ = events.unbounded_send(TransportEvent::Message(bytes.to_vec()));
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = write.send(Message::Pong(payload)).await {
                        log::warn!("failed to answer ping: {e}");
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    open.store(false, Ordering::SeqCst);
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    let _ = events.unbounded_send(TransportEvent::Close { code, reason });
                    break;
                }
                Some(Ok(other)) => {
                    log::debug!("ignoring websocket message {other:?}");
                }
                Some(Err(e)) => {
                    open.store(false, Ordering::SeqCst);
                    let _ = events.unbounded_send(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => {
                    open.store(false, Ordering::SeqCst);
                    let _ = events.unbounded_send(TransportEvent::Close {
                        code: 1006,
                        reason: "connection lost".to_string(),
                    });
                    break;
                }
            },
            command = commands.next() => match command {
                Some(Command::Send(bytes)) => {
                    if let Err(e) = write.send(Message::binary(bytes)).await {
                        log::warn!("failed to send frame: {e}");
                    }
                }
                Some(Command::Close { code, reason }) => {
                    open.store(false, Ordering::SeqCst);
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    break;
                }
                None => break,
            },
        }
    }
}
