//! A joined room: ingress framing, message dispatch and the synchronised
//! state.
//!
//! The room drains its transport's event queue on the caller's thread via
//! [`Room::process_events`]; decoding, callback dispatch and user handlers
//! all run synchronously inside that call. The first byte of every inbound
//! frame is a [`Protocol`] code that selects the handling path.

use std::collections::HashMap;

use futures_channel::mpsc;

use berth_client_api_messages::{close_code, Protocol};
use berth_schema::{Callbacks, Cursor, Decoder, SchemaInstance};

use crate::encode;
use crate::serializer::SchemaSerializer;
use crate::transport::{Transport, TransportEvent};

type JoinHandler = Box<dyn FnMut()>;
type StateHandler = Box<dyn FnMut(&Decoder)>;
type ErrorHandler = Box<dyn FnMut(u32, &str)>;
type LeaveHandler = Box<dyn FnMut(u16, &str)>;
type MessageHandler = Box<dyn FnMut(&[u8])>;
type AnyMessageHandler = Box<dyn FnMut(&str, &[u8])>;
type SchemaMessageHandler = Box<dyn FnMut(u32, &[u8])>;

#[derive(Default)]
struct Handlers {
    on_join: Option<JoinHandler>,
    on_state_change: Option<StateHandler>,
    on_error: Option<ErrorHandler>,
    on_leave: Option<LeaveHandler>,
    on_message: HashMap<String, MessageHandler>,
    on_message_any: Option<AnyMessageHandler>,
    on_schema_message: Option<SchemaMessageHandler>,
}

/// A connection to one server-side room instance.
pub struct Room {
    name: String,
    room_id: String,
    session_id: String,
    reconnection_token: Option<String>,
    serializer_id: Option<String>,
    has_joined: bool,
    transport: Box<dyn Transport>,
    events: mpsc::UnboundedReceiver<TransportEvent>,
    serializer: SchemaSerializer,
    handlers: Handlers,
}

impl Room {
    /// Assembles a room over an already-connected transport. The client
    /// layer uses this after consuming a seat reservation; it is public so
    /// custom transports can be plugged in.
    pub fn with_transport(
        name: &str,
        room_id: &str,
        session_id: &str,
        serializer: SchemaSerializer,
        transport: Box<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Room {
        Room {
            name: name.to_string(),
            room_id: room_id.to_string(),
            session_id: session_id.to_string(),
            reconnection_token: None,
            serializer_id: None,
            has_joined: false,
            transport,
            events,
            serializer,
            handlers: Handlers::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// `"{roomId}:{token}"`, usable with the client's `reconnect` after an
    /// unexpected close (including dev-mode restarts, close code 4010).
    pub fn reconnection_token(&self) -> Option<&str> {
        self.reconnection_token.as_deref()
    }

    pub fn serializer_id(&self) -> Option<&str> {
        self.serializer_id.as_deref()
    }

    pub fn has_joined(&self) -> bool {
        self.has_joined
    }

    /// The reconstructed state tree's root node.
    pub fn state(&self) -> &SchemaInstance {
        self.serializer.state()
    }

    pub fn decoder(&self) -> &Decoder {
        self.serializer.decoder()
    }

    /// The listener registry bound to this room's state.
    pub fn callbacks(&self) -> Callbacks {
        self.serializer.callbacks().clone()
    }

    pub fn on_join(&mut self, f: impl FnMut() + 'static) {
        self.handlers.on_join = Some(Box::new(f));
    }

    pub fn on_state_change(&mut self, f: impl FnMut(&Decoder) + 'static) {
        self.handlers.on_state_change = Some(Box::new(f));
    }

    pub fn on_error(&mut self, f: impl FnMut(u32, &str) + 'static) {
        self.handlers.on_error = Some(Box::new(f));
    }

    pub fn on_leave(&mut self, f: impl FnMut(u16, &str) + 'static) {
        self.handlers.on_leave = Some(Box::new(f));
    }

    /// Handles user messages sent with a string type.
    pub fn on_message(&mut self, message_type: &str, f: impl FnMut(&[u8]) + 'static) {
        self.handlers
            .on_message
            .insert(message_type.to_string(), Box::new(f));
    }

    /// Handles user messages sent with an integer type.
    pub fn on_message_int(&mut self, message_type: u32, f: impl FnMut(&[u8]) + 'static) {
        self.handlers
            .on_message
            .insert(int_message_key(message_type), Box::new(f));
    }

    /// Fallback for message types with no dedicated handler.
    pub fn on_message_any(&mut self, f: impl FnMut(&str, &[u8]) + 'static) {
        self.handlers.on_message_any = Some(Box::new(f));
    }

    /// Handles schema-typed user messages (`ROOM_DATA_SCHEMA`): the server
    /// type id plus the encoded body.
    pub fn on_schema_message(&mut self, f: impl FnMut(u32, &[u8]) + 'static) {
        self.handlers.on_schema_message = Some(Box::new(f));
    }

    /// Sends a string-typed user message.
    pub fn send(&self, message_type: &str, payload: &[u8]) {
        let mut frame = vec![Protocol::RoomData as u8];
        encode::write_string(&mut frame, message_type);
        frame.extend_from_slice(payload);
        self.transport.send(frame);
    }

    /// Sends an integer-typed user message with a raw payload.
    pub fn send_bytes(&self, message_type: u32, payload: &[u8]) {
        let mut frame = vec![Protocol::RoomDataBytes as u8];
        encode::write_uint(&mut frame, message_type as u64);
        frame.extend_from_slice(payload);
        self.transport.send(frame);
    }

    /// Unreliable variant of [`send`](Room::send); a silent no-op on
    /// transports without an unreliable channel.
    pub fn send_unreliable(&self, message_type: &str, payload: &[u8]) {
        let mut frame = vec![Protocol::RoomData as u8];
        encode::write_string(&mut frame, message_type);
        frame.extend_from_slice(payload);
        self.transport.send_unreliable(frame);
    }

    /// Leaves the room. A consented leave asks the server to close the
    /// session; otherwise the socket is closed locally.
    pub fn leave(&mut self, consented: bool) {
        if self.transport.is_open() {
            if consented {
                self.transport.send(vec![Protocol::LeaveRoom as u8]);
            } else {
                self.transport.close(close_code::CONSENTED, "leave");
            }
        } else {
            self.dispatch_leave(close_code::CONSENTED, "already left");
        }
    }

    /// Drains every queued transport event, decoding frames and firing
    /// handlers synchronously on the calling thread.
    pub fn process_events(&mut self) {
        while let Ok(Some(event)) = self.events.try_next() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => {
                // Joined only once the server confirms with JOIN_ROOM.
            }
            TransportEvent::Message(data) => self.handle_frame(&data),
            TransportEvent::Close { code, reason } => self.handle_close(code, &reason),
            TransportEvent::Error(message) => {
                log::error!("transport error in room {}: {message}", self.room_id);
                if let Some(f) = &mut self.handlers.on_error {
                    f(0, &message);
                }
            }
        }
    }

    fn handle_frame(&mut self, data: &[u8]) {
        let Some((&code, payload)) = data.split_first() else {
            return;
        };
        let Some(protocol) = Protocol::from_u8(code) else {
            log::warn!("unknown protocol code {code}");
            return;
        };
        let mut cur = Cursor::new(payload);

        match protocol {
            Protocol::JoinRoom => {
                let token = cur.read_string().unwrap_or_default();
                self.reconnection_token = Some(format!("{}:{}", self.room_id, token));
                if let Ok(serializer_id) = cur.read_string() {
                    self.serializer_id = Some(serializer_id);
                }
                if cur.has_remaining() {
                    if let Err(e) = self.serializer.handshake(payload, cur.pos()) {
                        log::error!("handshake failed: {e}");
                    }
                }
                self.has_joined = true;
                // Acknowledge so the server starts streaming state.
                self.transport.send(vec![Protocol::JoinRoom as u8]);
                if let Some(f) = &mut self.handlers.on_join {
                    f();
                }
            }
            Protocol::Handshake => {
                if let Err(e) = self.serializer.handshake(payload, 0) {
                    log::error!("handshake failed: {e}");
                }
            }
            Protocol::Error => {
                let code = cur.read_number().unwrap_or(0.0) as u32;
                let message = cur.read_string().unwrap_or_default();
                if let Some(f) = &mut self.handlers.on_error {
                    f(code, &message);
                }
            }
            Protocol::LeaveRoom => {
                self.transport.close(close_code::CONSENTED, "server leave");
            }
            Protocol::RoomState => {
                match self.serializer.set_state(payload, 0) {
                    Ok(()) => {
                        if let Some(f) = &mut self.handlers.on_state_change {
                            f(self.serializer.decoder());
                        }
                    }
                    Err(e) => {
                        log::error!("state snapshot decode failed: {e}");
                        if let Some(f) = &mut self.handlers.on_error {
                            f(0, &e.to_string());
                        }
                    }
                }
            }
            Protocol::RoomStatePatch => {
                match self.serializer.patch(payload, 0) {
                    Ok(()) => {
                        if let Some(f) = &mut self.handlers.on_state_change {
                            f(self.serializer.decoder());
                        }
                    }
                    Err(e) => {
                        log::error!("state patch decode failed: {e}");
                        if let Some(f) = &mut self.handlers.on_error {
                            f(0, &e.to_string());
                        }
                    }
                }
            }
            Protocol::RoomData => {
                let (key, display) = match cur.peek() {
                    Ok(prefix) if is_string_prefix(prefix) => {
                        let s = cur.read_string().unwrap_or_default();
                        (s.clone(), s)
                    }
                    Ok(_) => {
                        let n = cur.read_number().unwrap_or(0.0) as u32;
                        (int_message_key(n), n.to_string())
                    }
                    Err(_) => return,
                };
                let body = &payload[cur.pos()..];
                self.dispatch_message(&key, &display, body);
            }
            Protocol::RoomDataBytes => {
                let Ok(n) = cur.read_number() else {
                    return;
                };
                let n = n as u32;
                let body = &payload[cur.pos()..];
                self.dispatch_message(&int_message_key(n), &n.to_string(), body);
            }
            Protocol::RoomDataSchema => {
                let Ok(type_id) = cur.read_number() else {
                    return;
                };
                let body = &payload[cur.pos()..];
                if let Some(f) = &mut self.handlers.on_schema_message {
                    f(type_id as u32, body);
                } else {
                    log::debug!("no handler for schema message type {type_id}");
                }
            }
        }
    }

    fn dispatch_message(&mut self, key: &str, display: &str, payload: &[u8]) {
        if let Some(f) = self.handlers.on_message.get_mut(key) {
            f(payload);
        } else if let Some(f) = &mut self.handlers.on_message_any {
            f(display, payload);
        } else {
            log::debug!("no handler for message type `{display}`");
        }
    }

    fn handle_close(&mut self, code: u16, reason: &str) {
        if code == close_code::DEVMODE_RESTART {
            log::info!("server restarting in dev mode; reconnect with the stored token");
        }
        if self.has_joined {
            self.dispatch_leave(code, reason);
        } else {
            log::error!("room connection closed before join: {reason}");
            if let Some(f) = &mut self.handlers.on_error {
                f(code as u32, reason);
            }
        }
    }

    fn dispatch_leave(&mut self, code: u16, reason: &str) {
        if let Some(f) = &mut self.handlers.on_leave {
            f(code, reason);
        }
    }
}

fn int_message_key(message_type: u32) -> String {
    format!("i{message_type}")
}

fn is_string_prefix(prefix: u8) -> bool {
    matches!(prefix, 0xa0..=0xbf | 0xd9 | 0xda | 0xdb)
}
