//! Room ingress framing against a scripted in-memory transport.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use futures_channel::mpsc;
use pretty_assertions::assert_eq;

use berth_sdk::messages::{close_code, Protocol};
use berth_sdk::schema::{Field, FieldKind, PrimitiveKind, TypeDescriptor, Value};
use berth_sdk::{Room, SchemaSerializer, Transport, TransportEvent};

struct FakeTransport {
    sent: Rc<RefCell<Vec<Vec<u8>>>>,
    open: Cell<bool>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Transport for FakeTransport {
    fn send(&self, bytes: Vec<u8>) {
        if self.open.get() {
            self.sent.borrow_mut().push(bytes);
        }
    }

    fn close(&self, code: u16, reason: &str) {
        if self.open.replace(false) {
            let _ = self.events.unbounded_send(TransportEvent::Close {
                code,
                reason: reason.to_string(),
            });
        }
    }

    fn is_open(&self) -> bool {
        self.open.get()
    }
}

struct Harness {
    room: Room,
    sent: Rc<RefCell<Vec<Vec<u8>>>>,
    inbound: mpsc::UnboundedSender<TransportEvent>,
}

fn state_descriptor() -> Arc<TypeDescriptor> {
    TypeDescriptor::new_static(
        "State",
        vec![Field::new(
            0,
            "name",
            FieldKind::Primitive(PrimitiveKind::String),
        )],
    )
}

fn harness() -> Harness {
    let (tx, rx) = mpsc::unbounded();
    let sent = Rc::new(RefCell::new(Vec::new()));
    let transport = FakeTransport {
        sent: sent.clone(),
        open: Cell::new(true),
        events: tx.clone(),
    };
    let room = Room::with_transport(
        "battle",
        "R1",
        "sess1",
        SchemaSerializer::new(state_descriptor()),
        Box::new(transport),
        rx,
    );
    Harness {
        room,
        sent,
        inbound: tx,
    }
}

impl Harness {
    fn push(&self, frame: Vec<u8>) {
        self.inbound
            .unbounded_send(TransportEvent::Message(frame))
            .unwrap();
    }

    fn join(&mut self) {
        let mut frame = vec![Protocol::JoinRoom as u8];
        frame.push(0xa4);
        frame.extend_from_slice(b"tokn");
        frame.push(0xa6);
        frame.extend_from_slice(b"schema");
        self.push(frame);
        self.room.process_events();
    }
}

#[test]
fn join_parses_token_and_acks() {
    let mut h = harness();
    let joined = Rc::new(Cell::new(false));
    let flag = joined.clone();
    h.room.on_join(move || flag.set(true));

    h.join();

    assert!(joined.get());
    assert!(h.room.has_joined());
    assert_eq!(h.room.reconnection_token(), Some("R1:tokn"));
    assert_eq!(h.room.serializer_id(), Some("schema"));
    // JOIN_ROOM is acknowledged so the server starts streaming.
    assert_eq!(*h.sent.borrow(), vec![vec![Protocol::JoinRoom as u8]]);
}

#[test]
fn room_state_feeds_decoder_and_fires_state_change() {
    let mut h = harness();
    let changed = Rc::new(Cell::new(0));
    let counter = changed.clone();
    h.room.on_state_change(move |_| counter.set(counter.get() + 1));

    let mut frame = vec![Protocol::RoomState as u8];
    frame.extend_from_slice(&[0xff, 0x00, 0x80, 0xa3]);
    frame.extend_from_slice(b"ada");
    h.push(frame);
    h.room.process_events();

    assert_eq!(changed.get(), 1);
    assert_eq!(h.room.state().get_by_name("name"), Some(&Value::from("ada")));

    // A patch flows through the same decoder.
    let mut frame = vec![Protocol::RoomStatePatch as u8];
    frame.extend_from_slice(&[0xff, 0x00, 0x00, 0xa5]);
    frame.extend_from_slice(b"grace");
    h.push(frame);
    h.room.process_events();

    assert_eq!(changed.get(), 2);
    assert_eq!(
        h.room.state().get_by_name("name"),
        Some(&Value::from("grace"))
    );
}

#[test]
fn bad_patch_reports_error_and_next_frame_recovers() {
    let mut h = harness();
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    h.room.on_error(move |code, message| {
        sink.borrow_mut().push((code, message.to_string()));
    });

    // refId 9 was never announced.
    h.push(vec![Protocol::RoomStatePatch as u8, 0xff, 0x09]);
    h.room.process_events();
    assert_eq!(errors.borrow().len(), 1);

    let mut frame = vec![Protocol::RoomStatePatch as u8];
    frame.extend_from_slice(&[0xff, 0x00, 0x80, 0xa3]);
    frame.extend_from_slice(b"ada");
    h.push(frame);
    h.room.process_events();
    assert_eq!(h.room.state().get_by_name("name"), Some(&Value::from("ada")));
}

#[test]
fn string_and_int_typed_messages_dispatch_by_key() {
    let mut h = harness();
    let chat = Rc::new(RefCell::new(Vec::new()));
    let pings = Rc::new(RefCell::new(Vec::new()));
    let any = Rc::new(RefCell::new(Vec::new()));
    let sink = chat.clone();
    h.room
        .on_message("chat", move |payload| sink.borrow_mut().push(payload.to_vec()));
    let sink = pings.clone();
    h.room
        .on_message_int(5, move |payload| sink.borrow_mut().push(payload.to_vec()));
    let sink = any.clone();
    h.room.on_message_any(move |message_type, _| {
        sink.borrow_mut().push(message_type.to_string());
    });

    let mut frame = vec![Protocol::RoomData as u8, 0xa4];
    frame.extend_from_slice(b"chat");
    frame.extend_from_slice(&[1, 2, 3]);
    h.push(frame);

    h.push(vec![Protocol::RoomDataBytes as u8, 0x05, 9, 9]);
    // No dedicated handler for "other": falls through to the any-handler.
    let mut frame = vec![Protocol::RoomData as u8, 0xa5];
    frame.extend_from_slice(b"other");
    h.push(frame);

    h.room.process_events();

    assert_eq!(*chat.borrow(), vec![vec![1, 2, 3]]);
    assert_eq!(*pings.borrow(), vec![vec![9, 9]]);
    assert_eq!(*any.borrow(), vec!["other".to_string()]);
}

#[test]
fn server_error_frame_reaches_error_handler() {
    let mut h = harness();
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    h.room.on_error(move |code, message| {
        sink.borrow_mut().push((code, message.to_string()));
    });

    // code 4212 (invalid room id) as uint16, then the message.
    let mut frame = vec![Protocol::Error as u8, 0xcd];
    frame.extend_from_slice(&4212u16.to_le_bytes());
    frame.push(0xa9);
    frame.extend_from_slice(b"not found");
    h.push(frame);
    h.room.process_events();

    assert_eq!(*errors.borrow(), vec![(4212, "not found".to_string())]);
}

#[test]
fn leave_and_close_fire_leave_handler_after_join() {
    let mut h = harness();
    h.join();
    let left = Rc::new(RefCell::new(Vec::new()));
    let sink = left.clone();
    h.room.on_leave(move |code, _| sink.borrow_mut().push(code));

    h.room.leave(false);
    h.room.process_events();

    assert_eq!(*left.borrow(), vec![close_code::CONSENTED]);
}

#[test]
fn consented_leave_sends_leave_frame() {
    let mut h = harness();
    h.join();
    h.sent.borrow_mut().clear();

    h.room.leave(true);
    assert_eq!(*h.sent.borrow(), vec![vec![Protocol::LeaveRoom as u8]]);
}

#[test]
fn close_before_join_is_an_error() {
    let mut h = harness();
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = errors.clone();
    h.room.on_error(move |code, _| sink.borrow_mut().push(code));

    h.inbound
        .unbounded_send(TransportEvent::Close {
            code: 1006,
            reason: "connection lost".to_string(),
        })
        .unwrap();
    h.room.process_events();

    assert_eq!(*errors.borrow(), vec![1006]);
}

#[test]
fn outgoing_messages_carry_type_prefix() {
    let h = harness();
    h.room.send("move", &[7]);
    h.room.send_bytes(3, &[8]);

    let sent = h.sent.borrow();
    let mut expected_move = vec![Protocol::RoomData as u8, 0xa4];
    expected_move.extend_from_slice(b"move");
    expected_move.push(7);
    assert_eq!(sent[0], expected_move);
    assert_eq!(sent[1], vec![Protocol::RoomDataBytes as u8, 0x03, 8]);
}
