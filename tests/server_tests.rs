use grackle::handler;
use grackle::{App, BaseHandler, HttpHandler, ServerHandle, WebHandler, WsTextHandler};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tungstenite::Message;

mod common;

#[derive(Default)]
struct HelloHandler {
    base: BaseHandler,
}

impl WebHandler for HelloHandler {
    fn base(&self) -> &BaseHandler {
        &self.base
    }
    fn base_mut(&mut self) -> &mut BaseHandler {
        &mut self.base
    }
}

impl HttpHandler for HelloHandler {
    fn get(&mut self) {
        self.write_string("hello over tcp");
    }
}

#[derive(Default)]
struct EchoWsHandler {
    base: BaseHandler,
}

impl WebHandler for EchoWsHandler {
    fn base(&self) -> &BaseHandler {
        &self.base
    }
    fn base_mut(&mut self) -> &mut BaseHandler {
        &mut self.base
    }
}

impl WsTextHandler for EchoWsHandler {
    fn on_message(&mut self, message: &str) {
        let reply = format!("echo:{message}");
        let _ = self.ws().send_text(reply);
    }
}

#[derive(Default)]
struct LobbyWsHandler {
    base: BaseHandler,
}

impl WebHandler for LobbyWsHandler {
    fn base(&self) -> &BaseHandler {
        &self.base
    }
    fn base_mut(&mut self) -> &mut BaseHandler {
        &mut self.base
    }
}

impl WsTextHandler for LobbyWsHandler {
    fn on_connect(&mut self) {
        self.ws().join_room("lobby");
    }
    fn on_message(&mut self, message: &str) {
        let message = message.to_string();
        self.ws().broadcast("lobby", &message);
    }
}

static PANICKY_WS_CLOSED: AtomicBool = AtomicBool::new(false);

#[derive(Default)]
struct PanickyWsHandler {
    base: BaseHandler,
}

impl WebHandler for PanickyWsHandler {
    fn base(&self) -> &BaseHandler {
        &self.base
    }
    fn base_mut(&mut self) -> &mut BaseHandler {
        &mut self.base
    }
}

impl WsTextHandler for PanickyWsHandler {
    fn on_message(&mut self, _message: &str) {
        panic!("frame handler failed");
    }
    fn on_close(&mut self) {
        PANICKY_WS_CLOSED.store(true, Ordering::SeqCst);
    }
}

fn serve(app: &App) -> ServerHandle {
    let handle = app.serve(Some("127.0.0.1:0")).unwrap();
    handle.wait_ready(Duration::from_secs(2)).unwrap();
    handle
}

#[test]
fn serves_http_over_tcp() {
    common::setup();
    let mut app = App::with_defaults();
    app.route("/", handler::http::<HelloHandler>()).unwrap();
    let handle = serve(&app);

    let mut stream = TcpStream::connect(handle.addr()).unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).unwrap();
    assert!(out.starts_with("HTTP/1.1 200 OK"));
    assert!(out.contains("Connection: close"));
    assert!(out.ends_with("hello over tcp"));
    handle.stop();
}

#[test]
fn answers_404_over_tcp() {
    common::setup();
    let mut app = App::with_defaults();
    app.route("/", handler::http::<HelloHandler>()).unwrap();
    let handle = serve(&app);

    let mut stream = TcpStream::connect(handle.addr()).unwrap();
    stream
        .write_all(b"GET /nope HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).unwrap();
    assert!(out.starts_with("HTTP/1.1 404 Not Found"));
    handle.stop();
}

#[test]
fn malformed_requests_get_400() {
    common::setup();
    let mut app = App::with_defaults();
    app.route("/", handler::http::<HelloHandler>()).unwrap();
    let handle = serve(&app);

    let mut stream = TcpStream::connect(handle.addr()).unwrap();
    stream.write_all(b"NOT A REQUEST\r\n\r\n").unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).unwrap();
    assert!(out.starts_with("HTTP/1.1 400 Bad Request"));
    handle.stop();
}

#[test]
fn websocket_text_handler_echoes() {
    common::setup();
    let mut app = App::with_defaults();
    app.route("/ws", handler::ws_text::<EchoWsHandler>()).unwrap();
    let handle = serve(&app);

    let (mut socket, response) =
        tungstenite::connect(format!("ws://{}/ws", handle.addr())).unwrap();
    assert_eq!(response.status().as_u16(), 101);
    socket.send(Message::Text("ping".to_string())).unwrap();
    match socket.read().unwrap() {
        Message::Text(text) => assert_eq!(text, "echo:ping"),
        other => panic!("unexpected frame: {other:?}"),
    }
    let _ = socket.close(None);
    handle.stop();
}

#[test]
fn text_frames_are_delivered_in_send_order() {
    common::setup();
    let mut app = App::with_defaults();
    app.route("/ws", handler::ws_text::<EchoWsHandler>()).unwrap();
    let handle = serve(&app);

    let (mut socket, _) =
        tungstenite::connect(format!("ws://{}/ws", handle.addr())).unwrap();
    for i in 0..5 {
        socket.send(Message::Text(format!("m{i}"))).unwrap();
    }
    // One echo per frame, in the order the frames were sent.
    for i in 0..5 {
        match socket.read().unwrap() {
            Message::Text(text) => assert_eq!(text, format!("echo:m{i}")),
            other => panic!("unexpected frame: {other:?}"),
        }
    }
    let _ = socket.close(None);
    handle.stop();
}

#[test]
fn pings_are_answered_through_the_writer() {
    common::setup();
    let mut app = App::with_defaults();
    app.route("/ws", handler::ws_text::<EchoWsHandler>()).unwrap();
    let handle = serve(&app);

    let (mut socket, _) =
        tungstenite::connect(format!("ws://{}/ws", handle.addr())).unwrap();
    socket.send(Message::Ping(vec![1, 2, 3])).unwrap();
    socket.send(Message::Text("ping".to_string())).unwrap();
    match socket.read().unwrap() {
        Message::Pong(data) => assert_eq!(data, vec![1, 2, 3]),
        other => panic!("unexpected frame: {other:?}"),
    }
    match socket.read().unwrap() {
        Message::Text(text) => assert_eq!(text, "echo:ping"),
        other => panic!("unexpected frame: {other:?}"),
    }
    let _ = socket.close(None);
    handle.stop();
}

#[test]
fn on_close_runs_even_when_a_frame_hook_panics() {
    common::setup();
    let mut app = App::with_defaults();
    app.route("/ws", handler::ws_text::<PanickyWsHandler>())
        .unwrap();
    let handle = serve(&app);

    let (mut socket, _) =
        tungstenite::connect(format!("ws://{}/ws", handle.addr())).unwrap();
    socket.send(Message::Text("boom".to_string())).unwrap();
    // The server tears the connection down after the panic.
    let _ = socket.read();

    let mut closed = false;
    for _ in 0..100 {
        if PANICKY_WS_CLOSED.load(Ordering::SeqCst) {
            closed = true;
            break;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(closed, "on_close did not run after the hook panicked");
    handle.stop();
}

#[test]
fn room_broadcast_reaches_members() {
    common::setup();
    let mut app = App::with_defaults();
    app.route("/lobby", handler::ws_text::<LobbyWsHandler>())
        .unwrap();
    let handle = serve(&app);

    // The sender joins the room before broadcasting, so it receives its
    // own message through the room writer.
    let (mut socket, _) =
        tungstenite::connect(format!("ws://{}/lobby", handle.addr())).unwrap();
    socket.send(Message::Text("welcome".to_string())).unwrap();
    match socket.read().unwrap() {
        Message::Text(text) => assert_eq!(text, "welcome"),
        other => panic!("unexpected frame: {other:?}"),
    }
    let _ = socket.close(None);
    handle.stop();
}

#[test]
fn plain_get_on_a_websocket_route_is_400() {
    common::setup();
    let mut app = App::with_defaults();
    app.route("/ws", handler::ws_text::<EchoWsHandler>()).unwrap();
    let handle = serve(&app);

    let mut stream = TcpStream::connect(handle.addr()).unwrap();
    stream
        .write_all(b"GET /ws HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).unwrap();
    assert!(out.starts_with("HTTP/1.1 400"));
    assert!(out.contains("WebSocket upgrade required"));
    handle.stop();
}
