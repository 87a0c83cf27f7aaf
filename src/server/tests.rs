use super::*;
use crate::application::AppResult;
use bytes::Bytes;
use std::cell::RefCell;
use std::io::{Read, Write};
use std::net::TcpStream as StdStream;
use std::rc::Rc;
use std::thread;

fn test_config() -> Config {
    let mut config = Config::default();
    config.port = 0;
    config.request_timeout = None;
    config
}

fn start<A: Application + 'static>(config: &Config, app: A) -> (Server<A>, EventLoop<Server<A>>) {
    let mut server = Server::bind(config, app).unwrap();
    let mut lp = EventLoop::new(Duration::from_millis(10), 64).unwrap();
    server.start(&mut lp).unwrap();
    (server, lp)
}

fn drive<A: Application + 'static>(
    lp: &mut EventLoop<Server<A>>,
    server: &mut Server<A>,
    until: impl Fn(&Server<A>) -> bool,
) {
    for _ in 0..500 {
        lp.turn(server).unwrap();
        if until(server) {
            return;
        }
    }
    panic!("condition not reached");
}

fn connect(addr: SocketAddr) -> StdStream {
    let stream = StdStream::connect(addr).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

/// Whatever the server sent before closing; a reset counts as the end.
fn read_all(stream: &mut StdStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = stream.read_to_end(&mut buf);
    buf
}

fn hello(_: &Environ, start: &mut StartResponse) -> AppResult {
    start.start(
        "200 OK",
        vec![("Content-Type".into(), "text/plain".into())],
    );
    Ok(vec![Bytes::from_static(b"hel"), Bytes::from_static(b"lo")])
}

#[test]
fn test_fragmented_request_reaches_application() {
    let seen: Rc<RefCell<Vec<Environ>>> = Rc::default();
    let recorder = Rc::clone(&seen);
    let app = move |environ: &Environ, start: &mut StartResponse| -> AppResult {
        recorder.borrow_mut().push(environ.clone());
        hello(environ, start)
    };
    let (mut server, mut lp) = start(&test_config(), app);
    let addr = server.local_addr();

    let mut client = connect(addr);
    client
        .write_all(b"GET /test?x=1 HTTP/1.1\r\nHost: example\r\n")
        .unwrap();
    drive(&mut lp, &mut server, |s| s.connections().len() == 1);
    for _ in 0..5 {
        lp.turn(&mut server).unwrap();
    }
    assert!(seen.borrow().is_empty());

    client.write_all(b"\r\n").unwrap();
    drive(&mut lp, &mut server, |s| s.completed() == 1);

    let environ = seen.borrow()[0].clone();
    assert_eq!(environ.method, "GET");
    assert_eq!(environ.path, "/test");
    assert_eq!(environ.query, "x=1");
    assert_eq!(environ.protocol, "HTTP/1.1");
    assert_eq!(environ.server_port, addr.port());
    assert_eq!(environ.header("host"), Some("example"));
    assert_eq!(environ.remote_addr, Some(client.local_addr().unwrap()));

    let response = String::from_utf8(read_all(&mut client)).unwrap();
    assert!(response.starts_with("HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nDate: "));
    assert!(response.contains(&format!("\r\nServer: {SERVER_SOFTWARE}\r\n\r\nhello")));
    assert!(response.ends_with("\r\n\r\nhello"));
    assert!(server.connections().is_empty());
    assert_eq!(lp.registered(), 1);
}

#[test]
fn test_large_response_is_fully_written() {
    const SIZE: usize = 4 * 1024 * 1024;
    let calls = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&calls);
    let app = move |_: &Environ, start: &mut StartResponse| -> AppResult {
        *counter.borrow_mut() += 1;
        start.start("200 OK", Vec::new());
        Ok(vec![Bytes::from(vec![b'x'; SIZE])])
    };
    let (mut server, mut lp) = start(&test_config(), app);
    let addr = server.local_addr();

    let client = thread::spawn(move || {
        let mut stream = connect(addr);
        stream.write_all(b"GET /big HTTP/1.1\r\n\r\n").unwrap();
        read_all(&mut stream)
    });

    drive(&mut lp, &mut server, |s| s.completed() == 1);
    let response = client.join().unwrap();

    assert_eq!(*calls.borrow(), 1);
    let split = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .unwrap();
    let body = &response[split + 4..];
    assert_eq!(body.len(), SIZE);
    assert!(body.iter().all(|&b| b == b'x'));
}

#[test]
fn test_slow_client_does_not_block_others() {
    let (mut server, mut lp) = start(&test_config(), hello);
    let addr = server.local_addr();

    let mut slow = connect(addr);
    slow.write_all(b"GET /slow HTTP/1.1\r\n").unwrap();
    let mut fast = connect(addr);
    fast.write_all(b"GET /fast HTTP/1.1\r\n\r\n").unwrap();

    drive(&mut lp, &mut server, |s| s.completed() == 1);
    assert!(read_all(&mut fast).ends_with(b"hello"));
    assert_eq!(server.connections().len(), 1);

    slow.write_all(b"\r\n").unwrap();
    drive(&mut lp, &mut server, |s| s.completed() == 2);
    assert!(read_all(&mut slow).ends_with(b"hello"));
}

#[test]
fn test_application_error_closes_only_that_connection() {
    let app = |environ: &Environ, start: &mut StartResponse| -> AppResult {
        if environ.path == "/fail" {
            return Err("view failed".into());
        }
        hello(environ, start)
    };
    let (mut server, mut lp) = start(&test_config(), app);
    let addr = server.local_addr();

    let mut failing = connect(addr);
    failing.write_all(b"GET /fail HTTP/1.1\r\n\r\n").unwrap();
    drive(&mut lp, &mut server, |s| s.connections().len() == 1);
    drive(&mut lp, &mut server, |s| s.connections().is_empty());
    assert!(read_all(&mut failing).is_empty());
    assert_eq!(server.completed(), 0);

    let mut ok = connect(addr);
    ok.write_all(b"GET /ok HTTP/1.1\r\n\r\n").unwrap();
    drive(&mut lp, &mut server, |s| s.completed() == 1);
    assert!(read_all(&mut ok).starts_with(b"HTTP/1.1 200 OK\r\n"));
}

#[test]
fn test_application_panic_is_contained() {
    let app = |environ: &Environ, start: &mut StartResponse| -> AppResult {
        if environ.path == "/panic" {
            panic!("view exploded");
        }
        hello(environ, start)
    };
    let (mut server, mut lp) = start(&test_config(), app);
    let addr = server.local_addr();

    let mut first = connect(addr);
    first.write_all(b"GET /panic HTTP/1.1\r\n\r\n").unwrap();
    drive(&mut lp, &mut server, |s| s.connections().len() == 1);
    drive(&mut lp, &mut server, |s| s.connections().is_empty());
    assert!(read_all(&mut first).is_empty());

    let mut second = connect(addr);
    second.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
    drive(&mut lp, &mut server, |s| s.completed() == 1);
    assert!(read_all(&mut second).ends_with(b"hello"));
}

#[test]
fn test_start_response_twice_sends_nothing() {
    let app = |_: &Environ, start: &mut StartResponse| -> AppResult {
        start.start("200 OK", Vec::new());
        start.start("500 Internal Server Error", Vec::new());
        Ok(Vec::new())
    };
    let (mut server, mut lp) = start(&test_config(), app);

    let mut client = connect(server.local_addr());
    client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
    drive(&mut lp, &mut server, |s| s.connections().len() == 1);
    drive(&mut lp, &mut server, |s| s.connections().is_empty());
    assert!(read_all(&mut client).is_empty());
    assert_eq!(server.completed(), 0);
}

#[test]
fn test_malformed_request_gets_bad_request() {
    let calls = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&calls);
    let app = move |environ: &Environ, start: &mut StartResponse| -> AppResult {
        *counter.borrow_mut() += 1;
        hello(environ, start)
    };
    let (mut server, mut lp) = start(&test_config(), app);

    let mut client = connect(server.local_addr());
    client.write_all(b"GARBAGE\r\n\r\n").unwrap();
    drive(&mut lp, &mut server, |s| s.completed() == 1);

    let response = String::from_utf8(read_all(&mut client)).unwrap();
    assert!(response.starts_with("HTTP/1.1 400 Bad Request\r\n"));
    assert!(response.contains("Connection: close\r\n"));
    assert!(response.ends_with("\r\n\r\n400 Bad Request\n"));
    assert_eq!(*calls.borrow(), 0);
}

#[test]
fn test_oversized_head_gets_431() {
    let mut config = test_config();
    config.max_request_size = 64;
    let (mut server, mut lp) = start(&config, hello);

    let mut client = connect(server.local_addr());
    let mut request = b"GET /".to_vec();
    request.extend(std::iter::repeat(b'a').take(200));
    client.write_all(&request).unwrap();
    drive(&mut lp, &mut server, |s| s.completed() == 1);

    let response = read_all(&mut client);
    assert!(response.starts_with(b"HTTP/1.1 431 Request Header Fields Too Large\r\n"));
    assert!(server.connections().is_empty());
}

#[test]
fn test_peer_close_before_terminator() {
    let (mut server, mut lp) = start(&test_config(), hello);

    let client = connect(server.local_addr());
    (&client).write_all(b"GET / HTTP/1.1\r\n").unwrap();
    drive(&mut lp, &mut server, |s| s.connections().len() == 1);
    client.shutdown(Shutdown::Write).unwrap();

    drive(&mut lp, &mut server, |s| s.connections().is_empty());
    assert_eq!(server.completed(), 0);
    assert_eq!(lp.registered(), 1);
}

#[test]
fn test_connection_limit_drops_extra_peers() {
    let mut config = test_config();
    config.max_connections = 1;
    let (mut server, mut lp) = start(&config, hello);
    let addr = server.local_addr();

    let _held = connect(addr);
    drive(&mut lp, &mut server, |s| s.connections().len() == 1);

    let mut extra = connect(addr);
    for _ in 0..20 {
        lp.turn(&mut server).unwrap();
    }
    assert_eq!(server.connections().len(), 1);
    assert!(read_all(&mut extra).is_empty());
}

#[test]
fn test_idle_connection_times_out() {
    let mut config = test_config();
    config.request_timeout = Some(Duration::from_millis(50));
    let (mut server, mut lp) = start(&config, hello);

    let mut idle = connect(server.local_addr());
    drive(&mut lp, &mut server, |s| s.connections().len() == 1);
    drive(&mut lp, &mut server, |s| s.connections().is_empty());
    assert!(read_all(&mut idle).is_empty());
    // The sweep keeps itself queued.
    assert_eq!(lp.pending_callbacks(), 1);
}

#[test]
fn test_shutdown_unregisters_everything() {
    let (mut server, mut lp) = start(&test_config(), hello);
    let _client = connect(server.local_addr());
    drive(&mut lp, &mut server, |s| s.connections().len() == 1);
    assert_eq!(lp.registered(), 2);

    server.shutdown(&mut lp);
    assert_eq!(lp.registered(), 0);
    assert!(server.connections().is_empty());
    assert!(!server.is_listening());
}

#[test]
fn test_serve_forever_returns_after_stop() {
    let server = Server::bind(&test_config(), hello).unwrap();
    let mut lp = EventLoop::new(Duration::from_millis(10), 64).unwrap();
    lp.schedule(|_, lp| lp.stop());

    server.serve_forever(&mut lp).unwrap();
    assert_eq!(lp.registered(), 0);
    assert_eq!(lp.pending_callbacks(), 0);
}

#[test]
fn test_listener_error_stops_loop_and_cleanup_closes_connections() {
    let (mut server, mut lp) = start(&test_config(), hello);
    let addr = server.local_addr();
    let mut client = connect(addr);
    drive(&mut lp, &mut server, |s| s.connections().len() == 1);

    let ready = Readiness {
        error: true,
        ..Readiness::default()
    };
    Server::on_accept(&mut server, &mut lp, LISTENER, ready).unwrap();
    assert!(!server.is_listening());
    assert!(!lp.is_registered(LISTENER));
    assert!(lp.is_stopped());
    // The connection outlives the listener until cleanup.
    assert_eq!(server.connections().len(), 1);

    server.run(&mut lp).unwrap();
    assert!(server.connections().is_empty());
    assert_eq!(lp.registered(), 0);
    assert!(read_all(&mut client).is_empty());
}
