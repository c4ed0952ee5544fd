use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use bytes::BytesMut;

use redpipe_client::{Command, Error, Session, SessionConfig};
use redpipe_proto::{ReplyDecoder, ReplyNode};

// Honors RUST_LOG so test failures can be traced against client logs.
fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn spawn_server(expected_commands: usize, handler: fn(usize, &[Vec<u8>], &mut TcpStream)) -> String {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
        let mut buf = BytesMut::new();
        let mut decoder = ReplyDecoder::new();
        for idx in 0..expected_commands {
            let args = read_command(&mut stream, &mut buf, &mut decoder).expect("read command");
            handler(idx, &args, &mut stream);
        }
    });

    addr
}

// Requests share the reply grammar (array of bulk strings), so the wire
// decoder doubles as the request parser here.
fn read_command(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    decoder: &mut ReplyDecoder,
) -> Option<Vec<Vec<u8>>> {
    loop {
        if let Some(node) = decoder.decode(buf).expect("decode request") {
            let ReplyNode::Array(items) = node else {
                panic!("request must be an array");
            };
            return Some(
                items
                    .into_iter()
                    .map(|item| match item {
                        ReplyNode::Bulk(data) => data,
                        other => panic!("request argument must be bulk, got {:?}", other),
                    })
                    .collect(),
            );
        }

        let mut chunk = [0u8; 4096];
        let bytes = stream.read(&mut chunk).expect("read");
        if bytes == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..bytes]);
    }
}

fn write_simple(stream: &mut TcpStream, text: &str) {
    let _ = stream.write_all(format!("+{}\r\n", text).as_bytes());
}

fn write_error(stream: &mut TcpStream, text: &str) {
    let _ = stream.write_all(format!("-{}\r\n", text).as_bytes());
}

fn write_integer(stream: &mut TcpStream, value: i64) {
    let _ = stream.write_all(format!(":{}\r\n", value).as_bytes());
}

fn write_bulk(stream: &mut TcpStream, data: &[u8]) {
    let _ = stream.write_all(format!("${}\r\n", data.len()).as_bytes());
    let _ = stream.write_all(data);
    let _ = stream.write_all(b"\r\n");
}

fn write_nil(stream: &mut TcpStream) {
    let _ = stream.write_all(b"$-1\r\n");
}

fn session_with_addr(addr: String) -> Session {
    let config = SessionConfig {
        addr,
        read_timeout: Some(Duration::from_secs(1)),
        write_timeout: Some(Duration::from_secs(1)),
        connect_timeout: Some(Duration::from_secs(1)),
    };
    Session::with_config(config)
}

#[test]
fn set_get_roundtrip() {
    let addr = spawn_server(2, |idx, args, stream| {
        if idx == 0 {
            assert_eq!(args[0], b"SET");
            assert_eq!(args[1], b"key");
            assert_eq!(args[2], b"value");
            write_simple(stream, "OK");
        } else {
            assert_eq!(args[0], b"GET");
            assert_eq!(args[1], b"key");
            write_bulk(stream, b"value");
        }
    });

    let mut session = session_with_addr(addr);
    session.set(b"key", b"value").expect("set");
    let value = session.get(b"key").expect("get");
    assert_eq!(value, Some(b"value".to_vec()));
}

#[test]
fn pipeline_replies_match_commands_in_order() {
    let addr = spawn_server(4, |idx, args, stream| match idx {
        0 => {
            assert_eq!(args[0], b"SET");
            assert_eq!(args[1], b"k1");
            write_simple(stream, "OK");
        }
        1 => {
            assert_eq!(args[1], b"k2");
            write_simple(stream, "OK");
        }
        2 => {
            assert_eq!(args[0], b"GET");
            assert_eq!(args[1], b"k1");
            write_bulk(stream, b"v1");
        }
        _ => {
            assert_eq!(args[1], b"k2");
            write_bulk(stream, b"v2");
        }
    });

    let mut session = session_with_addr(addr);
    let replies = session
        .pipeline(vec![
            Command::new("SET").arg("k1").arg("v1"),
            Command::new("SET").arg("k2").arg("v2"),
            Command::new("GET").arg("k1"),
            Command::new("GET").arg("k2"),
        ])
        .expect("pipeline");

    assert_eq!(replies.len(), 4);
    assert_eq!(replies[0].as_status().unwrap(), "OK");
    assert_eq!(replies[2].as_bytes().unwrap(), b"v1");
    assert_eq!(replies[3].as_bytes().unwrap(), b"v2");
}

#[test]
fn transaction_returns_final_array_reply() {
    let addr = spawn_server(4, |idx, args, stream| match idx {
        0 => {
            assert_eq!(args[0], b"MULTI");
            write_simple(stream, "OK");
        }
        1 => {
            assert_eq!(args[0], b"SET");
            write_simple(stream, "QUEUED");
        }
        2 => {
            assert_eq!(args[0], b"INCR");
            write_simple(stream, "QUEUED");
        }
        _ => {
            assert_eq!(args[0], b"EXEC");
            let _ = stream.write_all(b"*2\r\n+OK\r\n:2\r\n");
        }
    });

    let mut session = session_with_addr(addr);
    let reply = session
        .transaction(vec![
            Command::new("SET").arg("counter").arg("1"),
            Command::new("INCR").arg("counter"),
        ])
        .expect("transaction");

    assert_eq!(reply.len().unwrap(), 2);
    assert_eq!(reply.at(0).unwrap().as_status().unwrap(), "OK");
    assert_eq!(reply.at(1).unwrap().as_integer().unwrap(), 2);
}

#[test]
fn queue_time_rejection_aborts_transaction() {
    let addr = spawn_server(5, |idx, args, stream| match idx {
        0 => write_simple(stream, "OK"),
        1 => write_simple(stream, "QUEUED"),
        2 => write_error(stream, "ERR wrong number of arguments"),
        3 => {
            assert_eq!(args[0], b"EXEC");
            let _ = stream.write_all(b"*-1\r\n");
        }
        _ => {
            assert_eq!(args[0], b"PING");
            write_simple(stream, "PONG");
        }
    });

    let mut session = session_with_addr(addr);
    let result = session.transaction(vec![
        Command::new("SET").arg("a").arg("1"),
        Command::new("INCR"),
    ]);
    assert!(matches!(result, Err(Error::Remote(_))));

    // Every transaction reply, including EXEC's, was drained before the
    // error surfaced, so the session stays usable and in sync.
    assert!(session.is_connected());
    assert_eq!(session.ping().expect("ping after rejection"), "PONG");
}

#[test]
fn error_reply_surfaces_at_access_site() {
    let addr = spawn_server(1, |_, _, stream| {
        write_error(stream, "ERR unknown command");
    });

    let mut session = session_with_addr(addr);
    let reply = session.execute(Command::new("BOGUS")).expect("execute");
    assert!(reply.is_error());
    assert_eq!(reply.error_message(), "ERR unknown command");
    assert!(matches!(reply.as_bytes(), Err(Error::Remote(_))));
}

#[test]
fn binary_payload_round_trips_byte_for_byte() {
    let addr = spawn_server(1, |_, args, stream| {
        assert_eq!(args[0], b"ECHO");
        let payload = args[1].clone();
        write_bulk(stream, &payload);
    });

    let payload: &[u8] = &[0x00, 0xff, 0x80, 0x0a, 0x0d];
    let mut session = session_with_addr(addr);
    let reply = session
        .execute(Command::new("ECHO").arg(payload))
        .expect("echo");
    assert_eq!(reply.as_bytes().unwrap(), payload);
}

#[test]
fn mget_maps_nil_elements_to_none() {
    let addr = spawn_server(1, |_, args, stream| {
        assert_eq!(args, &[b"MGET".to_vec(), b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        let _ = stream.write_all(b"*3\r\n");
        write_bulk(stream, b"1");
        write_nil(stream);
        write_bulk(stream, b"3");
    });

    let mut session = session_with_addr(addr);
    let values = session.mget(&[b"a", b"b", b"c"]).expect("mget");
    assert_eq!(
        values,
        vec![Some(b"1".to_vec()), None, Some(b"3".to_vec())]
    );
}

#[test]
fn absent_rank_reads_as_none() {
    let addr = spawn_server(1, |_, args, stream| {
        assert_eq!(args[0], b"ZRANK");
        write_nil(stream);
    });

    let mut session = session_with_addr(addr);
    let rank = session.zrank(b"zs", b"ghost").expect("zrank");
    assert_eq!(rank, None);
}

#[test]
fn counters_and_flags() {
    let addr = spawn_server(3, |idx, args, stream| match idx {
        0 => {
            assert_eq!(args[0], b"INCR");
            write_integer(stream, 7);
        }
        1 => {
            assert_eq!(args[0], b"EXISTS");
            write_integer(stream, 1);
        }
        _ => {
            assert_eq!(args[0], b"DEL");
            write_integer(stream, 0);
        }
    });

    let mut session = session_with_addr(addr);
    assert_eq!(session.incr(b"counter").expect("incr"), 7);
    assert!(session.exists(b"counter").expect("exists"));
    assert!(!session.del(b"missing").expect("del"));
}

#[test]
fn info_parses_key_value_lines() {
    let addr = spawn_server(1, |_, args, stream| {
        assert_eq!(args[0], b"INFO");
        write_bulk(
            stream,
            b"# Server\r\nredis_version:7.0.0\r\n\r\nrole:master\r\n",
        );
    });

    let mut session = session_with_addr(addr);
    let info = session.info().expect("info");
    assert_eq!(info.get("redis_version").map(String::as_str), Some("7.0.0"));
    assert_eq!(info.get("role").map(String::as_str), Some("master"));
}

#[test]
fn hostnames_resolve_like_the_async_path() {
    let addr = spawn_server(1, |_, args, stream| {
        assert_eq!(args[0], b"PING");
        write_simple(stream, "PONG");
    });
    let port = addr.rsplit(':').next().expect("port");

    let mut session = session_with_addr(format!("localhost:{}", port));
    assert_eq!(session.ping().expect("ping"), "PONG");
}

#[test]
fn refused_connection_leaves_session_unconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr").to_string();
    drop(listener);

    let mut session = session_with_addr(addr);
    let result = session.ping();
    assert!(matches!(result, Err(Error::Connection(_))));
    assert!(!session.is_connected());
}

#[test]
fn fatal_read_error_invalidates_transport() {
    let addr = spawn_server(1, |_, args, stream| {
        assert_eq!(args[0], b"PING");
        write_simple(stream, "PONG");
        // server thread ends here and drops the socket
    });

    let mut session = session_with_addr(addr);
    assert_eq!(session.ping().expect("first ping"), "PONG");
    assert!(session.is_connected());

    // The peer is gone; the next cycle must fail and drop the transport.
    let result = session.ping();
    assert!(result.is_err());
    assert!(!session.is_connected());

    // The listener is gone too, so the lazy re-establish fails cleanly.
    let result = session.ping();
    assert!(matches!(result, Err(Error::Connection(_))));
}
