use super::ServerReactor;
use crate::app::ServerApp;
use googletest::prelude::*;
use rift_common::config::RuntimeConfig;
use rstest::rstest;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::{Duration, Instant};

fn bound_reactor() -> (ServerApp, ServerReactor, SocketAddr) {
    let app = ServerApp::new(RuntimeConfig::default());
    let bind_addr = SocketAddr::from(([127, 0, 0, 1], 0));
    let reactor = ServerReactor::bind(bind_addr, &app).expect("bind reactor on loopback");
    let listen_addr = reactor.local_addr().expect("listener address must resolve");
    (app, reactor, listen_addr)
}

fn connected_client(listen_addr: SocketAddr) -> TcpStream {
    let client = TcpStream::connect(listen_addr).expect("client connect");
    client
        .set_nonblocking(true)
        .expect("set client nonblocking");
    client
}

fn pump_until_response(
    reactor: &mut ServerReactor,
    app: &ServerApp,
    client: &mut TcpStream,
    expected: &[u8],
) -> Vec<u8> {
    let deadline = Instant::now() + Duration::from_millis(2_000);
    let mut response = Vec::new();
    while Instant::now() < deadline {
        let _ = reactor
            .poll_once(app, Some(Duration::from_millis(5)))
            .expect("poll cycle");

        let mut chunk = [0_u8; 256];
        match client.read(&mut chunk) {
            Ok(0) => break,
            Ok(read_len) => {
                response.extend_from_slice(&chunk[..read_len]);
                if response.as_slice() == expected {
                    break;
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(error) => panic!("client read failed: {error}"),
        }
    }
    response
}

#[rstest]
fn reactor_round_trips_resp_ping() {
    let (app, mut reactor, listen_addr) = bound_reactor();
    let mut client = connected_client(listen_addr);
    client
        .write_all(b"*1\r\n$4\r\nPING\r\n")
        .expect("write ping");

    let response = pump_until_response(&mut reactor, &app, &mut client, b"+PONG\r\n");
    assert_that!(response.as_slice(), eq(&b"+PONG\r\n"[..]));
}

#[rstest]
fn worker_command_reply_arrives_after_reactor_wake() {
    let (app, mut reactor, listen_addr) = bound_reactor();
    let mut client = connected_client(listen_addr);
    client
        .write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n*2\r\n$4\r\nKEYS\r\n$1\r\n*\r\n")
        .expect("write pipeline");

    let expected = b"+OK\r\n*1\r\n$1\r\nk\r\n";
    let response = pump_until_response(&mut reactor, &app, &mut client, expected);
    assert_that!(response.as_slice(), eq(&expected[..]));
}

#[rstest]
fn partial_frame_across_socket_writes_replies_once() {
    let (app, mut reactor, listen_addr) = bound_reactor();
    let mut client = connected_client(listen_addr);

    client
        .write_all(b"*1\r\n$4\r\nPI")
        .expect("write first fragment");
    for _ in 0..5 {
        let _ = reactor
            .poll_once(&app, Some(Duration::from_millis(5)))
            .expect("poll cycle");
    }
    client
        .write_all(b"NG\r\n")
        .expect("write second fragment");

    let response = pump_until_response(&mut reactor, &app, &mut client, b"+PONG\r\n");
    assert_that!(response.as_slice(), eq(&b"+PONG\r\n"[..]));
}

#[rstest]
fn multi_transaction_round_trips_over_tcp() {
    let (app, mut reactor, listen_addr) = bound_reactor();
    let mut client = connected_client(listen_addr);
    client
        .write_all(
            b"*1\r\n$5\r\nMULTI\r\n*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n\
              *2\r\n$3\r\nGET\r\n$1\r\na\r\n*1\r\n$4\r\nEXEC\r\n",
        )
        .expect("write transaction");

    let expected = b"+OK\r\n+QUEUED\r\n+QUEUED\r\n*2\r\n+OK\r\n$1\r\n1\r\n";
    let response = pump_until_response(&mut reactor, &app, &mut client, expected);
    assert_that!(response.as_slice(), eq(&expected[..]));
}

#[rstest]
fn malformed_frame_replies_error_then_closes_socket() {
    let (app, mut reactor, listen_addr) = bound_reactor();
    let mut client = connected_client(listen_addr);
    client
        .write_all(b"*1\r\n$bad\r\nPING\r\n")
        .expect("write malformed frame");

    let deadline = Instant::now() + Duration::from_millis(2_000);
    let mut response = Vec::new();
    let mut saw_eof = false;
    while Instant::now() < deadline {
        let _ = reactor
            .poll_once(&app, Some(Duration::from_millis(5)))
            .expect("poll cycle");

        let mut chunk = [0_u8; 256];
        match client.read(&mut chunk) {
            Ok(0) => {
                saw_eof = true;
                break;
            }
            Ok(read_len) => response.extend_from_slice(&chunk[..read_len]),
            Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_error) => {
                saw_eof = true;
                break;
            }
        }
    }

    assert_that!(response.starts_with(b"-ERR "), eq(true));
    assert_that!(saw_eof, eq(true));
    assert_that!(reactor.connection_count(), eq(0_usize));
}
