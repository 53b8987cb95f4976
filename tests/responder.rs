use std::{
    io::{self, Read, Write},
    net::{Shutdown as NetShutdown, SocketAddr, TcpStream},
    sync::mpsc,
    thread,
    time::Duration,
};

use canned_responder::{Backend, Server, ServerConfig, ServerError, ServerHandle, CANNED_RESPONSE};
use rand::RngCore;
use socket2::SockRef;

const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn backends() -> Vec<Backend> {
    let mut backends = vec![Backend::Tokio];
    if canned_responder::io_uring_supported() {
        backends.push(Backend::IoUring);
    } else {
        eprintln!("io_uring not available, only testing the tokio backend");
    }
    backends
}

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().unwrap()
}

fn start_with(config: ServerConfig) -> ServerHandle {
    Server::bind(config.with_addr(loopback()))
        .expect("bind")
        .spawn()
        .expect("spawn")
}

fn start(backend: Backend) -> ServerHandle {
    start_with(ServerConfig::default().with_backend(backend).with_workers(2))
}

fn stop(handle: ServerHandle) {
    handle.shutdown().expect("shutdown");
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || tx.send(handle.join()));
    rx.recv_timeout(IO_TIMEOUT * 2)
        .expect("server did not stop in time")
        .expect("server failed");
}

fn connect(handle: &ServerHandle) -> TcpStream {
    let stream = TcpStream::connect(handle.local_addr()).expect("connect");
    stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
    stream
}

fn read_response(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = vec![0u8; CANNED_RESPONSE.len()];
    stream.read_exact(&mut buf).expect("read response");
    buf
}

/// The server neither sent more bytes nor closed its side.
fn assert_still_open(stream: &mut TcpStream) {
    stream.set_read_timeout(Some(Duration::from_millis(200))).unwrap();
    let mut buf = [0u8; 16];
    match stream.read(&mut buf) {
        Err(err) if matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => (),
        Ok(0) => panic!("server closed the connection"),
        Ok(n) => panic!("server sent {n} unexpected bytes"),
        Err(err) => panic!("connection failed: {err}"),
    }
    stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
}

#[test]
fn silent_client_gets_exact_response() {
    for backend in backends() {
        let handle = start(backend);

        let mut client = connect(&handle);
        assert_eq!(read_response(&mut client), CANNED_RESPONSE, "{backend}");
        assert_still_open(&mut client);

        drop(client);
        stop(handle);
    }
}

#[test]
fn request_line_is_not_parsed() {
    for backend in backends() {
        let handle = start(backend);

        let mut client = connect(&handle);
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(read_response(&mut client), CANNED_RESPONSE, "{backend}");
        assert_still_open(&mut client);

        drop(client);
        stop(handle);
    }
}

#[test]
fn partial_and_malformed_input_is_ignored() {
    let mut garbage = vec![0u8; 64 * 1024];
    rand::thread_rng().fill_bytes(&mut garbage);

    for backend in backends() {
        let handle = start(backend);

        let mut partial = connect(&handle);
        partial.write_all(b"GET / HT").unwrap();
        assert_eq!(read_response(&mut partial), CANNED_RESPONSE, "{backend}");
        assert_still_open(&mut partial);

        let mut malformed = connect(&handle);
        malformed.write_all(&garbage).unwrap();
        assert_eq!(read_response(&mut malformed), CANNED_RESPONSE, "{backend}");
        // more input after the response changes nothing either
        malformed.write_all(&garbage[..1024]).unwrap();
        assert_still_open(&mut malformed);

        drop((partial, malformed));
        stop(handle);
    }
}

#[test]
fn half_closed_client_still_gets_response() {
    for backend in backends() {
        let handle = start(backend);

        let mut client = connect(&handle);
        client.shutdown(NetShutdown::Write).unwrap();
        assert_eq!(read_response(&mut client), CANNED_RESPONSE, "{backend}");

        drop(client);
        stop(handle);
    }
}

#[test]
fn keeps_accepting_after_connection_errors() {
    for backend in backends() {
        let handle = start(backend);

        for _ in 0..20 {
            let client = TcpStream::connect(handle.local_addr()).unwrap();
            // close with RST, possibly before the response was written
            SockRef::from(&client).set_linger(Some(Duration::ZERO)).unwrap();
            drop(client);
        }

        let mut client = connect(&handle);
        assert_eq!(read_response(&mut client), CANNED_RESPONSE, "{backend}");

        drop(client);
        stop(handle);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hundred_concurrent_clients_get_identical_responses() {
    use tokio::io::AsyncReadExt;

    for backend in backends() {
        let handle = start(backend);
        let addr = handle.local_addr();

        let clients = (0..100).map(|_| async move {
            let mut stream = tokio::net::TcpStream::connect(addr).await?;
            let mut buf = vec![0u8; CANNED_RESPONSE.len()];
            tokio::time::timeout(IO_TIMEOUT, stream.read_exact(&mut buf)).await??;
            anyhow::Ok((stream, buf))
        });
        let responses = futures::future::join_all(clients).await;

        assert_eq!(responses.len(), 100);
        for response in responses {
            let (_stream, buf) = response.expect("client failed");
            assert_eq!(buf, CANNED_RESPONSE, "{backend}");
        }

        tokio::task::spawn_blocking(move || stop(handle)).await.unwrap();
    }
}

#[test]
fn shutdown_with_open_connections() {
    for backend in backends() {
        let handle = start(backend);

        let mut clients: Vec<TcpStream> = (0..5).map(|_| connect(&handle)).collect();
        for client in clients.iter_mut() {
            assert_eq!(read_response(client), CANNED_RESPONSE, "{backend}");
        }

        stop(handle);
        drop(clients);
    }
}

#[test]
fn address_in_use_fails_to_bind() {
    for backend in backends() {
        let handle = start(backend);

        let config = ServerConfig::default()
            .with_addr(handle.local_addr())
            .with_backend(backend);
        let err = Server::bind(config).unwrap_err();
        match err {
            ServerError::Bind { addr, source } => {
                assert_eq!(addr, handle.local_addr());
                assert_eq!(source.kind(), io::ErrorKind::AddrInUse);
            }
            other => panic!("unexpected error: {other}"),
        }

        stop(handle);
    }
}

#[test]
fn full_slot_table_queues_new_clients_until_a_peer_leaves() {
    if !canned_responder::io_uring_supported() {
        eprintln!("io_uring not available, skipping");
        return;
    }
    let handle = start_with(
        ServerConfig::default()
            .with_backend(Backend::IoUring)
            .with_workers(1)
            .with_max_connections(1),
    );

    let mut holder = connect(&handle);
    assert_eq!(read_response(&mut holder), CANNED_RESPONSE);

    // no free slot: the client waits in the listen backlog, neither served
    // nor closed
    let mut waiting = connect(&handle);
    assert_still_open(&mut waiting);

    // once the holder closes, its slot is released and the waiting client
    // is served on the same connection
    drop(holder);
    assert_eq!(read_response(&mut waiting), CANNED_RESPONSE);
    assert_still_open(&mut waiting);

    drop(waiting);
    stop(handle);
}

#[test]
fn zero_max_connections_set_directly_still_serves() {
    for backend in backends() {
        let config = ServerConfig {
            backend,
            workers: 1,
            max_connections: 0,
            ..ServerConfig::default()
        };
        let handle = start_with(config);

        let mut client = connect(&handle);
        assert_eq!(read_response(&mut client), CANNED_RESPONSE, "{backend}");

        drop(client);
        stop(handle);
    }
}

#[test]
fn repeated_shutdown_is_harmless() {
    for backend in backends() {
        let handle = start(backend);
        handle.shutdown_signal().trigger().unwrap();
        handle.shutdown().expect("second shutdown");
        stop(handle);
    }
}
