use std::net::{SocketAddr, TcpListener};

use fibrio::{connect, CorkState, Runtime, Transceiver};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};

fn client_socket() -> Socket {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).unwrap();
    socket.set_nonblocking(true).unwrap();
    socket
}

/// Accept the pending connection and return it as a nonblocking socket.
fn accept(listener: &TcpListener) -> Socket {
    let (stream, _) = listener.accept().unwrap();
    stream.set_nonblocking(true).unwrap();
    Socket::from(stream)
}

#[test]
fn connect_then_echo() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut client = Transceiver::new(client_socket());
        let errno = connect(&client, |s| s.connect(&SockAddr::from(addr)))
            .await
            .unwrap();
        assert!(
            errno == 0 || errno == libc::EINPROGRESS,
            "unexpected errno {errno}"
        );

        let mut server = Transceiver::new(accept(&listener));

        client.write(b"ping").await.unwrap();
        client.flush().await.unwrap();

        let mut buf = [0u8; 4];
        server.read(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        server.write(b"pong").await.unwrap();
        server.flush().await.unwrap();

        client.read(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong");
    });
}

#[test]
fn corked_writes_flush_as_one_unit() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut client = Transceiver::new(client_socket());
        connect(&client, |s| s.connect(&SockAddr::from(addr)))
            .await
            .unwrap();
        let mut server = Transceiver::new(accept(&listener));

        client.write(b"AB").await.unwrap();
        assert_eq!(client.cork_state(), CorkState::Enabled);
        client.write(b"CD").await.unwrap();
        client.flush().await.unwrap();

        // Both writes arrive together once the cork is toggled.
        let mut buf = [0u8; 4];
        server.read(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ABCD");
    });
}

#[test]
fn connect_to_dead_port_fails_and_resets() {
    // Bind then immediately drop, so the port is known to be closed.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut client = Transceiver::new(client_socket());
        let err = connect(&client, |s| s.connect(&SockAddr::from(addr)))
            .await
            .unwrap_err();
        assert!(
            err.to_string().contains("establishing connection"),
            "got {err}"
        );
        assert_eq!(err.raw_os_error(), Some(libc::ECONNREFUSED));

        // A failed transceiver resets without complaint.
        client.reset();
        assert!(!client.is_registered());
        assert_eq!(client.cork_state(), CorkState::Unknown);
        assert_eq!(client.prefetched(), 0);
    });
}

#[test]
fn peer_close_ends_the_flow() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();

    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let mut client = Transceiver::new(client_socket());
        connect(&client, |s| s.connect(&SockAddr::from(addr)))
            .await
            .unwrap();
        let mut server = Transceiver::new(accept(&listener));

        client.write(b"bye").await.unwrap();
        client.flush().await.unwrap();
        drop(client);

        // Pending bytes drain before the hangup surfaces.
        let mut buf = [0u8; 3];
        server.read(&mut buf).await.unwrap();
        assert_eq!(&buf, b"bye");

        let err = server.read(&mut buf).await.unwrap_err();
        assert!(err.is_warning(), "got {err}");
    });
}
