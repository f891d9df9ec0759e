//! End-to-end file transfers over the stream transport on loopback.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use byteferry::client::ClientError;
use byteferry::server::ServerError;
use byteferry::{CancelSource, FileClient, FileServer, TransportKind};

fn utf8(path: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path.to_path_buf()).unwrap()
}

async fn free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn connect_retry(addr: &str) -> TcpStream {
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server did not start listening on {addr}");
}

struct Fixture {
    server: Arc<FileServer>,
    handle: tokio::task::JoinHandle<Result<(), ServerError>>,
    addr: String,
    store: tempfile::TempDir,
    output: tempfile::TempDir,
    // Dropping the source would stop the server mid-test.
    _source: CancelSource,
}

async fn start_server_in(store: tempfile::TempDir, store_dir: &Path) -> Fixture {
    let _ = tracing_subscriber::fmt::try_init();

    let output = tempfile::tempdir().unwrap();
    let port = free_port().await;
    let addr = format!("127.0.0.1:{port}");
    let server = Arc::new(FileServer::new(utf8(store_dir)));
    let source = CancelSource::new();
    let handle = tokio::spawn({
        let server = Arc::clone(&server);
        let addr = addr.clone();
        let token = source.token();
        async move { server.start(TransportKind::Stream, &addr, token).await }
    });

    Fixture {
        server,
        handle,
        addr,
        store,
        output,
        _source: source,
    }
}

async fn start_server() -> Fixture {
    let store = tempfile::tempdir().unwrap();
    let store_dir = store.path().to_path_buf();
    start_server_in(store, &store_dir).await
}

async fn fetch(fixture: &Fixture, name: &str) -> Result<u64, ClientError> {
    let client = FileClient::new(utf8(fixture.output.path()));
    let source = CancelSource::new();
    let mut attempts = 0;
    loop {
        match client
            .start(TransportKind::Stream, &fixture.addr, name, source.token())
            .await
        {
            Err(ClientError::Dial(_)) if attempts < 50 => {
                attempts += 1;
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
            result => return result,
        }
    }
}

#[tokio::test]
async fn transfers_are_byte_identical() {
    let fixture = start_server().await;

    let large: Vec<u8> = (0..300_000usize).map(|i| (i % 251) as u8).collect();
    let cases: [(&str, &[u8]); 3] = [
        ("empty.bin", b""),
        ("sample.txt", b"hello world!\n"),
        ("large.bin", &large),
    ];

    for (name, contents) in cases {
        std::fs::write(fixture.store.path().join(name), contents).unwrap();
        let bytes = fetch(&fixture, name).await.unwrap();
        assert_eq!(bytes, contents.len() as u64, "byte count for {name}");
        let received = std::fs::read(fixture.output.path().join(name)).unwrap();
        assert_eq!(received, contents, "contents differ for {name}");
    }

    fixture.server.stop();
    fixture.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn size_prefix_is_little_endian_on_the_wire() {
    let fixture = start_server().await;
    std::fs::write(fixture.store.path().join("sample.txt"), b"hello world!\n").unwrap();

    // Speak the protocol by hand to pin the wire format.
    let mut stream = connect_retry(&fixture.addr).await;
    stream
        .write_all(br#"{"FileName":"sample.txt"}"#)
        .await
        .unwrap();

    let mut prefix = [0u8; 8];
    stream.read_exact(&mut prefix).await.unwrap();
    assert_eq!(i64::from_le_bytes(prefix), 13);

    let mut body = vec![0u8; 13];
    stream.read_exact(&mut body).await.unwrap();
    assert_eq!(body, b"hello world!\n");

    // The server closes after the payload; nothing else follows.
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());

    fixture.server.stop();
    fixture.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn traversal_names_fail_cleanly() {
    let base = tempfile::tempdir().unwrap();
    let store_dir = base.path().join("store");
    std::fs::create_dir(&store_dir).unwrap();
    std::fs::write(base.path().join("secret.txt"), b"top secret").unwrap();
    let fixture = start_server_in(base, &store_dir).await;

    for name in ["../secret.txt", "a/../../secret.txt", ".."] {
        let result = tokio::time::timeout(Duration::from_secs(5), fetch(&fixture, name))
            .await
            .expect("request must not hang");
        assert!(
            matches!(result, Err(ClientError::Size(_))),
            "expected a clean failure for {name:?}"
        );
    }
    // The secret never reached the output directory.
    assert!(!fixture.output.path().join("secret.txt").exists());

    fixture.server.stop();
    fixture.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn missing_file_fails_cleanly() {
    let fixture = start_server().await;

    let result = tokio::time::timeout(Duration::from_secs(5), fetch(&fixture, "nope.txt"))
        .await
        .expect("request must not hang");
    assert!(matches!(result, Err(ClientError::Size(_))));
    assert!(!fixture.output.path().join("nope.txt").exists());

    fixture.server.stop();
    fixture.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn dial_to_absent_server_fails() {
    let port = free_port().await;
    let output = tempfile::tempdir().unwrap();
    let client = FileClient::new(utf8(output.path()));
    let source = CancelSource::new();

    let result = client
        .start(
            TransportKind::Stream,
            &format!("127.0.0.1:{port}"),
            "sample.txt",
            source.token(),
        )
        .await;
    assert!(matches!(result, Err(ClientError::Dial(_))));
}
