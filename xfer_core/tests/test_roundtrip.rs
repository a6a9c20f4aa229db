use rand::Rng;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use xfer_core::transfer::checksum::checksum_bytes;
use xfer_core::transfer::{
    BUFFER_SIZE, ChecksumCopier, Client, FixedSpaceProbe, ServerConfig, SpaceProbe, run_server,
};
use xfer_core::{TransferError, TransferEvent};

struct TestServer {
    addr: SocketAddr,
    root: PathBuf,
    events: mpsc::Receiver<TransferEvent>,
    shutdown: CancellationToken,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn spawn_server(root: &Path, probe: Option<Arc<dyn SpaceProbe>>) -> TestServer {
    tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init()
        .ok();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (event_tx, events) = mpsc::channel(100);
    let shutdown = CancellationToken::new();

    let mut config = ServerConfig::new(root);
    if let Some(probe) = probe {
        config = config.with_space_probe(probe);
    }

    let token = shutdown.clone();
    tokio::spawn(async move {
        run_server(listener, config, event_tx, token).await.unwrap();
    });

    TestServer {
        addr,
        root: root.to_path_buf(),
        events,
        shutdown,
    }
}

async fn wait_for_event<F>(rx: &mut mpsc::Receiver<TransferEvent>, pred: F) -> TransferEvent
where
    F: Fn(&TransferEvent) -> bool,
{
    loop {
        let ev = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("Timeout waiting for server event")
            .expect("Channel closed");
        if pred(&ev) {
            return ev;
        }
    }
}

fn random_bytes(len: usize) -> Vec<u8> {
    let mut data = vec![0u8; len];
    rand::rng().fill(&mut data[..]);
    data
}

struct Dirs {
    _tmp: tempfile::TempDir,
    storage: PathBuf,
    local: PathBuf,
    downloads: PathBuf,
}

fn dirs() -> Dirs {
    let tmp = tempfile::tempdir().unwrap();
    let storage = tmp.path().join("storage");
    let local = tmp.path().join("local");
    let downloads = tmp.path().join("downloads");
    for dir in [&storage, &local, &downloads] {
        std::fs::create_dir_all(dir).unwrap();
    }
    Dirs {
        _tmp: tmp,
        storage,
        local,
        downloads,
    }
}

#[tokio::test]
async fn test_put_then_get_small_file() {
    let dirs = dirs();
    let mut server = spawn_server(&dirs.storage, None).await;
    let source = dirs.local.join("f.txt");
    std::fs::write(&source, b"abcdefghij").unwrap();
    let expected = checksum_bytes(b"abcdefghij");

    let mut client = Client::connect(server.addr).await.unwrap();
    let put = client.put(&source).await.unwrap();
    assert_eq!(put.file_name, "f.txt");
    assert_eq!(put.size, 10);
    assert_eq!(put.checksum, expected);
    assert_eq!(
        std::fs::read(server.root.join("f.txt")).unwrap(),
        b"abcdefghij"
    );

    let get = client.get("f.txt", &dirs.downloads).await.unwrap();
    assert!(get.verified);
    assert_eq!(get.size, 10);
    assert_eq!(get.received_checksum, expected);
    assert_eq!(get.source_checksum, expected.to_vec());
    assert_eq!(get.path, dirs.downloads.join("f.txt"));
    assert_eq!(std::fs::read(&get.path).unwrap(), b"abcdefghij");

    let stored = wait_for_event(&mut server.events, |ev| {
        matches!(ev, TransferEvent::StorageCompleted { .. })
    })
    .await;
    assert_eq!(
        stored,
        TransferEvent::StorageCompleted {
            file_name: "f.txt".to_string(),
            size: 10,
            verified: true,
        }
    );
    wait_for_event(&mut server.events, |ev| {
        matches!(ev, TransferEvent::RetrievalCompleted { size: 10, .. })
    })
    .await;

    client.close().await.unwrap();
    wait_for_event(&mut server.events, |ev| {
        matches!(ev, TransferEvent::ConnectionClosed { .. })
    })
    .await;
}

#[tokio::test]
async fn test_zero_byte_file() {
    let dirs = dirs();
    let server = spawn_server(&dirs.storage, None).await;
    let source = dirs.local.join("empty.bin");
    std::fs::write(&source, b"").unwrap();

    let mut client = Client::connect(server.addr).await.unwrap();
    let put = client.put(&source).await.unwrap();
    assert_eq!(put.size, 0);
    assert_eq!(put.checksum, checksum_bytes(b""));
    assert_eq!(std::fs::metadata(server.root.join("empty.bin")).unwrap().len(), 0);

    let get = client.get("empty.bin", &dirs.downloads).await.unwrap();
    assert!(get.verified);
    assert_eq!(std::fs::read(&get.path).unwrap(), b"");
}

#[tokio::test]
async fn test_sizes_around_buffer_boundary() {
    let dirs = dirs();
    let server = spawn_server(&dirs.storage, None).await;
    let mut client = Client::connect(server.addr).await.unwrap();

    for size in [BUFFER_SIZE - 1, BUFFER_SIZE, BUFFER_SIZE + 1, 2 * BUFFER_SIZE] {
        let name = format!("boundary_{}.bin", size);
        let data = random_bytes(size);
        let source = dirs.local.join(&name);
        std::fs::write(&source, &data).unwrap();

        let put = client.put(&source).await.unwrap();
        assert_eq!(put.checksum, checksum_bytes(&data), "size {}", size);

        let get = client.get(&name, &dirs.downloads).await.unwrap();
        assert!(get.verified, "size {}", size);
        assert_eq!(get.received_checksum, put.checksum);
        assert_eq!(std::fs::read(&get.path).unwrap(), data, "size {}", size);
    }
}

#[tokio::test]
async fn test_client_with_small_copy_buffer() {
    let dirs = dirs();
    let server = spawn_server(&dirs.storage, None).await;
    let data = random_bytes(7 * 13 + 1);
    let source = dirs.local.join("odd.bin");
    std::fs::write(&source, &data).unwrap();

    let mut client = Client::connect(server.addr)
        .await
        .unwrap()
        .with_copier(ChecksumCopier::with_buffer_size(7));

    let put = client.put(&source).await.unwrap();
    let get = client.get("odd.bin", &dirs.downloads).await.unwrap();
    assert!(get.verified);
    assert_eq!(get.received_checksum, put.checksum);
    assert_eq!(std::fs::read(&get.path).unwrap(), data);
}

#[tokio::test]
async fn test_duplicate_put_rejected_and_connection_survives() {
    let dirs = dirs();
    let server = spawn_server(&dirs.storage, None).await;
    let source = dirs.local.join("dup.txt");
    std::fs::write(&source, b"first").unwrap();

    let mut client = Client::connect(server.addr).await.unwrap();
    client.put(&source).await.unwrap();

    std::fs::write(&source, b"second version").unwrap();
    match client.put(&source).await {
        Err(TransferError::Rejected(reason)) => {
            assert!(reason.to_lowercase().contains("exists"), "{}", reason)
        }
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(client.is_usable());
    assert_eq!(std::fs::read(server.root.join("dup.txt")).unwrap(), b"first");

    let get = client.get("dup.txt", &dirs.downloads).await.unwrap();
    assert!(get.verified);
    assert_eq!(std::fs::read(&get.path).unwrap(), b"first");
}

#[tokio::test]
async fn test_get_missing_file_rejected() {
    let dirs = dirs();
    let mut server = spawn_server(&dirs.storage, None).await;
    let mut client = Client::connect(server.addr).await.unwrap();

    let err = client.get("nothing.here", &dirs.downloads).await.unwrap_err();
    assert!(matches!(err, TransferError::Rejected(_)), "{:?}", err);
    assert!(client.is_usable());
    assert!(!dirs.downloads.join("nothing.here").exists());

    wait_for_event(&mut server.events, |ev| {
        matches!(ev, TransferEvent::RetrievalRejected { file_name, .. } if file_name == "nothing.here")
    })
    .await;

    let source = dirs.local.join("after.txt");
    std::fs::write(&source, b"still works").unwrap();
    client.put(&source).await.unwrap();
}

#[tokio::test]
async fn test_get_refuses_existing_local_file() {
    let dirs = dirs();
    let server = spawn_server(&dirs.storage, None).await;
    std::fs::write(server.root.join("taken.txt"), b"remote").unwrap();
    std::fs::write(dirs.downloads.join("taken.txt"), b"local").unwrap();

    let mut client = Client::connect(server.addr).await.unwrap();
    let err = client.get("taken.txt", &dirs.downloads).await.unwrap_err();
    match err {
        TransferError::Io(e) => assert_eq!(e.kind(), ErrorKind::AlreadyExists),
        other => panic!("expected AlreadyExists, got {:?}", other),
    }
    assert_eq!(
        std::fs::read(dirs.downloads.join("taken.txt")).unwrap(),
        b"local"
    );

    assert!(!client.is_usable());
    assert!(matches!(
        client.get("taken.txt", &dirs.downloads).await,
        Err(TransferError::ConnectionPoisoned)
    ));
}

#[tokio::test]
async fn test_client_rejects_download_without_space() {
    let dirs = dirs();
    let server = spawn_server(&dirs.storage, None).await;
    std::fs::write(server.root.join("big.bin"), vec![1u8; 10]).unwrap();

    let mut client = Client::connect(server.addr)
        .await
        .unwrap()
        .with_space_probe(Arc::new(FixedSpaceProbe(Some(9))));

    let err = client.get("big.bin", &dirs.downloads).await.unwrap_err();
    assert!(matches!(
        err,
        TransferError::InsufficientSpace {
            needed: 10,
            available: 9
        }
    ));
    assert!(!dirs.downloads.join("big.bin").exists());
    assert!(!client.is_usable());
}

#[tokio::test]
async fn test_server_rejects_upload_without_space() {
    let dirs = dirs();
    let mut server = spawn_server(&dirs.storage, Some(Arc::new(FixedSpaceProbe(Some(5))))).await;
    let big = dirs.local.join("big.txt");
    let small = dirs.local.join("small.txt");
    std::fs::write(&big, b"0123456789").unwrap();
    std::fs::write(&small, b"01234").unwrap();

    let mut client = Client::connect(server.addr).await.unwrap();
    match client.put(&big).await {
        Err(TransferError::Rejected(reason)) => assert_eq!(reason, "insufficient space"),
        other => panic!("expected rejection, got {:?}", other),
    }
    assert!(!server.root.join("big.txt").exists());

    wait_for_event(&mut server.events, |ev| {
        matches!(ev, TransferEvent::StorageRejected { .. })
    })
    .await;

    // Same connection, still in sync
    client.put(&small).await.unwrap();
    assert_eq!(std::fs::read(server.root.join("small.txt")).unwrap(), b"01234");
}

#[tokio::test]
async fn test_put_sends_bare_name() {
    let dirs = dirs();
    let server = spawn_server(&dirs.storage, None).await;
    let nested = dirs.local.join("a").join("b");
    std::fs::create_dir_all(&nested).unwrap();
    let source = nested.join("deep.txt");
    std::fs::write(&source, b"deep").unwrap();

    let mut client = Client::connect(server.addr).await.unwrap();
    let put = client.put(&source).await.unwrap();

    assert_eq!(put.file_name, "deep.txt");
    assert_eq!(std::fs::read(server.root.join("deep.txt")).unwrap(), b"deep");
}

#[tokio::test]
async fn test_put_missing_local_file_keeps_connection() {
    let dirs = dirs();
    let server = spawn_server(&dirs.storage, None).await;
    let mut client = Client::connect(server.addr).await.unwrap();

    let err = client.put(&dirs.local.join("ghost.txt")).await.unwrap_err();
    assert!(matches!(err, TransferError::Io(ref e) if e.kind() == ErrorKind::NotFound));
    assert!(client.is_usable());
}

#[cfg(unix)]
#[tokio::test]
async fn test_put_directory_refused_before_announcing() {
    let dirs = dirs();
    let server = spawn_server(&dirs.storage, None).await;
    let local_dir = dirs.local.join("adir");
    std::fs::create_dir(&local_dir).unwrap();

    let mut client = Client::connect(server.addr).await.unwrap();
    let err = client.put(&local_dir).await.unwrap_err();
    assert!(matches!(err, TransferError::NotAFile(_)), "got {:?}", err);
    assert!(client.is_usable());
    assert!(!server.root.join("adir").exists(), "no placeholder on the server");

    // The same connection and a second client can still use the name
    let file = dirs.local.join("adir.bin");
    std::fs::write(&file, b"payload").unwrap();
    client.put(&file).await.unwrap();

    let mut other = Client::connect(server.addr).await.unwrap();
    std::fs::remove_dir(&local_dir).unwrap();
    std::fs::write(&local_dir, b"now a file").unwrap();
    let outcome = other.put(&local_dir).await.unwrap();
    assert_eq!(outcome.size, 10);
    assert_eq!(std::fs::read(server.root.join("adir")).unwrap(), b"now a file");
}
