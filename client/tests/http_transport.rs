//! Sync over HTTP against a running `duplex-server`.

use duplex_client::{Error, HttpConfig, HttpTransport, ProgressReporter, SyncOutcome, SyncSession};
use duplex_engine::ErrorCode;
use duplex_library::{Catalog, Library};
use duplex_server::{app, AppState, Config};
use std::net::SocketAddr;

async fn spawn_server(config: Config) -> (SocketAddr, AppState) {
    let state = AppState::new(config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let router = app(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (addr, state)
}

fn session(addr: SocketAddr, replica: &str, secret: &str) -> SyncSession<Library, HttpTransport> {
    let transport = HttpTransport::new(
        HttpConfig::new(format!("http://{addr}")).with_credentials("alice", secret),
    )
    .unwrap();
    SyncSession::new(Library::new(replica), transport)
}

#[tokio::test]
async fn sync_through_the_server() {
    let (addr, state) = spawn_server(Config::new("server").with_credentials("alice", "s3cret")).await;

    let a = session(addr, "a", "s3cret");
    {
        let mut library = a.store().await;
        let ada = library.add_person("Ada").unwrap();
        library.add_book("Notes", &[ada]).unwrap();
    }

    let outcome = a.sync(&ProgressReporter::new()).await.unwrap();
    let SyncOutcome::Completed(report) = outcome else {
        panic!("unexpected conflicts");
    };
    assert_eq!(report.pushed, 2);
    assert_eq!(report.applied.inserted, 2);

    {
        let host = state.host.lock().await;
        assert_eq!(host.store().people().len(), 1);
        assert_eq!(host.store().books().len(), 1);
        assert_eq!(host.session_count(), 0);
    }

    let b = session(addr, "b", "s3cret");
    let outcome = b.sync(&ProgressReporter::new()).await.unwrap();
    assert!(outcome.is_completed());

    let library = b.store().await;
    let (book, _) = library.books().remove(0);
    assert_eq!(library.author_names(&book).unwrap(), vec!["Ada"]);
}

#[tokio::test]
async fn uncompressed_requests_work_too() {
    let (addr, state) = spawn_server(Config::new("server")).await;

    let transport =
        HttpTransport::new(HttpConfig::new(format!("http://{addr}/")).with_compression(false))
            .unwrap();
    let a = SyncSession::new(Library::new("a"), transport);
    a.store().await.add_person("Grace").unwrap();

    assert!(a.sync(&ProgressReporter::new()).await.unwrap().is_completed());
    assert_eq!(state.host.lock().await.store().people()[0].1.name, "Grace");
}

#[tokio::test]
async fn wrong_secret_is_refused() {
    let (addr, state) = spawn_server(Config::new("server").with_credentials("alice", "s3cret")).await;

    let a = session(addr, "a", "guess");
    a.store().await.add_person("Ada").unwrap();

    match a.sync(&ProgressReporter::new()).await {
        Err(Error::Remote { status, code, .. }) => {
            assert_eq!(status, 401);
            assert_eq!(code, ErrorCode::AuthenticationFailed);
        }
        other => panic!("expected an authentication failure, got {other:?}"),
    }
    assert!(state.host.lock().await.store().people().is_empty());
}
