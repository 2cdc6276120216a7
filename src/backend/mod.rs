//! HTTP clients for the two text-generation backends

pub mod cloud;
pub(crate) mod http;
pub mod local;

pub use cloud::CloudClient;
pub use local::{select_model, LocalClient};

#[cfg(test)]
pub(crate) mod test_support {
    use axum::Router;
    use serde_json::Value;
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use tokio::task::JoinHandle;
    use url::Url;

    /// Request bodies seen by a stub handler
    #[derive(Clone, Default)]
    pub struct Hits(Arc<Mutex<Vec<Value>>>);

    impl Hits {
        pub fn record(&self, body: Value) {
            self.0.lock().unwrap().push(body);
        }

        pub fn count(&self) -> usize {
            self.0.lock().unwrap().len()
        }

        pub fn last(&self) -> Option<Value> {
            self.0.lock().unwrap().last().cloned()
        }
    }

    /// An axum app served on an ephemeral loopback port for one test
    pub struct StubServer {
        addr: SocketAddr,
        pub hits: Hits,
        handle: JoinHandle<()>,
    }

    impl StubServer {
        pub async fn start<F>(build: F) -> Self
        where
            F: FnOnce(Hits) -> Router,
        {
            let hits = Hits::default();
            let app = build(hits.clone());
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            let handle = tokio::spawn(async move {
                let _ = axum::serve(listener, app).await;
            });
            Self { addr, hits, handle }
        }

        pub fn url(&self) -> Url {
            Url::parse(&format!("http://{}", self.addr)).unwrap()
        }
    }

    impl Drop for StubServer {
        fn drop(&mut self) {
            self.handle.abort();
        }
    }

    /// A loopback URL with nothing listening behind it
    pub fn refused_endpoint() -> Url {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap()
    }
}
