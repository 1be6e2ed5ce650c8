use crate::common::mock_oauth::{self, MockOAuthState, MockUser};
use clap::Parser;
use queue_coordinator::{start_server, Options};
use tokio::sync::{broadcast, oneshot, Mutex, MutexGuard, OnceCell};
use url::Url;

fn test_options() -> Options {
    test_options_with(&[])
}

fn test_options_with(extra: &[&str]) -> Options {
    let mut args = vec![
        "queue-coordinator".to_owned(),
        "--server".to_owned(),
        "http://127.0.0.1:3100/".to_owned(),
        "--app-base-url".to_owned(),
        "http://127.0.0.1:3100/".to_owned(),
        "--allowed-origins".to_owned(),
        "http://127.0.0.1:3100".to_owned(),
        "--admin-emails".to_owned(),
        "admin@example.com".to_owned(),
        "--database-url".to_owned(),
        "sqlite::memory:".to_owned(),
        "--host-cookie-secret".to_owned(),
        "test-host-cookie-secret".to_owned(),
        "--gh-auth-url".to_owned(),
        "http://127.0.0.1:3101/github/authorize".to_owned(),
        "--gh-token-url".to_owned(),
        "http://127.0.0.1:3101/github/token".to_owned(),
        "--gh-userinfo-url".to_owned(),
        "http://127.0.0.1:3101/github/userinfo".to_owned(),
        "--gh-client-id".to_owned(),
        "test-gh-client-id".to_owned(),
        "--gh-client-secret".to_owned(),
        "test-gh-client-secret".to_owned(),
        "--google-auth-url".to_owned(),
        "http://127.0.0.1:3101/google/authorize".to_owned(),
        "--google-token-url".to_owned(),
        "http://127.0.0.1:3101/google/token".to_owned(),
        "--google-userinfo-url".to_owned(),
        "http://127.0.0.1:3101/google/userinfo".to_owned(),
        "--google-client-id".to_owned(),
        "test-google-client-id".to_owned(),
        "--google-client-secret".to_owned(),
        "test-google-client-secret".to_owned(),
    ];
    args.extend(extra.iter().map(|s| (*s).to_owned()));
    Options::parse_from(args)
}

/// Spawns the full app server plus a mock GitHub/Google OAuth backend on
/// fixed loopback ports for the duration of one test, serialized against
/// every other test in the binary by a process-wide lock since the ports
/// are not dynamically chosen.
pub struct Harness {
    pub options: Options,
    pub oauth_state: MockOAuthState,
    app_shutdown: broadcast::Sender<()>,
    oauth_shutdown: broadcast::Sender<()>,
    #[allow(dead_code)]
    lock: MutexGuard<'static, ()>,
    app_handle: Option<tokio::task::JoinHandle<()>>,
    oauth_handle: Option<tokio::task::JoinHandle<()>>,
}

static SERVER_LOCK: OnceCell<Mutex<()>> = OnceCell::const_new();

async fn server_lock() -> &'static Mutex<()> {
    SERVER_LOCK.get_or_init(|| async { Mutex::new(()) }).await
}

impl Harness {
    pub fn app_path(&self, path: &str) -> Url {
        self.options.server.join(path).expect("must be a valid path")
    }

    pub async fn register_github_user(&self, display_name: &str, email: Option<&str>) -> (String, MockUser) {
        let user = MockUser {
            provider_id: rand_id(),
            display_name: display_name.to_owned(),
            email: email.map(str::to_owned),
        };
        let code = self.oauth_state.register_github_user(user.clone()).await;
        (code, user)
    }

    pub async fn register_google_user(&self, display_name: &str, email: Option<&str>) -> (String, MockUser) {
        let user = MockUser {
            provider_id: rand_id(),
            display_name: display_name.to_owned(),
            email: email.map(str::to_owned),
        };
        let code = self.oauth_state.register_google_user(user.clone()).await;
        (code, user)
    }

    pub async fn run() -> Harness {
        let lock = server_lock().await.lock().await;
        Self::run_with_options(lock, test_options()).await
    }

    /// Shrinks the call window so a no_show transition can be exercised
    /// without sleeping through the default 120s timeout.
    pub async fn run_with_call_window_secs(secs: i64) -> Harness {
        let lock = server_lock().await.lock().await;
        let options = test_options_with(&["--call-window-secs", &secs.to_string()]);
        Self::run_with_options(lock, options).await
    }

    async fn run_with_options(lock: MutexGuard<'static, ()>, options: Options) -> Harness {
        let oauth_state = MockOAuthState::default();

        let (app_shutdown, _) = broadcast::channel::<()>(1);
        let (oauth_shutdown, _) = broadcast::channel::<()>(1);

        let mut harness = Harness {
            options,
            oauth_state,
            app_shutdown,
            oauth_shutdown,
            lock,
            app_handle: None,
            oauth_handle: None,
        };
        harness.start_oauth().await;
        harness.start_app().await;
        harness
    }

    async fn start_app(&mut self) {
        let options = self.options.clone();
        let mut shutdown_rx = self.app_shutdown.subscribe();
        let (ready_tx, ready_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let server = start_server(options).await.expect("app server must start");
            ready_tx.send(()).unwrap();
            server
                .with_graceful_shutdown(async move { shutdown_rx.recv().await.unwrap() })
                .await
                .unwrap();
        });
        ready_rx.await.unwrap();
        self.app_handle = Some(handle);
    }

    async fn start_oauth(&mut self) {
        let state = self.oauth_state.clone();
        let mut shutdown_rx = self.oauth_shutdown.subscribe();
        let (ready_tx, ready_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let server = mock_oauth::start("127.0.0.1:3101".parse().unwrap(), state);
            ready_tx.send(()).unwrap();
            server
                .with_graceful_shutdown(async move { shutdown_rx.recv().await.unwrap() })
                .await
                .unwrap();
        });
        ready_rx.await.unwrap();
        self.oauth_handle = Some(handle);
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.app_shutdown.send(());
        let _ = self.oauth_shutdown.send(());
    }
}

fn rand_id() -> String {
    use rand::Rng;
    rand::thread_rng().gen_range(1..u64::MAX).to_string()
}
