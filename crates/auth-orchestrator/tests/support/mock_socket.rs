use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use auth_orchestrator::error::{AuthError, AuthResult};
use auth_orchestrator::hub::{WsConnector, WsLink};
use auth_orchestrator::ChannelName;
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const STEP_TIMEOUT: Duration = Duration::from_secs(3);

/// Server side of one accepted mock connection.
pub struct MockSocket {
    pub channel: ChannelName,
    pub url: String,
    from_client: mpsc::Receiver<String>,
    to_client: Option<mpsc::Sender<String>>,
}

impl MockSocket {
    /// Next text the client sent.
    pub async fn recv(&mut self) -> String {
        timeout(STEP_TIMEOUT, self.from_client.recv())
            .await
            .expect("timed out waiting for client message")
            .expect("client closed the socket")
    }

    /// Whether the client has hung up, waiting up to `wait`.
    pub async fn client_closed(&mut self, wait: Duration) -> bool {
        loop {
            match timeout(wait, self.from_client.recv()).await {
                Ok(None) => return true,
                Ok(Some(_)) => {}
                Err(_) => return false,
            }
        }
    }

    pub async fn push(&self, text: &str) {
        if let Some(tx) = &self.to_client {
            tx.send(text.to_string())
                .await
                .expect("client stopped reading");
        }
    }

    /// Simulate the server dropping the connection.
    pub fn close(&mut self) {
        self.to_client = None;
    }
}

/// [`WsConnector`] handing every accepted link to the test.
pub struct MockConnector {
    attempts: AtomicUsize,
    refuse: AtomicBool,
    dead_links: AtomicUsize,
    urls: Mutex<Vec<String>>,
    accepted: mpsc::UnboundedSender<MockSocket>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockSocket>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        (
            Self {
                attempts: AtomicUsize::new(0),
                refuse: AtomicBool::new(false),
                dead_links: AtomicUsize::new(0),
                urls: Mutex::new(Vec::new()),
                accepted,
            },
            rx,
        )
    }

    pub fn refusing() -> (Self, mpsc::UnboundedReceiver<MockSocket>) {
        let (connector, rx) = Self::new();
        connector.set_refuse(true);
        (connector, rx)
    }

    pub fn set_refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Hand out the next `count` links with the server end already gone.
    pub fn hang_up_next(&self, count: usize) {
        self.dead_links.store(count, Ordering::SeqCst);
    }

    fn take_dead_link(&self) -> bool {
        self.dead_links
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl WsConnector for MockConnector {
    async fn connect(&self, channel: ChannelName, url: &str) -> AuthResult<WsLink> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());

        if self.refuse.load(Ordering::SeqCst) {
            return Err(AuthError::ConnectionFailed {
                url: url.to_string(),
                reason: "connection refused".into(),
            });
        }

        let (link, from_client, to_client) = WsLink::pair();
        if self.take_dead_link() {
            drop((from_client, to_client));
            return Ok(link);
        }
        let _ = self.accepted.send(MockSocket {
            channel,
            url: url.to_string(),
            from_client,
            to_client: Some(to_client),
        });
        Ok(link)
    }
}

/// Wait for the next accepted socket.
pub async fn accept(rx: &mut mpsc::UnboundedReceiver<MockSocket>) -> MockSocket {
    timeout(STEP_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for connection")
        .expect("connector dropped")
}
