use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

pub const STEP_TIMEOUT: Duration = Duration::from_secs(3);

enum ConnectionCommand {
    SendText(String),
    ForceClose,
}

pub struct MockWsConnection {
    index: usize,
    /// Request path and query the client connected with.
    uri: String,
    text_rx: mpsc::Receiver<String>,
    command_tx: mpsc::Sender<ConnectionCommand>,
}

impl MockWsConnection {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub async fn recv_text(&mut self) -> String {
        timeout(STEP_TIMEOUT, self.text_rx.recv())
            .await
            .expect("timed out waiting for client text")
            .expect("mock connection text channel closed")
    }

    pub async fn send_text(&self, text: &str) {
        self.command_tx
            .send(ConnectionCommand::SendText(text.to_string()))
            .await
            .expect("failed to send command to mock connection");
    }

    pub async fn force_close(&self) {
        let _ = self.command_tx.send(ConnectionCommand::ForceClose).await;
    }
}

pub struct MockWsServer {
    addr: SocketAddr,
    connection_rx: mpsc::Receiver<MockWsConnection>,
    server_task: JoinHandle<()>,
}

impl MockWsServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await?;
        let addr = listener.local_addr()?;
        let (connection_tx, connection_rx) = mpsc::channel(16);
        let next_connection_index = Arc::new(AtomicUsize::new(0));

        let server_task = tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => break,
                };

                let connection_tx = connection_tx.clone();
                let connection_index = next_connection_index.fetch_add(1, Ordering::SeqCst);

                tokio::spawn(async move {
                    let uri = Arc::new(Mutex::new(String::new()));
                    let captured = Arc::clone(&uri);
                    let callback = move |request: &Request, response: Response| {
                        *captured.lock().unwrap() = request.uri().to_string();
                        Ok::<Response, ErrorResponse>(response)
                    };

                    let ws_stream = match accept_hdr_async(stream, callback).await {
                        Ok(ws) => ws,
                        Err(_) => return,
                    };

                    let (mut ws_sink, mut ws_source) = ws_stream.split();
                    let (text_tx, text_rx) = mpsc::channel(64);
                    let (command_tx, mut command_rx) = mpsc::channel(64);

                    let connection = MockWsConnection {
                        index: connection_index,
                        uri: uri.lock().unwrap().clone(),
                        text_rx,
                        command_tx,
                    };

                    if connection_tx.send(connection).await.is_err() {
                        return;
                    }

                    loop {
                        tokio::select! {
                            maybe_command = command_rx.recv() => {
                                match maybe_command {
                                    Some(ConnectionCommand::SendText(text)) => {
                                        if ws_sink.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Some(ConnectionCommand::ForceClose) | None => break,
                                }
                            }
                            maybe_message = ws_source.next() => {
                                match maybe_message {
                                    Some(Ok(Message::Text(text))) => {
                                        let _ = text_tx.send(text.as_str().to_owned()).await;
                                    }
                                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                                    Some(Ok(_)) => {}
                                }
                            }
                        }
                    }
                });
            }
        });

        Ok(Self {
            addr,
            connection_rx,
            server_task,
        })
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn accept_connection(&mut self) -> MockWsConnection {
        timeout(STEP_TIMEOUT, self.connection_rx.recv())
            .await
            .expect("timed out waiting for client connection")
            .expect("mock server connection channel closed")
    }
}

impl Drop for MockWsServer {
    fn drop(&mut self) {
        self.server_task.abort();
    }
}
