//! WebSocket connection to the relay.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sketchroom_shared::{
    decode_binary, decode_text, encode_binary, encode_text, ClientId, ClientMessage, CodecError,
    Framing, ServerMessage,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::error::TransportError;

#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub framing: Framing,
    pub outbound_capacity: usize,
    pub inbound_capacity: usize,
    pub connect_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            framing: Framing::Text,
            outbound_capacity: 256,
            inbound_capacity: 256,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// A live connection. Outgoing messages go through a bounded queue drained
/// by a writer task; incoming messages arrive on the receiver returned by
/// [`SyncClient::connect`].
pub struct SyncClient {
    client_id: ClientId,
    outgoing: mpsc::Sender<ClientMessage>,
    writer: JoinHandle<()>,
    reader: JoinHandle<()>,
}

impl SyncClient {
    /// Connects and waits for the server's `connected` greeting.
    pub async fn connect(
        url: &str,
        options: ClientOptions,
    ) -> Result<(Self, mpsc::Receiver<ServerMessage>), TransportError> {
        let (socket, _) = tokio::time::timeout(options.connect_timeout, connect_async(url))
            .await
            .map_err(|_| TransportError::Timeout)??;
        let (mut sink, mut stream) = socket.split();

        let client_id = tokio::time::timeout(options.connect_timeout, async {
            while let Some(frame) = stream.next().await {
                match decode_frame(frame?) {
                    Some(Ok(ServerMessage::Connected { client_id })) => return Ok(client_id),
                    Some(Ok(_)) | Some(Err(_)) => return Err(TransportError::Handshake),
                    None => continue,
                }
            }
            Err(TransportError::Handshake)
        })
        .await
        .map_err(|_| TransportError::Timeout)??;
        info!(client_id = %client_id, url, "connected to relay");

        let (outgoing, mut outgoing_rx) = mpsc::channel::<ClientMessage>(options.outbound_capacity);
        let framing = options.framing;
        let writer = tokio::spawn(async move {
            while let Some(message) = outgoing_rx.recv().await {
                let frame = match encode_frame(&message, framing) {
                    Ok(frame) => frame,
                    Err(error) => {
                        warn!(client_id = %client_id, %error, "could not encode message");
                        continue;
                    }
                };
                if sink.send(frame).await.is_err() {
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
        });

        let (inbound, inbound_rx) = mpsc::channel(options.inbound_capacity);
        let reader = tokio::spawn(async move {
            while let Some(Ok(frame)) = stream.next().await {
                match decode_frame(frame) {
                    Some(Ok(message)) => {
                        if inbound.send(message).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(error)) => {
                        debug!(client_id = %client_id, %error, "skipping unreadable frame")
                    }
                    None => {}
                }
            }
            debug!(client_id = %client_id, "relay stream ended");
        });

        Ok((
            Self {
                client_id,
                outgoing,
                writer,
                reader,
            },
            inbound_rx,
        ))
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Queues a message without waiting. A full queue rejects the message.
    pub fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        self.outgoing.try_send(message).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => TransportError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
        })
    }

    /// Flushes queued messages, sends a close frame and stops reading.
    pub async fn close(self) {
        drop(self.outgoing);
        let _ = self.writer.await;
        self.reader.abort();
    }
}

fn encode_frame(message: &ClientMessage, framing: Framing) -> Result<Message, CodecError> {
    Ok(match framing {
        Framing::Text => Message::Text(encode_text(message)?.into()),
        Framing::Binary => Message::Binary(encode_binary(message)?.into()),
    })
}

/// `None` for control frames.
fn decode_frame(frame: Message) -> Option<Result<ServerMessage, CodecError>> {
    match frame {
        Message::Text(text) => Some(decode_text(text.as_str())),
        Message::Binary(data) => Some(decode_binary(&data)),
        _ => None,
    }
}
