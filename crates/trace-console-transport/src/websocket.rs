//! Socket.IO client transport over a websocket.

use async_trait::async_trait;
use futures::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};

use crate::{
    packet::{Packet, SocketPacket},
    protocol::{InboundEvent, OutboundEvent},
    transport::{Connector, Endpoint, Transport, TransportError},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens [`WsTransport`]s with tokio-tungstenite.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    type Transport = WsTransport;

    async fn open(&self, endpoint: &Endpoint) -> Result<WsTransport, TransportError> {
        let url = endpoint.url();
        tracing::debug!("ws: connecting to {url}");
        let (stream, _) = tokio_tungstenite::connect_async(url).await?;
        WsTransport::handshake(stream).await
    }
}

/// One Socket.IO session on a websocket.
pub struct WsTransport {
    reader: SplitStream<WsStream>,
    writer: mpsc::UnboundedSender<Message>,
    send_task: JoinHandle<()>,
    finished: bool,
    closed: bool,
}

impl WsTransport {
    /// Wait for the Engine.IO open packet, then join the default namespace.
    async fn handshake(stream: WsStream) -> Result<Self, TransportError> {
        let (mut sink, mut reader) = stream.split();

        loop {
            match reader.next().await {
                Some(Ok(Message::Text(text))) => match Packet::decode(text.as_str())? {
                    Packet::Open(handshake) => {
                        tracing::debug!(
                            sid = %handshake.sid,
                            ping_interval = handshake.ping_interval,
                            "Engine.IO session opened"
                        );
                        break;
                    }
                    other => tracing::trace!("Ignoring {other:?} before open"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return Err(TransportError::Handshake(
                        "connection closed before open packet".to_string(),
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            }
        }

        sink.send(text_frame(&Packet::Message(SocketPacket::Connect(None))))
            .await?;

        let (writer, rx) = mpsc::unbounded_channel();
        let send_task = tokio::spawn(forward_frames(sink, rx));

        Ok(Self {
            reader,
            writer,
            send_task,
            finished: false,
            closed: false,
        })
    }

    fn send_packet(&self, packet: &Packet) -> Result<(), TransportError> {
        self.writer
            .send(text_frame(packet))
            .map_err(|_| TransportError::Closed)
    }

    fn finish(&mut self, reason: &str) -> Option<InboundEvent> {
        self.finished = true;
        Some(InboundEvent::Disconnect {
            reason: reason.to_string(),
        })
    }

    fn on_packet(&mut self, packet: Packet) -> Option<InboundEvent> {
        match packet {
            Packet::Ping(data) => {
                if self.send_packet(&Packet::Pong(data)).is_err() {
                    tracing::debug!("Pong not sent: writer closed");
                }
                None
            }
            Packet::Message(SocketPacket::Connect(_)) => Some(InboundEvent::Connect),
            Packet::Message(SocketPacket::Disconnect) => self.finish("io server disconnect"),
            Packet::Close => self.finish("transport close"),
            Packet::Message(SocketPacket::ConnectError(data)) => {
                tracing::warn!("Connection refused by server: {data}");
                self.finish("connect error")
            }
            Packet::Message(SocketPacket::Event { name, args, .. }) => {
                match InboundEvent::from_socket_event(&name, args) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        tracing::warn!("Dropping malformed '{name}' event: {e}");
                        None
                    }
                }
            }
            other => {
                tracing::trace!("Ignoring {other:?}");
                None
            }
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn next_event(&mut self) -> Option<InboundEvent> {
        while !self.finished {
            let event = match self.reader.next().await {
                Some(Ok(Message::Text(text))) => match Packet::decode(text.as_str()) {
                    Ok(packet) => self.on_packet(packet),
                    Err(e) => {
                        tracing::warn!("Dropping malformed packet: {e}");
                        None
                    }
                },
                Some(Ok(Message::Binary(_))) => {
                    tracing::debug!("Binary frames are not supported");
                    None
                }
                Some(Ok(Message::Close(_))) | None => self.finish("transport close"),
                Some(Ok(_)) => None,
                Some(Err(e)) => {
                    tracing::warn!("WebSocket error: {e}");
                    self.finish("transport error")
                }
            };
            if event.is_some() {
                return event;
            }
        }
        None
    }

    async fn emit(&mut self, event: OutboundEvent) -> Result<(), TransportError> {
        self.send_packet(&Packet::event(event.name(), event.args()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.finished = true;
        // Best effort: the writer may already be gone.
        let _ = self.send_packet(&Packet::Message(SocketPacket::Disconnect));
        let _ = self.writer.send(Message::Close(None));
        (&mut self.send_task).await.map_err(|e| {
            tracing::debug!("Send task ended abnormally: {e}");
            TransportError::Closed
        })
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.send_task.abort();
    }
}

fn text_frame(packet: &Packet) -> Message {
    Message::Text(packet.encode().into())
}

async fn forward_frames(
    mut sink: SplitSink<WsStream, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        let closing = matches!(msg, Message::Close(_));
        if sink.send(msg).await.is_err() {
            break;
        }
        if closing {
            break;
        }
    }
    let _ = sink.close().await;
}
