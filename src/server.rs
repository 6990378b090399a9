//! Handler contract and the listening side of the transport facade.

use std::net::SocketAddr;
use std::sync::Arc;

use log::{debug, info};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};

use crate::config::Config;
use crate::connection::{Connection, Peer};
use crate::error::Result;
use crate::message::Message;
use crate::transport::{self, Network};

/// Application logic invoked for every decoded message.
///
/// Returning a message makes the dispatcher transmit it on the same
/// connection; returning `None` transmits nothing. The peer reference is only
/// valid for the duration of the call.
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, peer: &Peer, message: Message) -> Option<Message>;
}

impl<F> Handler for F
where
    F: Fn(&Peer, Message) -> Option<Message> + Send + Sync + 'static,
{
    fn handle(&self, peer: &Peer, message: Message) -> Option<Message> {
        self(peer, message)
    }
}

/// Builds a handler from a closure, pinning down its argument types.
pub fn handler_fn<F>(f: F) -> F
where
    F: Fn(&Peer, Message) -> Option<Message> + Send + Sync + 'static,
{
    f
}

/// A bound listener that serves a single connection.
pub struct Listener {
    listener: TcpListener,
    config: Config,
}

impl Listener {
    pub async fn bind(network: &str, address: &str, config: &Config) -> Result<Listener> {
        let addrs = network.parse::<Network>()?.resolve(address).await?;
        let listener = TcpListener::bind(&addrs[..]).await?;
        info!("listening on {}", listener.local_addr()?);

        Ok(Listener {
            listener,
            config: config.clone(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts one connection and applies the socket tuning.
    pub async fn accept(&self) -> Result<Connection<TcpStream>> {
        let (stream, remote_addr) = self.listener.accept().await?;
        debug!("accepted {}", remote_addr);

        transport::tune(&stream, &self.config)?;
        let peer = Peer {
            local_addr: stream.local_addr().ok(),
            remote_addr: Some(remote_addr),
        };
        Ok(Connection::new(stream, peer, &self.config))
    }

    /// Accepts one connection and serves it until it closes.
    pub async fn accept_and_serve<H: Handler>(self, handler: H) -> Result<()> {
        let connection = self.accept().await?;
        connection.run(Arc::new(handler)).await
    }
}

/// Binds to `address`, accepts one connection and serves it with `handler`.
///
/// Fails if binding or accepting fails; otherwise returns when the
/// connection closes.
pub async fn listen_and_serve<H: Handler>(
    network: &str,
    address: &str,
    handler: H,
    config: &Config,
) -> Result<()> {
    Listener::bind(network, address, config)
        .await?
        .accept_and_serve(handler)
        .await
}

/// Serves an already established stream with `handler`.
pub async fn serve<T, H>(stream: T, handler: H, config: &Config) -> Result<()>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    H: Handler,
{
    Connection::new(stream, Peer::default(), config)
        .run(Arc::new(handler))
        .await
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::client::dial;
    use crate::error::Error;
    use crate::message::{Code, ContentFormat, MessageType};
    use std::time::Duration;
    use tokio::time;
    use tokio_test::assert_ok;

    async fn spawn_server<H: Handler>(
        handler: H,
        config: Config,
    ) -> (SocketAddr, tokio::task::JoinHandle<Result<()>>) {
        let listener = Listener::bind("tcp", "127.0.0.1:0", &config).await.unwrap();
        let addr = listener.local_addr().unwrap();
        (addr, tokio::spawn(listener.accept_and_serve(handler)))
    }

    #[tokio::test]
    async fn test_serve_with_ack_response() {
        let mut req = Message::new(MessageType::Confirmable, Code::Post, 9876)
            .with_payload("Content sent by client");
        req.set_content_format(ContentFormat::TextPlain);
        req.set_path_string("/req/path");

        let mut res = Message::new(MessageType::Acknowledgement, Code::Content, req.message_id)
            .with_payload("Reply from CoAP server");
        res.set_content_format(ContentFormat::TextPlain);
        res.set_path(&req.path());

        let expected = req.clone();
        let reply = res.clone();
        let handler = handler_fn(move |_, m| if m == expected { Some(reply.clone()) } else { None });

        let (addr, server) = spawn_server(handler, Config::default()).await;

        let mut client = dial("tcp", &addr.to_string(), &Config::default()).await.unwrap();
        let m = client.send(&req).await.unwrap();
        assert_eq!(m, Some(res));

        client.close().await.unwrap();
        assert_ok!(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_serve_without_ack_response() {
        let mut req = Message::new(MessageType::NonConfirmable, Code::Post, 54321)
            .with_payload("Content sent by client");
        req.set_content_format(ContentFormat::AppOctets);

        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        let handler = handler_fn(move |_, m| {
            let _ = seen_tx.send(m);
            None
        });

        let (addr, server) = spawn_server(handler, Config::default()).await;

        let mut client = dial("tcp", &addr.to_string(), &Config::default()).await.unwrap();
        assert!(client.send(&req).await.unwrap().is_none());
        assert_eq!(seen_rx.recv().await, Some(req));

        client.close().await.unwrap();
        assert_ok!(server.await.unwrap());
    }

    #[tokio::test]
    async fn test_confirmable_without_reply_times_out() {
        let config = Config::default().with_response_timeout(Duration::from_millis(100));
        let (addr, _server) = spawn_server(handler_fn(|_, _| None), config.clone()).await;

        let mut client = dial("tcp", &addr.to_string(), &config).await.unwrap();
        let req = Message::new(MessageType::Confirmable, Code::Get, 1);
        assert!(matches!(client.send(&req).await, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_idle_connection_is_closed() {
        let config = Config::default()
            .with_heartbeat(Duration::from_millis(100))
            .with_session(Duration::from_secs(3600));
        let (addr, server) = spawn_server(handler_fn(|_, _| None), config.clone()).await;

        let mut client = dial("tcp", &addr.to_string(), &config).await.unwrap();
        let result = time::timeout(Duration::from_secs(5), server).await;
        assert_ok!(assert_ok!(assert_ok!(result)));

        assert!(matches!(client.receive().await, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_listen_and_serve_rejects_network() {
        let result = listen_and_serve("udp", "127.0.0.1:0", handler_fn(|_, _| None), &Config::default()).await;
        assert!(matches!(result, Err(Error::UnsupportedNetwork(_))));
    }

    #[tokio::test]
    async fn test_listen_and_serve_bind_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();
        let result = listen_and_serve("tcp", &addr, handler_fn(|_, _| None), &Config::default()).await;
        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_handler_sees_peer_addresses() {
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        let handler = handler_fn(move |peer, _| {
            let _ = seen_tx.send(*peer);
            None
        });
        let (addr, _server) = spawn_server(handler, Config::default()).await;

        let mut client = dial("tcp", &addr.to_string(), &Config::default()).await.unwrap();
        let req = Message::new(MessageType::NonConfirmable, Code::Get, 2);
        client.send(&req).await.unwrap();

        let peer = seen_rx.recv().await.unwrap();
        assert_eq!(peer.local_addr, Some(addr));
        assert_eq!(peer.remote_addr, Some(client.local_addr().unwrap()));
    }
}
