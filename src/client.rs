//! The dialing side of the transport facade.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, trace, warn};
use tokio::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tokio_util::codec::FramedWrite;

use crate::codec::{FrameCodec, FrameReader};
use crate::config::Config;
use crate::connection::{is_transient, write_frame, TRANSIENT_BACKOFF};
use crate::error::{Error, Result};
use crate::message::{Message, MessageType};
use crate::transport::{self, Network};

/// Connects to `address` and returns a client for it.
pub async fn dial(network: &str, address: &str, config: &Config) -> Result<Client<TcpStream>> {
    let addrs = network.parse::<Network>()?.resolve(address).await?;
    let stream = TcpStream::connect(&addrs[..]).await?;
    transport::tune(&stream, config)?;

    let local_addr = stream.local_addr().ok();
    let peer_addr = stream.peer_addr().ok();
    debug!("dialed {:?} from {:?}", peer_addr, local_addr);

    let mut client = Client::new(stream, config);
    client.local_addr = local_addr;
    client.peer_addr = peer_addr;
    Ok(client)
}

pub struct Client<T = TcpStream> {
    reader: FrameReader<ReadHalf<T>>,
    writer: FramedWrite<WriteHalf<T>, FrameCodec>,
    response_timeout: Duration,
    local_addr: Option<SocketAddr>,
    peer_addr: Option<SocketAddr>,
    message_id: u16,
}

impl<T: AsyncRead + AsyncWrite> Client<T> {
    /// Wraps an established stream.
    pub fn new(stream: T, config: &Config) -> Client<T> {
        let (read_half, write_half) = io::split(stream);
        Client {
            reader: FrameReader::new(read_half, config.max_packet_size),
            writer: FramedWrite::new(write_half, FrameCodec::new(config.max_packet_size)),
            response_timeout: config.response_timeout,
            local_addr: None,
            peer_addr: None,
            message_id: rand::random(),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Returns a message id for a new request. Ids start at a random value
    /// and then increase, wrapping at 16 bits.
    pub fn next_message_id(&mut self) -> u16 {
        let id = self.message_id;
        self.message_id = self.message_id.wrapping_add(1);
        id
    }

    pub fn random_token() -> Vec<u8> {
        rand::random::<u32>().to_be_bytes().to_vec()
    }

    /// Sends `request` and waits for its reply.
    ///
    /// A non-confirmable request expects no reply and yields `Ok(None)` as
    /// soon as it is written. Otherwise the first acknowledgement or reset
    /// with the request's message id, or message with its (non-empty) token,
    /// is returned; other messages are skipped. No reply within the response
    /// timeout is `Error::Timeout`.
    pub async fn send(&mut self, request: &Message) -> Result<Option<Message>> {
        self.transmit(request).await?;
        if !request.is_confirmable() {
            return Ok(None);
        }

        let timeout = self.response_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            let reply = time::timeout_at(deadline, self.next_message())
                .await
                .map_err(|_| Error::Timeout(timeout))??;

            if answers(request, &reply) {
                return Ok(Some(reply));
            }
            debug!(
                "skipping {:?} id {} while waiting for id {}",
                reply.message_type, reply.message_id, request.message_id
            );
        }
    }

    /// Writes `message` without waiting for anything.
    pub async fn transmit(&mut self, message: &Message) -> Result<()> {
        let bytes = message.encode()?;
        trace!("transmit {:02x?}", bytes);
        write_frame(&mut self.writer, Bytes::from(bytes)).await?;
        Ok(())
    }

    /// Returns the next well-formed message, waiting at most the response timeout.
    pub async fn receive(&mut self) -> Result<Message> {
        let timeout = self.response_timeout;
        time::timeout(timeout, self.next_message())
            .await
            .map_err(|_| Error::Timeout(timeout))?
    }

    /// Closes the sending direction; the peer sees end of stream.
    pub async fn close(mut self) -> Result<()> {
        self.writer.get_mut().shutdown().await?;
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Message> {
        loop {
            match self.reader.read_frame().await {
                Ok(Some(frame)) => match Message::decode(&frame) {
                    Ok(message) => return Ok(message),
                    Err(e) => warn!("dropping malformed message: {}", e),
                },
                Ok(None) => return Err(Error::ConnectionClosed),
                Err(e) if is_transient(&e) => time::sleep(TRANSIENT_BACKOFF).await,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn answers(request: &Message, reply: &Message) -> bool {
    let acknowledges = matches!(
        reply.message_type,
        MessageType::Acknowledgement | MessageType::Reset
    ) && reply.message_id == request.message_id;

    acknowledges || (!request.token.is_empty() && reply.token == request.token)
}
