use tokio::{sync::mpsc, task::JoinHandle};
use tracing::Instrument;
use crate::block::Block;

mod session;
mod message;
mod handshake;
pub mod state;

pub use session::PeerSession;

type Result<T> = std::result::Result<T, PeerError>;
type PeerRx = mpsc::UnboundedReceiver<PeerCommand>;
pub type PeerTx = mpsc::UnboundedSender<PeerCommand>;

#[derive(thiserror::Error, Debug)]
pub enum PeerError {

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    
    #[error("handshake provided incorrect protocol")]
    IncorrectProtocol,

    #[error("handshake provided incorrect info-hash")]
    IncorrectInfoHash,

    #[error("no handshake recieved")]
    NoHandshake,

    #[error("invalid message ID: {0}")]
    InvalidMessageId(u8),

    #[error("bitfield sent before handshake")]
    UnexpectedBitfield,

    #[error("invalid message payload")]
    InvalidMessage,

    #[error("connection timeout")]
    Timeout,

    #[error("channel error: {0}")]
    Channel(String),
}

impl<T> From<mpsc::error::SendError<T>> for PeerError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        PeerError::Channel(e.to_string())
    }
}

// Commands that can be sent to a peer.
pub enum PeerCommand {

    // Tell the peer we got a piece (piece idx).
    PieceWritten(usize),

    // Block read from disk.
    BlockRead(Block),

    Shutdown,

}

#[derive(Debug)]
pub struct PeerHandle {

    // The peer's id, set once the handshake completes.
    pub id: Option<[u8; 20]>,

    // Sends commands to the peer session. `None` once the session has
    // disconnected and the handle is only kept around to be joined.
    pub peer_tx: Option<PeerTx>,

    // Handle to the peer session task. Taken on shutdown to be awaited.
    pub session_handle: Option<JoinHandle<Result<()>>>,

}

impl PeerHandle {

    // Spawns the session's run loop. `inbound_stream` is `Some` for
    // connections accepted on our listener, `None` for ones we initiate.
    pub fn start_session(
        mut session: PeerSession,
        peer_tx: PeerTx,
        inbound_stream: Option<tokio::net::TcpStream>,
    ) -> Self {

        let address = session.address;
        let session_handle = tokio::spawn(async move {
            let result = session.start_session(inbound_stream).await;
            if let Err(e) = &result {
                tracing::error!("session error: {}", e);
            }
            session.disconnect().await;
            result
        }.instrument(tracing::info_span!("peer", addr = %address)));

        PeerHandle {
            id: None,
            peer_tx: Some(peer_tx),
            session_handle: Some(session_handle),
        }
    }
}