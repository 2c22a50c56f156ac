use std::{collections::HashSet, net::SocketAddr, sync::Arc, time::Instant};
use tokio::{sync::mpsc, net::TcpStream, time};
use tokio_util::codec::Framed;
use futures::{SinkExt, StreamExt, stream::SplitSink};
use crate::{
    block::{Block, BlockRequest},
    fs::CommandToDisk,
    torrent::{CommandToTorrent, TorrentContext},
    Bitfield,
};
use super::{*, message::*, handshake::*, state::*};

type MessageSink = SplitSink<Framed<TcpStream, MessageCodec>, Message>;

#[derive(Debug)]
pub struct PeerSession {

    // The peer's IP address.
    pub(super) address: SocketAddr,

    // Context is a read only state accessible by all peers.
    torrent_ctx: Arc<TorrentContext>,
    
    // Commands to the peer.
    peer_rx: PeerRx,
    
    // Internal send channel for disk reads.
    peer_tx: PeerTx,

    // Pending block requests from peer to the client.
    requests_in: HashSet<BlockRequest>,

    // Pending block requests from client to peer.
    requests_out: HashSet<BlockRequest>,
    
    // Bitfield of pieces the peer currently has.
    bitfield: Bitfield,

    state: SessionState,

    // Updated on every outbound frame; the once-a-second ticker uses this
    // to decide whether a keep-alive is due.
    last_sent_at: Instant,

}

impl PeerSession {

    pub fn new(address: SocketAddr, torrent_ctx: Arc<TorrentContext>) -> (PeerSession, PeerTx) {

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let bitfield = Bitfield::repeat(false, torrent_ctx.info.num_pieces as usize);
        
        (
            PeerSession {
                address,
                torrent_ctx,
                peer_rx,
                peer_tx: peer_tx.clone(),
                bitfield,
                state: SessionState::default(),
                requests_in: HashSet::new(),
                requests_out: HashSet::new(),
                last_sent_at: Instant::now(),
            }, 
            peer_tx,
        )
    }

    #[tracing::instrument(name = "peer", skip(self, inbound_stream), fields(address = %self.address))]
    pub async fn start_session(&mut self, inbound_stream: Option<TcpStream>) -> Result<()> {
        
        self.state.update(|state| state.conn_state = ConnState::Connecting);
        let inbound = inbound_stream.is_some();
        let mut socket = if let Some(stream) = inbound_stream {
            Framed::new(stream, HandshakeCodec)
        } else {
            let timeout = time::Duration::from_secs(10);
            let stream = time::timeout(timeout, TcpStream::connect(self.address))
                .await
                .map_err(|_| PeerError::Timeout)??;
            tracing::trace!("outbound connection successful");
            Framed::new(stream, HandshakeCodec)
        };

        self.exchange_handshake(&mut socket, inbound).await?;
        
        let socket = Framed::new(socket.into_inner(), MessageCodec);
        self.run(socket).await
    }

    pub async fn disconnect(&mut self) {
        if self.state.conn_state != ConnState::Disconnected {
            self.torrent_ctx.stats.peer_disconnected();
        }
        if self.state.interested {
            self.torrent_ctx.stats.became_uninteresting();
        }
        // Free any blocks we'd asked this peer for so another peer can pick
        // them up; otherwise a piece with a block still marked `Requested`
        // to a now-gone peer could never finish.
        self.free_requests_out().await;
        self.state.update(|state| *state = SessionState::default());
    }

    async fn exchange_handshake(&mut self, socket: &mut Framed<TcpStream, HandshakeCodec>, inbound: bool) -> Result<()> {

        self.state.update(|state| state.conn_state = ConnState::Handshaking);
        let handshake = Handshake::new(self.torrent_ctx.info_hash, self.torrent_ctx.client_id);

        if !inbound {
            tracing::info!("send handshake");
            socket.send(handshake).await?;
        }

        tracing::trace!("waiting for handshake");
        // Receive handshake.
        if let Some(Ok(handshake)) = socket.next().await {
            tracing::info!("read: handshake");

            // Validate handshake.
            if handshake.protocol != PROTOCOL {
                return Err(PeerError::IncorrectProtocol);
            }
            if handshake.info_hash != self.torrent_ctx.info_hash {
                return Err(PeerError::IncorrectInfoHash);
            }

            let peer_id = handshake.peer_id;

            // Respond with handshake if connection is inbound.
            if inbound {
                tracing::info!("send handshake");
                socket.send(handshake).await?;
            }

            tracing::info!("handshake successful, peer connected");
            self.torrent_ctx.stats.peer_connected();
            self.torrent_ctx.torrent_tx.send(CommandToTorrent::PeerConnected {
                address: self.address,
                id: peer_id,
            }).ok();
            Ok(())

        } else {
            Err(PeerError::NoHandshake)
        }
    }

    async fn run(&mut self, socket: Framed<TcpStream, MessageCodec>) -> Result<()> {

        self.state.connect_time = Some(Instant::now());
        self.state.update(|state| state.conn_state = ConnState::Introducing);
        let (mut sink, mut stream) = socket.split();
        let mut ticker = time::interval(time::Duration::from_secs(1));

        loop { tokio::select! {

            // Message from peer.
            Some(Ok(msg)) = stream.next() => self.handle_msg(&mut sink, msg).await?,

            // Command from elsewhere in application.
            Some(cmd) = self.peer_rx.recv() => {
                match cmd {

                    // From disk.
                    PeerCommand::BlockRead(block) => self.send_block(&mut sink, block).await?,

                    PeerCommand::PieceWritten(idx) => self.handle_written_piece(&mut sink, idx).await?,

                    // From torrent.
                    PeerCommand::Shutdown => {
                        tracing::info!("session shutdown");
                        break;
                    },
                
                }
            }

            t = ticker.tick() => self.tick(&mut sink, t.into_std()).await?,

        }}

        Ok(())
    }

    // TODO: send multiple messages in one go, rather than flushing after each one?, particularly for requests.
    // Logs a message and sends to peer.
    #[inline(always)]
    async fn send_message(&mut self, sink: &mut MessageSink, msg: Message) -> Result<()> {
        tracing::info!("send: {}", msg);
        sink.send(msg).await?;
        self.last_sent_at = Instant::now();
        Ok(())
    }

    async fn handle_msg(&mut self, sink: &mut MessageSink, msg: Message) -> Result<()> {
        tracing::info!("read: {}", msg);

        match msg {

            // Bitfield can only be sent directly after handshake.
            Message::Bitfield(bitfiled) => {
                if self.state.conn_state == ConnState::Introducing {
                    self.handle_bitfield(sink, bitfiled).await?;
                } else {
                    tracing::error!("unexpected bitfield");
                    return Err(PeerError::UnexpectedBitfield);
                }
            },
            
            Message::KeepAlive => {},
            
            Message::Choke => {
                if !self.state.peer_choking {
                    self.state.peer_choking = true;
                    // Free pending requests for other peers.
                    self.free_requests_out().await;
                }
            },
            
            Message::Unchoke => {
                if self.state.peer_choking {
                    self.state.peer_choking = false;
                    // Start to make requests if interested.
                    if self.state.interested {
                        self.make_requests(sink).await?;
                    }
                }
            },
            
            Message::Interested => {
                // TODO: Only send unchoke reciprocally.
                // TODO: limit upload slots.
                if !self.state.peer_interested {
                    self.state.peer_interested = true;
                    self.send_message(sink, Message::Unchoke).await?;
                    self.state.choked = false;
                }
            },
            
            Message::NotInterested => self.state.peer_interested = false,
            
            Message::Block(block) => {
                self.handle_block(block).await?;
                self.make_requests(sink).await?;
            },
            
            // TODO: do we need to stop whole task if request is invalid?
            // Will need to match error.
            Message::Request(request) => self.handle_request(request).await?,
            
            Message::Have { idx } => self.handle_have(sink, idx).await?,
            
            // DHT isn't implemented; nothing to do with a peer's listen port.
            Message::Port { port: _ } => {},
            
            Message::Cancel(block_info) => self.handle_cancel(block_info).await?,
        
        }

        // After bitfiled 
        if self.state.conn_state == ConnState::Introducing {

            // Check if either us or peer has any pieces.
            if self.torrent_ctx.picker.piece_picker.read().await.own_bitfield().not_any()
            && self.bitfield.not_any()
            {
                tracing::warn!("no pieces in connection");
                self.peer_tx.send(PeerCommand::Shutdown)?;
                return Ok(())
            }

            self.state.update(|state| state.conn_state = ConnState::Connected);
        }

        Ok(())
    }

    async fn handle_bitfield(&mut self, sink: &mut MessageSink, mut bitfield: Bitfield) -> Result<()> {
        tracing::info!("peer has {}/{} pieces", bitfield.count_ones(), self.torrent_ctx.info.num_pieces);
        // Remove trailing bits.
        bitfield.resize(self.torrent_ctx.info.num_pieces as usize, false);
        // Interested if peer has pieces we don't.
        let interested = self.torrent_ctx.picker.piece_picker.write().await.bitfield_update(&bitfield);
        self.state.update(|state| state.num_pieces = bitfield.count_ones() as usize);
        self.bitfield = bitfield;
        self.update_interest(sink, interested).await
    }

    async fn handle_have(&mut self, sink: &mut MessageSink, idx: u32) -> Result<()> {
        // If idx is not valid, disconnect.
        if idx >= self.torrent_ctx.info.num_pieces {
            tracing::error!("have msg with invalid idx: {}", idx);
            return Err(PeerError::InvalidMessage);
        }
        // Peer already has piece.
        if self.bitfield[idx as usize] {
            return Ok(());
        }
        self.bitfield.set(idx as usize, true);
        self.state.update(|state| state.num_pieces += 1);

        let interested = self
            .torrent_ctx
            .picker
            .piece_picker
            .write()
            .await
            .increment_piece(idx as usize);

        self.update_interest(sink, interested).await
    }

    async fn handle_block(&mut self, block: Block) -> Result<()> {
        
        let request = BlockRequest::from_block(&block);
        if !self.requests_out.remove(&request) {
            // TODO: penalise peer.
            // TODO: add defence against random block spamming.
            tracing::warn!("unexpected block: {:?}", &request);
            return Ok(());
        }
        
        let is_duplicate = if let Some(partial_piece) = self
            .torrent_ctx
            .picker
            .partial_pieces
            .read()
            .await
            .get(&request.piece_idx)
        {
            partial_piece.write().await.received_block(&request)  
        } else {
            // This shouldn't be possible: the block was in requests_out, so its
            // piece should still have a partial_pieces entry -- unless another
            // peer already completed and removed it, in which case this is a
            // late delivery for a piece we've moved on from.
            tracing::warn!("received block for non-existent piece: {:?}", &request);
            return Ok(());
        };

        if !is_duplicate {
            let len = block.data.len() as u64;
            self.state.update(|state| state.throughput.down += len);
            self.torrent_ctx.stats.add_downloaded(len);
            self.torrent_ctx.disk_tx
                .send(CommandToDisk::WriteBlock {
                    block: request,
                    data: block.data.into_vec(),
                })
                .map_err(|e| e.into())

        } else {
            // Never expected: a block is requested from exactly one peer at a
            // time, so this peer's copy arriving after another already
            // completed the block is wasted work, not a feature to allow for.
            tracing::warn!("duplicate block: {:?}", &request);
            Ok(())
        }
    }
    
    async fn handle_request(&mut self, request: BlockRequest) -> Result<()> {
        
        if self.state.choked {
            // TODO: maybe send peer a choke message rather than disconnect.
            tracing::error!("sending requests whilst choked");
            return Err(PeerError::InvalidMessage);
        }
        if !request.is_valid(&self.torrent_ctx.info) {
            tracing::error!("invalid request: {:?}", request);
            return Err(PeerError::InvalidMessage);
        }
        if self.requests_in.contains(&request) {
            tracing::warn!("duplicate request: {:?}", request);
            return Ok(());
        }

        self.requests_in.insert(request);
        self.torrent_ctx.disk_tx.send(CommandToDisk::ReadBlock {
            block: request,
            tx: self.peer_tx.clone(),
        })?;

        Ok(())
    }

    async fn handle_cancel(&mut self, block_info: BlockRequest) -> Result<()> {
        if !block_info.is_valid(&self.torrent_ctx.info) {
            tracing::warn!("invalid cancel: {:?}", block_info);
            return Err(PeerError::InvalidMessage);
        }
        self.requests_in.remove(&block_info);
        Ok(())
    }

    // When a piece is written to disk (by us or by whichever peer won a
    // duplicate-request race for it):
    // - Cancel any outstanding requests we still hold open for its blocks,
    //   whether or not the peer already had the piece (a peer we never
    //   requested from simply has nothing to cancel).
    // - Send a have message if the peer doesn't have it yet.
    // Cancels go out before the have, so a peer that lost the race for this
    // piece (§8 scenario 4: receives cancels for every block, then have).
    async fn handle_written_piece(&mut self, sink: &mut MessageSink, idx: usize) -> Result<()> {

        let outstanding: Vec<BlockRequest> = self
            .requests_out
            .iter()
            .filter(|block| block.piece_idx == idx)
            .copied()
            .collect();
        for block in outstanding {
            self.requests_out.remove(&block);
            self.send_message(sink, Message::Cancel(block)).await?;
        }

        if !self.bitfield[idx] {
            self.send_message(sink, Message::Have { idx: idx as u32 }).await?;
        }

        Ok(())
    }

    // Queue requests up to a certain target queue length.
    async fn make_requests(&mut self, sink: &mut MessageSink) -> Result<()> {

        if self.state.peer_choking || !self.state.interested {
            tracing::warn!("attempted to make requests whilst not interested or choked by peer");
            return Ok(())
        }
        
        let requests = self
            .torrent_ctx.picker
            .pick_blocks(&self.requests_out, 20, &self.bitfield)
            .await;
        
        // TODO: test whether quicker sending batch if requets.len() > 1.
        // let mut stream = futures::stream::iter(
        //     requests
        //         .into_iter()
        //         .map(|block| {
        //             tracing::info!("send request: {:?}", block);
        //             self.requests_out.insert(block);
        //             Ok(Message::Request(block))
        //         })
        // );
        // sink.send_all(&mut stream).await?;

        for block in requests {
            tracing::info!("send request: {:?}", block);
            self.requests_out.insert(block);
            sink.send(Message::Request(block)).await?;
            self.last_sent_at = Instant::now();
        }

        Ok(())
    }

    // Remove the request and send peer block.
    async fn send_block(&mut self, sink: &mut MessageSink, block: Block) -> Result<()> {
        let request: BlockRequest = BlockRequest::from_block(&block);
        if !self.requests_in.remove(&request) {
            // TODO: think about under what circumstances this would occur.
            tracing::warn!("block read but no request: {:?}", request);
            return Ok(());
        }
        sink.send(Message::Block(block)).await?;
        self.last_sent_at = Instant::now();
        self.state.update(|state| state.throughput.up += request.len as u64);
        self.torrent_ctx.stats.add_uploaded(request.len as u64);
        Ok(())
    }

    // Free all requested blocks, making them available for other peers.
    async fn free_requests_out(&mut self) {
        tracing::info!("freeing requested blocks");
        let partial_pieces = self.torrent_ctx.picker.partial_pieces.read().await;
        for request in self.requests_out.drain() {
            if let Some(partial_piece) = partial_pieces.get(&request.piece_idx) {
                partial_piece.write().await.free_block(&request);
                tracing::trace!("freed block request: {:?}", request);
            }
        }
    }
    
    // If we have BECOME interested, send a message to indicate this.
    async fn update_interest(&mut self, sink: &mut MessageSink, interested: bool) -> Result<()> {
        if !self.state.interested && interested {
            self.state.interested = true;
            self.torrent_ctx.stats.became_interesting();
            self.send_message(sink, Message::Interested).await?;
        } else if self.state.interested && !interested {
            self.state.interested = false;
            self.torrent_ctx.stats.became_uninteresting();
            self.send_message(sink, Message::NotInterested).await?;
        }
        Ok(())
    }

    async fn tick(&mut self, sink: &mut MessageSink, time: Instant) -> Result<()> {

        if !self.state.interested
        && !self.state.peer_interested
        && time.saturating_duration_since(self.state.connect_time.unwrap())
            >= time::Duration::from_secs(30)
        {
            tracing::warn!("disconnecting peer due to inactivity");
            return Err(PeerError::Timeout)
        }

        // Keep the connection alive: a zero-length frame once we've gone
        // quiet for 10s, as long as the peer hasn't choked us.
        if !self.state.peer_choking
        && time.saturating_duration_since(self.last_sent_at) >= time::Duration::from_secs(10)
        {
            self.send_message(sink, Message::KeepAlive).await?;
        }

        self.state.changed = false;
        self.state.tick();

        Ok(())
    }
}
