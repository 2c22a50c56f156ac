use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::time::Duration;
use bytes::{Buf, BufMut, BytesMut};
use tokio::{net::UdpSocket, time};
use url::Url;
use super::{AnnounceParams, Event, Result, TrackerError};

// Reference: https://www.bittorrent.org/beps/bep_0015.html

const PROTOCOL_ID: i64      = 0x41727101980;
const ACTION_CONNECT: i32   = 0;
const ACTION_ANNOUNCE: i32  = 1;

// Performs the connect handshake, returning the connection id to use for
// the following announce within the next 60 seconds.
pub async fn connect(socket: &UdpSocket, url: &Url) -> Result<i64> {

    let host = url.host_str().ok_or(TrackerError::InvalidUrl)?;
    let port = url.port().ok_or(TrackerError::InvalidUrl)?;
    let addr = (host, port).to_socket_addrs()?.next().ok_or(TrackerError::InvalidUrl)?;
    time::timeout(Duration::from_secs(10), socket.connect(addr)).await??;

    let trans_id = rand::random();
    let mut buf = BytesMut::with_capacity(16);
    buf.put_i64(PROTOCOL_ID);
    buf.put_i32(ACTION_CONNECT);
    buf.put_i32(trans_id);
    socket.send(&buf).await?;

    let mut resp_buf = [0u8; 16];
    let n = socket.recv(&mut resp_buf).await?;
    if n < 16 {
        return Err(TrackerError::ResponseError("invalid response length".to_string()));
    }
    let mut resp = &resp_buf[..];
    if resp.get_i32() != ACTION_CONNECT {
        return Err(TrackerError::ResponseError("expected action 0".to_string()));
    }
    if resp.get_i32() != trans_id {
        return Err(TrackerError::ResponseError("invalid transaction id".to_string()));
    }

    tracing::trace!("connected to tracker");
    Ok(resp.get_i64())
}

// Sends a single announce over an already-connected socket.
pub async fn announce(socket: &UdpSocket, conn_id: i64, params: &AnnounceParams) -> Result<Vec<SocketAddr>> {

    let trans_id = rand::random();
    let mut buf = BytesMut::with_capacity(98);
    buf.put_i64(conn_id);
    buf.put_i32(ACTION_ANNOUNCE);
    buf.put_i32(trans_id);
    buf.put(&params.info_hash[..]);
    buf.put(&params.peer_id[..]);
    buf.put_u64(params.downloaded);
    buf.put_u64(params.left);
    buf.put_u64(params.uploaded);
    buf.put_i32(
        match params.event {
            Some(Event::Started) => 2,
            Some(Event::Completed) => 1,
            Some(Event::Stopped) => 3,
            None => 0,
        }
    );
    buf.put_i32(0); // IP address, default = 0.
    buf.put_i32(rand::random()); // Key, random.
    buf.put_i32(
        match params.num_want {
            Some(num_want) => num_want as i32,
            None => -1,
        }
    );
    buf.put_u16(params.port);

    socket.send(&buf).await?;

    let mut resp_buf = [0u8; 1024];
    let n = socket.recv(&mut resp_buf).await?;
    let mut resp = &resp_buf[..];
    if n < 20 {
        return Err(TrackerError::ResponseError("invalid response length".to_string()));
    }
    if resp.get_i32() != ACTION_ANNOUNCE {
        return Err(TrackerError::ResponseError("expected action 1".to_string()));
    }
    if resp.get_i32() != trans_id {
        return Err(TrackerError::ResponseError("invalid transaction id".to_string()));
    }
    let _interval = resp.get_i32();
    let _leechers = resp.get_i32();
    let _seeders = resp.get_i32();
    let num_peers = (n - 20) / 6;

    let mut peers = Vec::with_capacity(num_peers);
    for _ in 0..num_peers {
        let ip = resp.get_u32();
        let port = resp.get_u16();
        peers.push(SocketAddr::new(Ipv4Addr::from(ip).into(), port));
    }

    tracing::info!("provided {} peers", peers.len());
    Ok(peers)
}
