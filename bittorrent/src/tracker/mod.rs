use std::{net::SocketAddr, time::{Duration, Instant}};
use tokio::net::UdpSocket;
use url::Url;

mod http;
mod udp;

type Result<T> = std::result::Result<T, TrackerError>;

// In cases where the tracker doesn't give us a min interval.
const DEFAULT_MIN_ANNOUNCE_INTERVAL: u64 = 60; // seconds

#[derive(thiserror::Error, Debug)]
pub enum TrackerError {

    #[error("request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("error deserializing response: {0}")]
    BencodeError(#[from] bencode::Error),

    #[error("timeout")]
    Timeout(#[from] tokio::time::error::Elapsed),

    #[error("invalid url")]
    InvalidUrl,

    #[error("response error: {0}")]
    ResponseError(String),

}

// A single tracker, reachable over either HTTP(S) or UDP (BEP-15). Unlike
// peer sessions, trackers aren't driven by their own task: `Torrent::announce`
// calls `send_announce` directly and keeps the returned peers.
#[derive(Debug)]
pub struct Tracker {

    pub url: Url,

    // Tracker id handed back by an HTTP tracker, echoed on subsequent announces.
    pub tracker_id: Option<String>,

    pub last_announce: Option<Instant>,

    interval: Option<Duration>,

    min_interval: Option<Duration>,

    transport: Transport,

}

#[derive(Debug)]
enum Transport {

    Http {
        client: reqwest::Client,
    },

    // The socket is bound lazily on the first announce: binding is cheap but
    // doesn't need to happen before we know the tracker will ever be used.
    Udp {
        socket: Option<UdpSocket>,
        conn_id: Option<i64>,
    },

    Unsupported,

}

impl Tracker {

    pub fn new(url: Url) -> Self {

        let transport = match url.scheme() {
            "http" | "https" => Transport::Http { client: reqwest::Client::new() },
            "udp" => Transport::Udp { socket: None, conn_id: None },
            scheme => {
                tracing::warn!("unsupported tracker scheme: {}", scheme);
                Transport::Unsupported
            },
        };

        Self {
            url,
            tracker_id: None,
            last_announce: None,
            interval: None,
            min_interval: None,
            transport,
        }
    }

    pub fn can_announce(&self, time: Instant) -> bool {
        match self.last_announce {
            Some(last_announce) => {
                time.duration_since(last_announce)
                    >= self.min_interval.unwrap_or(Duration::from_secs(DEFAULT_MIN_ANNOUNCE_INTERVAL))
            },
            None => true,
        }
    }

    pub fn should_announce(&self, time: Instant) -> bool {
        match self.last_announce {
            Some(last_announce) => {
                time.duration_since(last_announce)
                    >= self.interval.unwrap_or(Duration::from_secs(DEFAULT_MIN_ANNOUNCE_INTERVAL))
            },
            None => true,
        }
    }

    #[tracing::instrument(skip(self, params), fields(url = %self.url))]
    pub async fn send_announce(&mut self, params: AnnounceParams) -> Result<Vec<SocketAddr>> {

        let peers = match &mut self.transport {

            Transport::Http { client } => {
                let resp = http::announce(client, &self.url, &params).await?;

                if let Some(interval) = resp.interval {
                    self.interval = Some(Duration::from_secs(interval));
                }
                if let Some(min_interval) = resp.min_interval {
                    self.min_interval = Some(Duration::from_secs(min_interval));
                }
                if resp.tracker_id.is_some() {
                    self.tracker_id = resp.tracker_id;
                }

                resp.peers
            },

            Transport::Udp { socket, conn_id } => {
                if socket.is_none() {
                    *socket = Some(UdpSocket::bind("0.0.0.0:0").await?);
                }
                let socket = socket.as_ref().expect("socket bound above");

                // BEP-15 connection ids expire after a minute; simplest to
                // refresh on every announce rather than track their age.
                *conn_id = Some(udp::connect(socket, &self.url).await?);
                udp::announce(socket, conn_id.expect("connected above"), &params).await?
            },

            Transport::Unsupported => return Err(TrackerError::InvalidUrl),
        };

        self.last_announce = Some(Instant::now());
        Ok(peers)
    }
}

#[derive(Debug, Clone)]
pub struct AnnounceParams {

    // Hash of info dict.
    pub info_hash: [u8; 20],

    // Urlencoded 20-byte string used as a unique ID for the client.
    pub peer_id: [u8; 20],

    // Port number.
    pub port: u16,

    // The total amount uploaded (since the client sent the 'started' event to the tracker) in base ten ASCII..
    pub uploaded: u64,

    // The total amount downloaded (since the client sent the 'started' event to the tracker) in base ten ASCII..
    pub downloaded: u64,

    // The number of bytes this client still has to download in base ten ASCII.
    // Clarification: The number of bytes needed to download to be 100% complete and get all the included files in the torrent.
    pub left: u64,

    // If specified, must be one of started, completed, stopped, (or empty which is the same as not being specified).
    // If not specified, then this request is one performed at regular intervals.
    pub event: Option<Event>,

    // Number of peers that the client would like to receive from the tracker.
    pub num_want: Option<usize>,

    // Echoed back from a previous response's tracker id, if any.
    pub tracker_id: Option<String>,

}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Event {

    Completed,

    #[default]
    Started,

    Stopped,

}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::Completed => write!(f, "completed"),
            Event::Started => write!(f, "started"),
            Event::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_http_tracker_has_no_pending_announce() {
        let tracker = Tracker::new(Url::parse("http://tracker.example.com/announce").unwrap());
        assert!(tracker.can_announce(Instant::now()));
        assert!(tracker.should_announce(Instant::now()));
        assert!(matches!(tracker.transport, Transport::Http { .. }));
    }

    #[test]
    fn new_udp_tracker_defers_socket_bind() {
        let tracker = Tracker::new(Url::parse("udp://tracker.example.com:80/announce").unwrap());
        assert!(matches!(tracker.transport, Transport::Udp { socket: None, conn_id: None }));
    }

    #[test]
    fn unsupported_scheme_is_marked_unsupported() {
        let tracker = Tracker::new(Url::parse("ws://tracker.example.com/announce").unwrap());
        assert!(matches!(tracker.transport, Transport::Unsupported));
    }

    #[test]
    fn can_announce_respects_min_interval() {
        let mut tracker = Tracker::new(Url::parse("http://tracker.example.com/announce").unwrap());
        let now = Instant::now();
        tracker.last_announce = Some(now);
        tracker.min_interval = Some(Duration::from_secs(120));
        assert!(!tracker.can_announce(now + Duration::from_secs(1)));
        assert!(tracker.can_announce(now + Duration::from_secs(121)));
    }
}
