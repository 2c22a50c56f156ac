use bittorrent::{CommandToTorrent, MetaInfo, Torrent, TorrentConfig};
use std::{path::{Path, PathBuf}, net::SocketAddr};
use rand::Rng;

const DEFAULT_PORT: u16 = 6881;

// `-RS0001-` followed by 12 random ASCII digits, refreshed per run.
fn client_id() -> [u8; 20] {
    let mut id = [0u8; 20];
    id[..8].copy_from_slice(b"-RS0001-");
    let mut rng = rand::thread_rng();
    for byte in &mut id[8..] {
        *byte = rng.gen_range(b'0'..=b'9');
    }
    id
}

fn usage() -> ! {
    eprintln!("usage: bittorrent <torrent-file> <destination-dir>");
    std::process::exit(1);
}

#[tokio::main]
async fn main() {

    let format = tracing_subscriber::fmt::format();
    let sub = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .event_format(format)
        .finish();
    tracing::subscriber::set_global_default(sub).unwrap();

    let mut args = std::env::args().skip(1);
    let torrent_path = match args.next() {
        Some(p) => PathBuf::from(p),
        None => usage(),
    };
    let output_dir = match args.next() {
        Some(d) => PathBuf::from(d),
        None => usage(),
    };

    if !output_dir.exists() {
        tracing::error!("destination directory does not exist: {}", output_dir.display());
        std::process::exit(1);
    }

    let metainfo = match MetaInfo::new(Path::new(&torrent_path)) {
        Ok(metainfo) => metainfo,
        Err(e) => {
            tracing::error!("failed to read metainfo: {}", e);
            std::process::exit(1);
        },
    };

    let config = TorrentConfig {
        client_id: client_id(),
        listen_address: SocketAddr::new(std::net::Ipv4Addr::UNSPECIFIED.into(), DEFAULT_PORT),
        min_max_peers: (5, 100),
        output_dir,
    };

    let mut torrent = Torrent::new(metainfo, config).await;

    // Completion no longer ends the process (the torrent keeps seeding),
    // so ctrl-c is the only way to ask it to shut down gracefully.
    let shutdown_tx = torrent.command_tx();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received ctrl-c, shutting down");
            let _ = shutdown_tx.send(CommandToTorrent::Shutdown);
        }
    });

    match torrent.start().await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        },
    }
}
