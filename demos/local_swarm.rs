//! Local swarm demo
//!
//! Starts three peer servers sharing the same file, registers them with an
//! in-process tracker, then downloads the file from all three at once.
//!
//! Usage: cargo run --example local_swarm [size_in_bytes]

use std::env;
use std::path::PathBuf;

use swarmshare::{
    decode_locator, encode_locator, PeerServer, SharedDirectory, SwarmConfig, SwarmDownloader,
    SwarmEvent, TrackerRegistry, TransferConfig,
};

const FILE_NAME: &str = "demo.bin";
const CHUNK_SIZE: u64 = 64 * 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let size: usize = env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(1_000_000);

    let root = env::var("SWARMSHARE_DEMO_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("swarmshare-demo"));
    if root.exists() {
        std::fs::remove_dir_all(&root)?;
    }

    let content: Vec<u8> = (0..size).map(|i| (i * 7 % 251) as u8).collect();
    let registry = TrackerRegistry::new();

    // Seeders
    let mut servers = Vec::new();
    for n in 0..3 {
        let share_dir = root.join(format!("seeder{n}"));
        std::fs::create_dir_all(&share_dir)?;
        std::fs::write(share_dir.join(FILE_NAME), &content)?;

        let share = SharedDirectory::new(&share_dir);
        let server = PeerServer::bind(
            "127.0.0.1:0",
            share.clone(),
            CHUNK_SIZE,
            TransferConfig::default(),
        )
        .await?
        .spawn()?;
        let addr = server.local_addr();
        registry.announce(&share.announcement(&addr.ip().to_string(), addr.port()).await?)?;
        println!("Seeder {n} listening on {addr}");
        servers.push(server);
    }

    // Round-trip the descriptor through a magnet locator
    let descriptor = SharedDirectory::new(root.join("seeder0"))
        .describe(FILE_NAME, "http://localhost:5000", CHUNK_SIZE)
        .await?;
    let locator = encode_locator(&descriptor);
    println!("Locator: {locator}");
    let descriptor = decode_locator(&locator)?;

    let config = SwarmConfig::new()
        .download_dir(root.join("Downloads"))
        .chunk_dir(root.join("Downloads").join("Chunk_List"));
    let downloader = SwarmDownloader::new(config);

    let mut events = downloader.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                SwarmEvent::ChunkReceived { .. } => {}
                other => println!("{other:?}"),
            }
            if matches!(event, SwarmEvent::Completed { .. } | SwarmEvent::Failed { .. }) {
                break;
            }
        }
    });

    let result = downloader.download_from(&registry, &descriptor).await?;
    printer.await?;

    match &result.path {
        Some(path) => {
            let matches = std::fs::read(path)? == content;
            println!("Downloaded {} bytes to {} (identical: {matches})", size, path.display());
        }
        None => println!("Download failed: {:?}", result.failure),
    }

    for server in servers {
        server.shutdown().await?;
    }
    Ok(())
}
