//! Query an Asterisk server's ARI resources
//!
//! Every request is queued at once; the transport sends them one after the
//! other over a single connection and prints each response in order.
//!
//! Usage: cargo run --example query -- [host] [port] [user] [password]

use asterisk_ari_tokio::{AriConnectOptions, HttpClient, Method, DEFAULT_ARI_PORT};
use tokio::sync::mpsc;
use tracing::{error, info};

const RESOURCES: &[&str] = &[
    "/ari/asterisk/info",
    "/ari/asterisk/modules",
    "/ari/asterisk/logging",
    "/ari/applications",
    "/ari/bridges",
    "/ari/channels",
    "/ari/deviceStates",
    "/ari/endpoints",
    "/ari/mailboxes",
    "/ari/recordings/stored",
    "/ari/sounds",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_string());
    let port = match args.next() {
        Some(port) => port.parse()?,
        None => DEFAULT_ARI_PORT,
    };
    let user = args.next().unwrap_or_else(|| "asterisk".to_string());
    let password = args.next().unwrap_or_else(|| "asterisk".to_string());

    let options = AriConnectOptions::new(host, port, user, password, "query");
    let client = HttpClient::new(&options);
    info!("Querying {}", options.authority());

    let (tx, mut rx) = mpsc::unbounded_channel();
    for resource in RESOURCES {
        let tx = tx.clone();
        client.submit_with(Method::Get, *resource, "", move |result| {
            let _ = tx.send((*resource, result));
        });
    }
    drop(tx);

    while let Some((resource, result)) = rx.recv().await {
        match result {
            Ok(response) => {
                println!("\nREQUEST {}:", resource);
                println!("state: {}", response.status());
                println!("reason: {}", response.reason());
                println!("{}", response.body());
            }
            Err(e) => error!("{} failed: {}", resource, e),
        }
    }

    Ok(())
}
