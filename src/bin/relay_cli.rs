use std::error::Error;

use clap::Parser;
use futures_util::{SinkExt, Stream, StreamExt};
use rand::Rng;
use tokio::io::{self, AsyncBufReadExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use rendezvous::protocol::{BinaryFrame, encode_frame};
use rendezvous::relay::{Envelope, PeerList};

#[derive(Parser)]
#[command(name = "relay_cli")]
#[command(about = "Interactive client for the rendezvous relay", long_about = None)]
struct Args {
    /// Relay base URL
    #[arg(default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Peer id to register under; random when omitted
    peer_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let Args { server, peer_id } = Args::parse();
    let peer_id = peer_id.unwrap_or_else(random_peer_id);

    let url = format!("{}/{}", server.trim_end_matches('/'), peer_id);
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    let (mut ws_tx, ws_rx) = ws_stream.split();

    println!("Connected to {} as {}", server, peer_id);
    println!("Type `<peer> <message>` to send, or `* <order>` to broadcast a frame:");

    tokio::spawn(listen(ws_rx));

    let mut stdin = io::BufReader::new(io::stdin()).lines();
    while let Ok(Some(line)) = stdin.next_line().await {
        let Some((dest, text)) = line.split_once(' ') else {
            continue;
        };

        let msg = if dest == "*" {
            Message::Binary(encode_frame("", &peer_id, text, &[]).into())
        } else {
            Message::text(serde_json::json!({ "id": dest, "msg": text }).to_string())
        };
        ws_tx.send(msg).await?;
    }

    Ok(())
}

fn random_peer_id() -> String {
    let value: u32 = rand::rng().random();
    format!("peer_{:08x}", value)
}

async fn listen<S>(mut ws_rx: S)
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if let Ok(list) = serde_json::from_str::<PeerList>(text.as_str()) {
                    println!("\n* Peers online: {}", list.peers().join(", "));
                } else if let Ok(envelope) = Envelope::parse(text.as_str()) {
                    println!("\n> {}: {}", envelope.id(), text.as_str());
                }
            }
            Ok(Message::Binary(data)) => {
                let frame = BinaryFrame::parse(&data);
                println!(
                    "\n> frame from {} ({}, {} bytes)",
                    frame.src,
                    frame.order,
                    frame.raw.len()
                );
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("Read error: {}", e);
                break;
            }
        }
    }
    println!("Disconnected");
}
