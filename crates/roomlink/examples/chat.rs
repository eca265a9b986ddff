//! Join a room and chat from the terminal.
//!
//! ```sh
//! cargo run -p roomlink --example chat -- <URL> <ROOM>
//! ```
//!
//! Every line read from stdin is published to `ROOM` as `{"text": line}`.
//! Frames received on the room are printed to stdout.

use roomlink::{Client, Config, Event};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let url = args.first().ok_or("usage: chat <URL> <ROOM>")?;
    let room = args.get(1).ok_or("usage: chat <URL> <ROOM>")?.clone();

    let client = Client::spawn(Config::new(url.as_str()))?;

    client.on("connect", |_: &Event| eprintln!("[connected]"));
    client.on("close", |_: &Event| eprintln!("[closed]"));
    client.on("error", |event: &Event| {
        if let Event::Error(err) = event {
            eprintln!("[error] {err}");
        }
    });
    let watched = room.clone();
    client.on("publish", move |event: &Event| {
        if let Event::Message(frame) = event
            && frame.room.as_deref() == Some(watched.as_str())
        {
            match &frame.payload {
                Some(payload) => println!("{payload}"),
                None => println!("-"),
            }
        }
    });

    client.subscribe(room.as_str());
    eprintln!("joined '{room}', type to publish (ctrl-d to quit)");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        client.publish(room.as_str(), serde_json::json!({ "text": line }));
    }

    client.cleanup().await;
    Ok(())
}
