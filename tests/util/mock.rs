use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const UNKNOWN_COMMAND: &str = "-ERR unknown command\r\n";

/// Frame `body` as a bulk string reply.
pub fn bulk(body: &str) -> String {
    format!("${}\r\n{}\r\n", body.len(), body)
}

/// A port nothing listens on, connecting to it is refused.
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Answers inline commands with canned replies, keyed by the lower-cased
/// command line. `SELECT 0` is always accepted.
pub struct MockRedis {
    addr: SocketAddr,
    commands: Arc<Mutex<Vec<String>>>,
}

impl MockRedis {
    pub async fn start<I>(replies: I) -> MockRedis
    where
        I: IntoIterator<Item = (&'static str, String)>,
    {
        let mut replies = replies
            .into_iter()
            .map(|(command, reply)| (command.to_lowercase(), reply))
            .collect::<HashMap<_, _>>();
        replies
            .entry("select 0".to_string())
            .or_insert_with(|| "+OK\r\n".to_string());
        let replies = Arc::new(replies);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let commands = Arc::new(Mutex::new(vec![]));

        let received = Arc::clone(&commands);
        tokio::spawn(async move {
            loop {
                let (stream, _peer) = listener.accept().await.unwrap();
                tokio::spawn(serve(stream, Arc::clone(&replies), Arc::clone(&received)));
            }
        });

        MockRedis { addr, commands }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Every command received so far, across all connections.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

async fn serve(
    stream: TcpStream,
    replies: Arc<HashMap<String, String>>,
    commands: Arc<Mutex<Vec<String>>>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let command = line.trim().to_string();
        let reply = replies
            .get(&command.to_lowercase())
            .map(String::as_str)
            .unwrap_or(UNKNOWN_COMMAND);

        commands.lock().unwrap().push(command);
        if writer.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}
