use std::env;
use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};

use tracing::{debug, info};

use crate::error::{Result, TluiError};
use crate::message::Outbound;
use crate::session::{FeedReport, Session};

pub const DEFAULT_ADDR: &str = "127.0.0.1:18081";
pub const DEFAULT_READ_BUFFER: usize = 8 * 1024;

pub const ADDR_ENV: &str = "TLUI_ADDR";
pub const MAX_LINE_BYTES_ENV: &str = "TLUI_MAX_LINE_BYTES";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub addr: String,
    pub max_line_bytes: Option<usize>,
    pub read_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            max_line_bytes: None,
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Precedence:
        // 1) TLUI_ADDR
        // 2) 127.0.0.1:18081 (backend line server default)
        let addr = lookup(ADDR_ENV)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ADDR.to_string());

        // Unset means unbounded lines.
        let max_line_bytes = match lookup(MAX_LINE_BYTES_ENV).filter(|value| !value.is_empty()) {
            Some(value) => Some(parse_line_cap(&value)?),
            None => None,
        };

        Ok(Self {
            addr,
            max_line_bytes,
            ..Self::default()
        })
    }

    #[must_use]
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        resolve_addr(&self.addr)
    }
}

fn parse_line_cap(value: &str) -> Result<usize> {
    match value.trim().parse::<usize>() {
        Ok(max) if max > 0 => Ok(max),
        _ => Err(TluiError::InvalidConfig {
            name: MAX_LINE_BYTES_ENV,
            value: value.to_string(),
        }),
    }
}

pub fn resolve_addr(addr: &str) -> Result<SocketAddr> {
    addr.to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| TluiError::InvalidAddress(addr.to_string()))
}

/// Write half of a connection, usable from another thread.
#[derive(Debug)]
pub struct Sender {
    stream: TcpStream,
    peer: String,
}

impl Sender {
    pub fn send(&mut self, message: &Outbound) -> Result<()> {
        write_message(&mut self.stream, &self.peer, message)
    }

    /// Shuts the whole connection down, which also ends the reader's `run`.
    pub fn disconnect(self) {
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            debug!(event = "disconnect_failed", peer = %self.peer, error = %err);
        }
    }
}

/// Blocking connection to the backend line server.
pub struct Client {
    stream: TcpStream,
    peer: String,
    session: Session,
    buffer: Vec<u8>,
}

impl Client {
    /// Connects and announces the client with `{"ui_connected": true}`.
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let addr = config.socket_addr()?;
        let peer = addr.to_string();
        let stream = TcpStream::connect(addr).map_err(|source| TluiError::Io {
            target: peer.clone(),
            source,
        })?;
        info!(event = "connected", peer = %peer);

        let mut client = Self {
            stream,
            peer,
            session: Session::new(config.max_line_bytes),
            buffer: vec![0; config.read_buffer.max(1)],
        };
        client.send(&Outbound::handshake())?;
        Ok(client)
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn send(&mut self, message: &Outbound) -> Result<()> {
        write_message(&mut self.stream, &self.peer, message)
    }

    pub fn sender(&self) -> Result<Sender> {
        let stream = self.stream.try_clone().map_err(|source| TluiError::Io {
            target: self.peer.clone(),
            source,
        })?;
        Ok(Sender {
            stream,
            peer: self.peer.clone(),
        })
    }

    /// Blocks for the next chunk. `None` once the backend closes the stream.
    pub fn poll(&mut self) -> Result<Option<FeedReport>> {
        let read = loop {
            match self.stream.read(&mut self.buffer) {
                Ok(read) => break read,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(source) => {
                    return Err(TluiError::Io {
                        target: self.peer.clone(),
                        source,
                    });
                }
            }
        };

        if read == 0 {
            debug!(event = "stream_closed", peer = %self.peer);
            self.session.finish();
            return Ok(None);
        }
        Ok(Some(self.session.feed(&self.buffer[..read])))
    }

    /// Reads until the backend closes the stream or asks the client to quit.
    pub fn run<F>(&mut self, mut on_update: F) -> Result<()>
    where
        F: FnMut(&mut Session, &FeedReport),
    {
        while let Some(report) = self.poll()? {
            on_update(&mut self.session, &report);
            if self.session.state().quit_requested {
                info!(event = "quit", peer = %self.peer);
                break;
            }
        }
        Ok(())
    }

    pub fn close(self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
            Err(source) => Err(TluiError::Io {
                target: self.peer,
                source,
            }),
        }
    }
}

fn write_message(stream: &mut TcpStream, peer: &str, message: &Outbound) -> Result<()> {
    let line = message.encode_line()?;
    stream
        .write_all(line.as_bytes())
        .and_then(|()| stream.flush())
        .map_err(|source| TluiError::Io {
            target: peer.to_string(),
            source,
        })?;
    debug!(event = "message_sent", peer = %peer, bytes = line.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;

    use crate::client::{Client, ClientConfig, DEFAULT_ADDR, resolve_addr};
    use crate::error::TluiError;
    use crate::message::Outbound;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn config_defaults_to_local_line_server() {
        let config = ClientConfig::from_lookup(lookup(&[])).expect("config");
        assert_eq!(config.addr, DEFAULT_ADDR);
        assert_eq!(config.max_line_bytes, None);
    }

    #[test]
    fn config_reads_env_overrides() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("TLUI_ADDR", "10.0.0.2:9000"),
            ("TLUI_MAX_LINE_BYTES", "4096"),
        ]))
        .expect("config");
        assert_eq!(config.addr, "10.0.0.2:9000");
        assert_eq!(config.max_line_bytes, Some(4096));
    }

    #[test]
    fn config_rejects_bad_line_cap() {
        let err = ClientConfig::from_lookup(lookup(&[("TLUI_MAX_LINE_BYTES", "lots")]))
            .expect_err("must fail");
        assert!(format!("{err}").contains("TLUI_MAX_LINE_BYTES"));
    }

    #[test]
    fn resolve_addr_rejects_missing_port() {
        let err = resolve_addr("not an address").expect_err("must fail");
        assert!(matches!(err, TluiError::InvalidAddress(_)));
    }

    #[test]
    fn client_handshakes_reads_updates_and_stops_on_quit() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let backend = thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut writer = stream;

            let mut first = String::new();
            reader.read_line(&mut first).expect("read handshake");

            writer
                .write_all(b"{\"status\":\"hello\"}\n{\"should_")
                .expect("write");
            writer.write_all(b"quit\":true}\n").expect("write");

            let mut second = String::new();
            reader.read_line(&mut second).expect("read command");
            (first, second)
        });

        let config = ClientConfig::default().with_addr(addr.to_string());
        let mut client = Client::connect(&config).expect("connect");
        let mut updates = 0;
        client.run(|_, _| updates += 1).expect("run");
        client
            .send(&Outbound::Command("done".to_string()))
            .expect("send");

        assert!(updates >= 1);
        assert!(client.session().state().quit_requested);
        assert_eq!(client.session().state().status.as_deref(), Some("hello"));

        let (first, second) = backend.join().expect("backend thread");
        assert_eq!(first, "{\"ui_connected\":true}\n");
        assert_eq!(second, "{\"command\":\"done\"}\n");
        client.close().expect("close");
    }
}
