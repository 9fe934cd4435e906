//! Framed TCP transport for engine commands.
//!
//! Protocol: length-prefixed (u32 LE) frames.
//! Request: UTF-8 command text.
//! Response: status byte (`0` ok, `1` error) followed by the response body
//! or the error message.

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::thread;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, error, info};

use super::memory::MemoryEngine;
use super::{EngineGateway, ShardConnector};

pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

const STATUS_OK: u8 = 0;
const STATUS_ERR: u8 = 1;

/// Reads one frame; `None` on a clean EOF before the length prefix.
pub fn read_frame<R: Read>(stream: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(anyhow!("frame too large: {} bytes", len));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf)?;
    Ok(Some(buf))
}

pub fn write_frame<W: Write>(stream: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(anyhow!("frame too large: {} bytes", payload.len()));
    }
    let len = payload.len() as u32;
    stream.write_all(&len.to_le_bytes())?;
    stream.write_all(payload)?;
    stream.flush()?;
    Ok(())
}

/// Gateway to an engine listening on a TCP address.
pub struct TcpGateway {
    stream: TcpStream,
    peer: SocketAddr,
}

impl TcpGateway {
    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self { stream, peer })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl EngineGateway for TcpGateway {
    fn send(&mut self, command: &str) -> Result<()> {
        write_frame(&mut self.stream, command.as_bytes())
            .with_context(|| format!("send to {}", self.peer))
    }

    fn recv(&mut self) -> Result<Vec<u8>> {
        let frame = read_frame(&mut self.stream)
            .with_context(|| format!("recv from {}", self.peer))?
            .ok_or_else(|| anyhow!("connection to {} closed", self.peer))?;
        match frame.split_first() {
            Some((&STATUS_OK, body)) => Ok(body.to_vec()),
            Some((&STATUS_ERR, message)) => {
                bail!("{}: {}", self.peer, String::from_utf8_lossy(message))
            }
            Some((status, _)) => bail!("{}: unknown response status {status}", self.peer),
            None => bail!("{}: empty response frame", self.peer),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() != ErrorKind::NotConnected => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// One TCP address per shard, in shard order.
#[derive(Clone, Debug)]
pub struct TcpConnector {
    addrs: Vec<String>,
}

impl TcpConnector {
    pub fn new<I, S>(addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addrs: addrs.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

impl ShardConnector for TcpConnector {
    fn connect(&self, shard: usize) -> Result<Box<dyn EngineGateway>> {
        let addr = self
            .addrs
            .get(shard)
            .ok_or_else(|| anyhow!("no address configured for shard {shard}"))?;
        let gateway =
            TcpGateway::connect(addr.as_str()).with_context(|| format!("connect {addr}"))?;
        Ok(Box::new(gateway))
    }
}

/// Serves `engine` on `addr` from a background thread, one thread per
/// connection. Returns the bound address.
pub fn spawn_engine_server<A: ToSocketAddrs>(
    addr: A,
    engine: MemoryEngine,
) -> Result<(SocketAddr, thread::JoinHandle<()>)> {
    let listener = TcpListener::bind(addr)?;
    let local_addr = listener.local_addr()?;
    let handle = thread::Builder::new()
        .name("engine-server".to_string())
        .spawn(move || {
            info!("Listening on {}", local_addr);
            let mut conn_id: u64 = 0;
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!("Accept error: {:?}", e);
                        break;
                    }
                };
                conn_id += 1;
                let id = conn_id;
                debug!("Connection {} accepted", id);
                let engine = engine.handle();
                let spawned = thread::Builder::new()
                    .name(format!("engine-conn-{id}"))
                    .spawn(move || {
                        if let Err(e) = serve_connection(stream, &engine) {
                            error!("Connection {} error: {:?}", id, e);
                        }
                    });
                if let Err(e) = spawned {
                    error!("Failed to spawn connection thread: {:?}", e);
                }
            }
        })?;
    Ok((local_addr, handle))
}

fn serve_connection(mut stream: TcpStream, engine: &MemoryEngine) -> Result<()> {
    while let Some(frame) = read_frame(&mut stream)? {
        let response = std::str::from_utf8(&frame)
            .context("command is not UTF-8")
            .and_then(|command| engine.execute(command));
        let mut payload = Vec::new();
        match response {
            Ok(body) => {
                payload.push(STATUS_OK);
                payload.extend_from_slice(&body);
            }
            Err(e) => {
                payload.push(STATUS_ERR);
                payload.extend_from_slice(format!("{e:#}").as_bytes());
            }
        }
        write_frame(&mut stream, &payload)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frames_round_trip_through_a_buffer() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"status").unwrap();
        write_frame(&mut buf, b"").unwrap();
        assert_eq!(&buf[..4], &6u32.to_le_bytes());

        let mut cursor = Cursor::new(buf);
        assert_eq!(read_frame(&mut cursor).unwrap().unwrap(), b"status");
        assert_eq!(read_frame(&mut cursor).unwrap().unwrap(), b"");
        assert!(read_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_FRAME_LEN as u32) + 1).to_le_bytes());
        let err = read_frame(&mut Cursor::new(buf)).unwrap_err();
        assert!(err.to_string().contains("frame too large"));
    }

    #[test]
    fn truncated_frame_is_an_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_le_bytes());
        buf.extend_from_slice(b"abc");
        assert!(read_frame(&mut Cursor::new(buf)).is_err());
    }

    #[test]
    fn gateway_talks_to_engine_server() -> Result<()> {
        let (addr, _handle) = spawn_engine_server("127.0.0.1:0", MemoryEngine::new())?;
        let mut gateway = TcpGateway::connect(addr)?;
        assert_eq!(gateway.query("table_create Docs")?, b"true");
        assert_eq!(gateway.query("table_list")?, br#"["Docs"]"#);

        let err = gateway.query("select Missing").unwrap_err();
        assert!(format!("{err:#}").contains("table not found"));

        // The connection stays usable after an error response.
        assert_eq!(gateway.query("status")?, br#"{"tables":1}"#);
        gateway.close()?;
        Ok(())
    }
}
