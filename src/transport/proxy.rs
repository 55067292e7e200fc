//! PROXY protocol header stripping.
//!
//! Load balancers prefix forwarded connections with a header carrying the
//! original client address. Both the human-readable v1 line and the binary v2
//! block are accepted. Headers are read byte-exactly so that nothing past the
//! header is consumed from the connection.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::error::{constants, ProtocolError, Result};

const V1_PREFIX: &[u8; 6] = b"PROXY ";
const V1_MAX_LEN: usize = 107;

const V2_SIGNATURE: &[u8; 12] = b"\r\n\r\n\0\r\nQUIT\n";
const V2_HEADER_LEN: usize = 16;
const V2_IPV4_LEN: usize = 12;
const V2_IPV6_LEN: usize = 36;

/// What a PROXY header said about the forwarded connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyHeader {
    /// Health check or connection originated by the proxy itself (v2 LOCAL)
    Local,
    /// Proxy could not determine the addresses (v1 UNKNOWN, unsupported v2 family)
    Unknown,
    /// Forwarded client connection
    Proxied {
        source: SocketAddr,
        destination: SocketAddr,
    },
}

impl ProxyHeader {
    /// Original client address, if the header carried one
    pub fn source(&self) -> Option<SocketAddr> {
        match self {
            ProxyHeader::Proxied { source, .. } => Some(*source),
            _ => None,
        }
    }
}

fn invalid(reason: impl Into<String>) -> ProtocolError {
    ProtocolError::ProxyHeader(reason.into())
}

/// Read and consume one PROXY header from the start of `stream`.
pub async fn read_proxy_header<S>(stream: &mut S) -> Result<ProxyHeader>
where
    S: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 6];
    stream.read_exact(&mut prefix).await?;

    if &prefix == V1_PREFIX {
        read_v1(stream).await
    } else if prefix == V2_SIGNATURE[..6] {
        read_v2(stream, prefix).await
    } else {
        Err(invalid(constants::ERR_PROXY_SIGNATURE))
    }
}

async fn read_v1<S>(stream: &mut S) -> Result<ProxyHeader>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(V1_MAX_LEN);
    line.extend_from_slice(V1_PREFIX);

    loop {
        if line.len() >= V1_MAX_LEN {
            return Err(invalid(constants::ERR_PROXY_LINE_TOO_LONG));
        }
        let byte = stream.read_u8().await?;
        line.push(byte);
        if line.ends_with(b"\r\n") {
            break;
        }
    }

    let text = std::str::from_utf8(&line[V1_PREFIX.len()..line.len() - 2])
        .map_err(|_| invalid("PROXY v1 header is not ASCII"))?;
    trace!(header = text, "PROXY v1 header");
    parse_v1(text)
}

fn parse_v1(text: &str) -> Result<ProxyHeader> {
    let fields: Vec<&str> = text.split(' ').collect();

    match fields.first().copied() {
        Some("UNKNOWN") => Ok(ProxyHeader::Unknown),
        Some(family @ ("TCP4" | "TCP6")) => {
            let [_, src_ip, dst_ip, src_port, dst_port] = fields[..] else {
                return Err(invalid(format!("Expected 5 fields, got {}", fields.len())));
            };

            let parse_ip = |s: &str| -> Result<IpAddr> {
                let ip: IpAddr = s
                    .parse()
                    .map_err(|_| invalid(format!("Invalid address: {s}")))?;
                match (family, ip) {
                    ("TCP4", IpAddr::V4(_)) | ("TCP6", IpAddr::V6(_)) => Ok(ip),
                    _ => Err(invalid(format!("{s} does not match {family}"))),
                }
            };
            let parse_port = |s: &str| -> Result<u16> {
                s.parse()
                    .map_err(|_| invalid(format!("Invalid port: {s}")))
            };

            Ok(ProxyHeader::Proxied {
                source: SocketAddr::new(parse_ip(src_ip)?, parse_port(src_port)?),
                destination: SocketAddr::new(parse_ip(dst_ip)?, parse_port(dst_port)?),
            })
        }
        other => Err(invalid(format!("Unsupported v1 protocol: {other:?}"))),
    }
}

async fn read_v2<S>(stream: &mut S, prefix: [u8; 6]) -> Result<ProxyHeader>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; V2_HEADER_LEN];
    header[..6].copy_from_slice(&prefix);
    stream.read_exact(&mut header[6..]).await?;

    if &header[..12] != V2_SIGNATURE {
        return Err(invalid(constants::ERR_PROXY_SIGNATURE));
    }

    let ver_cmd = header[12];
    if ver_cmd >> 4 != 0x2 {
        return Err(invalid(constants::ERR_PROXY_VERSION));
    }
    let family = header[13];
    let len = u16::from_be_bytes([header[14], header[15]]) as usize;

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;

    match ver_cmd & 0x0F {
        0x0 => return Ok(ProxyHeader::Local),
        0x1 => {}
        cmd => return Err(invalid(format!("Unsupported v2 command: {cmd:#x}"))),
    }

    // Trailing TLVs past the address block are ignored
    match family {
        0x11 if len >= V2_IPV4_LEN => {
            let src = Ipv4Addr::new(payload[0], payload[1], payload[2], payload[3]);
            let dst = Ipv4Addr::new(payload[4], payload[5], payload[6], payload[7]);
            let src_port = u16::from_be_bytes([payload[8], payload[9]]);
            let dst_port = u16::from_be_bytes([payload[10], payload[11]]);
            Ok(ProxyHeader::Proxied {
                source: SocketAddr::new(IpAddr::V4(src), src_port),
                destination: SocketAddr::new(IpAddr::V4(dst), dst_port),
            })
        }
        0x21 if len >= V2_IPV6_LEN => {
            let mut src = [0u8; 16];
            let mut dst = [0u8; 16];
            src.copy_from_slice(&payload[0..16]);
            dst.copy_from_slice(&payload[16..32]);
            let src_port = u16::from_be_bytes([payload[32], payload[33]]);
            let dst_port = u16::from_be_bytes([payload[34], payload[35]]);
            Ok(ProxyHeader::Proxied {
                source: SocketAddr::new(IpAddr::V6(Ipv6Addr::from(src)), src_port),
                destination: SocketAddr::new(IpAddr::V6(Ipv6Addr::from(dst)), dst_port),
            })
        }
        0x11 | 0x21 => Err(invalid(format!("Address block too short: {len} bytes"))),
        _ => Ok(ProxyHeader::Unknown),
    }
}
