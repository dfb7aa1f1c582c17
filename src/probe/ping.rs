//! ICMP echo probe using native sockets, with a `ping` command fallback.
//!
//! Native probes run on the blocking pool so the timing is not skewed by the
//! async scheduler.

use std::io::ErrorKind;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;

use super::{resolve_address, ProbeError};

const ICMPV4_ECHO_REQUEST: u8 = 8;
const ICMPV4_ECHO_REPLY: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;
const PACKET_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq)]
enum IcmpCapability {
    Native,
    CommandOnly,
}

/// Which kind of ICMP socket the kernel handed out.
#[derive(Debug, Clone, Copy, PartialEq)]
enum SocketKind {
    Raw,
    /// Linux rewrites the echo identifier to the socket's local port.
    Datagram,
}

static ICMP_CAPABILITY: OnceLock<IcmpCapability> = OnceLock::new();

static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

/// Identifier/sequence pair so concurrent pings to one host can be told apart.
fn next_ping_id() -> (u16, u16) {
    let identifier: u16 = rand::random();
    let sequence = PING_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    (identifier, sequence)
}

fn open_icmp_socket(ip: &IpAddr) -> std::io::Result<(Socket, SocketKind)> {
    let (domain, protocol) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };
    // RAW needs CAP_NET_RAW; DGRAM works unprivileged on macOS and on Linux
    // when ping_group_range allows it.
    match Socket::new(domain, Type::RAW, Some(protocol)) {
        Ok(socket) => Ok((socket, SocketKind::Raw)),
        Err(_) => Socket::new(domain, Type::DGRAM, Some(protocol))
            .map(|socket| (socket, SocketKind::Datagram)),
    }
}

fn detect_icmp_capability() -> IcmpCapability {
    match open_icmp_socket(&IpAddr::from([127, 0, 0, 1])) {
        Ok(_) => {
            tracing::info!("Ping probe: using native ICMP sockets");
            IcmpCapability::Native
        }
        Err(e) => {
            tracing::warn!("Ping probe: native ICMP unavailable ({}), using ping command", e);
            IcmpCapability::CommandOnly
        }
    }
}

/// Send one echo request to `address` and return the round trip time.
pub async fn run_ping_probe(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let capability = *ICMP_CAPABILITY.get_or_init(detect_icmp_capability);
    if capability == IcmpCapability::CommandOnly {
        return run_ping_command(address, timeout).await;
    }

    let ip = resolve_address(address).await?;
    let result = tokio::task::spawn_blocking(move || run_blocking_ping(ip, timeout))
        .await
        .map_err(|e| ProbeError::Network(format!("ping task failed: {}", e)))?;

    match result {
        Err(ProbeError::PermissionDenied(reason)) => {
            tracing::warn!(
                "Native ping to {} was denied ({}), falling back to ping command",
                address,
                reason
            );
            run_ping_command(address, timeout).await
        }
        other => other,
    }
}

fn run_blocking_ping(ip: IpAddr, timeout: Duration) -> Result<Duration, ProbeError> {
    let (socket, kind) = open_icmp_socket(&ip).map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => ProbeError::PermissionDenied(e.to_string()),
        _ => ProbeError::Network(format!("failed to create ICMP socket: {}", e)),
    })?;
    socket
        .set_read_timeout(Some(timeout))
        .and_then(|_| socket.set_write_timeout(Some(timeout)))
        .map_err(|e| ProbeError::Network(format!("failed to set timeout: {}", e)))?;
    socket
        .connect(&SocketAddr::new(ip, 0).into())
        .map_err(|e| ProbeError::Network(format!("failed to connect: {}", e)))?;

    let (identifier, sequence) = next_ping_id();
    let expected_identifier = match kind {
        SocketKind::Raw => Some(identifier),
        SocketKind::Datagram => None,
    };
    let (packet, reply_type) = match ip {
        IpAddr::V4(_) => (
            build_echo_request(ICMPV4_ECHO_REQUEST, identifier, sequence, true),
            ICMPV4_ECHO_REPLY,
        ),
        // The kernel fills in the ICMPv6 checksum.
        IpAddr::V6(_) => (
            build_echo_request(ICMPV6_ECHO_REQUEST, identifier, sequence, false),
            ICMPV6_ECHO_REPLY,
        ),
    };

    let start = Instant::now();
    socket.send(&packet).map_err(|e| match e.kind() {
        ErrorKind::PermissionDenied => ProbeError::PermissionDenied(e.to_string()),
        _ => ProbeError::Network(format!("failed to send: {}", e)),
    })?;

    let mut buf = [MaybeUninit::<u8>::uninit(); 1500];
    loop {
        let len = socket.recv(&mut buf).map_err(|e| match e.kind() {
            ErrorKind::WouldBlock | ErrorKind::TimedOut => ProbeError::Timeout(timeout),
            _ => ProbeError::Network(format!("failed to receive: {}", e)),
        })?;
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return Err(ProbeError::Timeout(timeout));
        }

        // SAFETY: recv initialized the first `len` bytes.
        let reply: &[u8] =
            unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };
        if is_matching_reply(reply, reply_type, expected_identifier, sequence) {
            return Ok(elapsed);
        }
    }
}

/// Whether `reply` is the echo reply for our identifier and sequence.
///
/// RAW IPv4 sockets deliver the IP header in front of the ICMP message.
/// Pass `None` for `identifier` on datagram sockets, where the kernel owns it.
fn is_matching_reply(
    reply: &[u8],
    reply_type: u8,
    identifier: Option<u16>,
    sequence: u16,
) -> bool {
    let has_ip_header = reply.first().map(|b| b >> 4) == Some(4);
    let offset = if reply_type == ICMPV4_ECHO_REPLY && has_ip_header {
        usize::from(reply[0] & 0x0F) * 4
    } else {
        0
    };
    let Some(icmp) = reply.get(offset..offset + 8) else {
        return false;
    };
    icmp[0] == reply_type
        && identifier.map_or(true, |id| u16::from_be_bytes([icmp[4], icmp[5]]) == id)
        && u16::from_be_bytes([icmp[6], icmp[7]]) == sequence
}

fn build_echo_request(kind: u8, identifier: u16, sequence: u16, with_checksum: bool) -> Vec<u8> {
    let mut packet = vec![0u8; PACKET_LEN];
    packet[0] = kind;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    let stamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
    packet[8..16].copy_from_slice(&stamp.to_be_bytes());

    if with_checksum {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }
    packet
}

/// RFC 1071 internet checksum.
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

fn ping_command_args(address: &str, timeout: Duration) -> Vec<String> {
    let millis = timeout.as_millis().max(1);
    let secs = timeout.as_secs().max(1);
    let (count_flag, wait_flag, wait) = match std::env::consts::OS {
        "windows" => ("-n", "-w", millis.to_string()),
        // BSD ping takes -W in milliseconds.
        "macos" => ("-c", "-W", millis.to_string()),
        _ => ("-c", "-W", secs.to_string()),
    };
    vec![
        count_flag.to_string(),
        "1".to_string(),
        wait_flag.to_string(),
        wait,
        address.to_string(),
    ]
}

async fn run_ping_command(address: &str, timeout: Duration) -> Result<Duration, ProbeError> {
    let output = Command::new("ping")
        .args(ping_command_args(address, timeout))
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProbeError::Command(format!("failed to execute ping: {}", e)))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        if stdout.contains("100% packet loss") || stdout.contains("100.0% packet loss") {
            return Err(ProbeError::Timeout(timeout));
        }
        return Err(ProbeError::Command(format!("ping failed: {}", stdout.trim())));
    }
    parse_ping_output(&stdout)
}

/// Extract the round trip from `ping` output across Linux, macOS and Windows.
fn parse_ping_output(output: &str) -> Result<Duration, ProbeError> {
    static PER_PACKET: OnceLock<Regex> = OnceLock::new();
    static SUMMARY: OnceLock<Regex> = OnceLock::new();

    let per_packet = PER_PACKET
        .get_or_init(|| Regex::new(r"time[=<](?P<ms>[0-9.]+)\s*ms").expect("valid regex"));
    let summary = SUMMARY.get_or_init(|| {
        Regex::new(
            r"(?:round-trip|rtt)\s+min/avg/max/(?:stddev|mdev)\s*=\s*[0-9.]+/(?P<ms>[0-9.]+)/",
        )
        .expect("valid regex")
    });

    per_packet
        .captures(output)
        .or_else(|| summary.captures(output))
        .and_then(|caps| caps.name("ms")?.as_str().parse::<f64>().ok())
        .map(|ms| Duration::from_secs_f64(ms / 1000.0))
        .ok_or_else(|| ProbeError::Command(format!("failed to parse ping output: {}", output)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_validates_to_zero() {
        let packet = build_echo_request(ICMPV4_ECHO_REQUEST, 0x1234, 1, true);
        // Summing a packet including its own checksum yields 0xFFFF, i.e. !0.
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_build_echo_request_header() {
        let packet = build_echo_request(ICMPV4_ECHO_REQUEST, 0x1234, 0x0001, true);
        assert_eq!(packet.len(), PACKET_LEN);
        assert_eq!(packet[0], 8);
        assert_eq!(packet[1], 0);
        assert_eq!(packet[4..6], [0x12, 0x34]);
        assert_eq!(packet[6..8], [0x00, 0x01]);
    }

    #[test]
    fn test_matching_reply_with_ip_header() {
        let mut reply = vec![0u8; 28];
        reply[0] = 0x45;
        reply[20] = ICMPV4_ECHO_REPLY;
        reply[24..26].copy_from_slice(&7u16.to_be_bytes());
        reply[26..28].copy_from_slice(&9u16.to_be_bytes());
        assert!(is_matching_reply(&reply, ICMPV4_ECHO_REPLY, Some(7), 9));
        assert!(!is_matching_reply(&reply, ICMPV4_ECHO_REPLY, Some(7), 10));
        assert!(!is_matching_reply(&reply, ICMPV4_ECHO_REPLY, Some(8), 9));
    }

    #[test]
    fn test_matching_datagram_reply_ignores_identifier() {
        // Datagram sockets return the bare ICMP message, and the kernel has
        // swapped our identifier for the local port.
        let mut reply = build_echo_request(ICMPV4_ECHO_REPLY, 0xBEEF, 9, true);
        assert_ne!(reply[4..6], 7u16.to_be_bytes());
        assert!(is_matching_reply(&reply, ICMPV4_ECHO_REPLY, None, 9));
        assert!(!is_matching_reply(&reply, ICMPV4_ECHO_REPLY, None, 10));
        assert!(!is_matching_reply(&reply, ICMPV4_ECHO_REPLY, Some(7), 9));

        reply[0] = ICMPV4_ECHO_REQUEST;
        assert!(!is_matching_reply(&reply, ICMPV4_ECHO_REPLY, None, 9));
    }

    #[test]
    fn test_matching_datagram_reply_ipv6() {
        let reply = build_echo_request(ICMPV6_ECHO_REPLY, 0x0102, 3, false);
        assert!(is_matching_reply(&reply, ICMPV6_ECHO_REPLY, None, 3));
    }

    #[test]
    fn test_matching_reply_truncated() {
        assert!(!is_matching_reply(&[0, 0, 0], ICMPV6_ECHO_REPLY, Some(1), 1));
        assert!(!is_matching_reply(&[0, 0, 0], ICMPV4_ECHO_REPLY, None, 1));
    }

    #[test]
    fn test_parse_ping_output_linux() {
        let output = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.345 ms";
        let latency = parse_ping_output(output).unwrap();
        assert_eq!(latency.as_millis(), 12);
    }

    #[test]
    fn test_parse_ping_output_macos_summary() {
        let output = r#"PING google.com (142.250.69.174): 56 data bytes

--- google.com ping statistics ---
1 packets transmitted, 1 packets received, 0.0% packet loss
round-trip min/avg/max/stddev = 17.906/17.906/17.906/0.000 ms"#;
        let latency = parse_ping_output(output).unwrap();
        assert_eq!(latency.as_millis(), 17);
    }

    #[test]
    fn test_parse_ping_output_windows_sub_millisecond() {
        let output = "Reply from 192.168.1.1: bytes=32 time<1ms TTL=64";
        let latency = parse_ping_output(output).unwrap();
        assert_eq!(latency.as_millis(), 1);
    }

    #[test]
    fn test_parse_ping_output_garbage() {
        assert!(parse_ping_output("Request timed out.").is_err());
    }
}
