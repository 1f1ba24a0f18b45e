//! Listening-socket table inspection.
//!
//! On Linux the kernel's TCP tables are read from `/proc/net/tcp{,6}`.
//! Elsewhere a bind attempt on the loopback address stands in for it.

use std::collections::BTreeSet;

/// TCP state code for LISTEN in `/proc/net/tcp`.
const TCP_LISTEN: &str = "0A";

/// Ports in LISTEN state in one `/proc/net/tcp`-formatted table.
///
/// Each data line looks like
/// `0: 00000000:08AE 00000000:0000 0A ...`, where the local address ends
/// in the hex port and the fourth column is the state.
pub fn parse_listening_ports(table: &str) -> BTreeSet<u16> {
    table
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut columns = line.split_whitespace();
            let local = columns.nth(1)?;
            let state = columns.nth(1)?;
            if state != TCP_LISTEN {
                return None;
            }
            let (_, port_hex) = local.rsplit_once(':')?;
            u16::from_str_radix(port_hex, 16).ok()
        })
        .collect()
}

/// Whether some socket on the host is listening on `port`.
#[cfg(target_os = "linux")]
pub fn is_listening(port: u16) -> bool {
    ["/proc/net/tcp", "/proc/net/tcp6"]
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .any(|table| parse_listening_ports(&table).contains(&port))
}

#[cfg(not(target_os = "linux"))]
pub fn is_listening(port: u16) -> bool {
    use std::net::{Ipv4Addr, TcpListener};

    matches!(
        TcpListener::bind((Ipv4Addr::LOCALHOST, port)),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000:08AE 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 12345 1 0000000000000000 100 0 0 10 0
   1: 0100007F:170C 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 12346 1 0000000000000000 100 0 0 10 0
   2: 0100007F:D2F0 0100007F:08AE 01 00000000:00000000 00:00000000 00000000  1000        0 12347 1 0000000000000000 20 4 30 10 -1
";

    #[test]
    fn test_parse_listening_ports() {
        let ports = parse_listening_ports(SAMPLE);
        // 0x08AE = 2222, 0x170C = 5900; the ESTABLISHED row is ignored
        assert_eq!(ports.into_iter().collect::<Vec<_>>(), vec![2222, 5900]);
    }

    #[test]
    fn test_parse_ipv6_rows() {
        let table = "\
  sl  local_address                         remote_address                        st
   0: 00000000000000000000000000000000:0D3D 00000000000000000000000000000000:0000 0A
";
        assert!(parse_listening_ports(table).contains(&3389));
    }

    #[test]
    fn test_parse_ignores_garbage() {
        assert!(parse_listening_ports("header\nnot a row\n   0: zz:zz 0 0A\n").is_empty());
    }

    #[test]
    fn test_detects_live_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(is_listening(port));
    }
}
