use std::net::{Ipv4Addr, TcpListener};

/// Check whether `port` can currently be bound on loopback.
///
/// Callers run this before [`crate::Supervisor::start`]; the supervisor
/// itself never probes. A `true` result is only a snapshot, another process
/// can still grab the port before dufs does.
pub fn port_available(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}
