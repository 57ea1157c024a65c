use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;

/// Short enough that a full /24 sweep finishes quickly.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(10);

/// Whether something accepts TCP connections on `addr` within `timeout`.
///
/// Refused, timed out and unreachable all read as `false`.
pub async fn is_port_open(addr: SocketAddr, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            tracing::trace!("Probe {} failed: {}", addr, e);
            false
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_and_closed_ports() -> std::io::Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let open = listener.local_addr()?;
        assert!(is_port_open(open, Duration::from_millis(500)).await);

        drop(listener);
        assert!(!is_port_open(open, Duration::from_millis(500)).await);
        Ok(())
    }

    #[tokio::test]
    async fn test_unroutable_host_times_out() {
        // TEST-NET-1 is never routed; the probe must give up on its own.
        let addr: SocketAddr = "192.0.2.1:50051".parse().unwrap();
        let started = std::time::Instant::now();
        assert!(!is_port_open(addr, Duration::from_millis(50)).await);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}
