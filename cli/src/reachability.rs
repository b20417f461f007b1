//! Network reachability by periodic TCP probes to the ingest host.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use livestream_engine::Reachability;
use livestream_transport::DEFAULT_RTMP_PORT;
use tracing::{debug, info, warn};
use url::Url;

/// Granularity at which a sleeping probe notices shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Host and port to probe for a server URL.
pub fn probe_target(server_url: &str) -> Option<(String, u16)> {
    let url = Url::parse(server_url).ok()?;
    let host = url.host_str()?.to_string();
    Some((host, url.port().unwrap_or(DEFAULT_RTMP_PORT)))
}

/// Single connectivity check.
pub fn probe(host: &str, port: u16, timeout: Duration) -> Reachability {
    let addrs = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!(host, "Name resolution failed: {}", e);
            return Reachability::Unreachable;
        }
    };

    for addr in addrs {
        if TcpStream::connect_timeout(&addr, timeout).is_ok() {
            return Reachability::Reachable;
        }
    }
    Reachability::Unreachable
}

/// Probe `host:port` every `interval`, reporting changes on `tx` until
/// `running` is cleared. The network is assumed reachable at start.
pub fn spawn_monitor(
    host: String,
    port: u16,
    interval: Duration,
    timeout: Duration,
    tx: Sender<Reachability>,
    running: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("reachability".to_string())
        .spawn(move || {
            info!(host = %host, port, "Reachability monitor started");
            let mut last = Reachability::Reachable;

            while running.load(Ordering::SeqCst) {
                let current = probe(&host, port, timeout);
                if current != last {
                    match current {
                        Reachability::Reachable => info!("Ingest host reachable again"),
                        Reachability::Unreachable => warn!("Ingest host unreachable"),
                    }
                    if tx.send(current).is_err() {
                        break;
                    }
                    last = current;
                }

                let wake_at = Instant::now() + interval;
                while running.load(Ordering::SeqCst) && Instant::now() < wake_at {
                    thread::sleep(SHUTDOWN_POLL.min(wake_at.saturating_duration_since(Instant::now())));
                }
            }

            debug!("Reachability monitor stopped");
        })
}
