use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{error, info, warn};
use rand::Rng;

use crate::config::Section;
use crate::errors::DictError;

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub enable: bool,
    pub interval: u64,
    pub timeout: u64,
}

impl MonitorSettings {
    pub fn from_config(section: Option<&Section>) -> Result<MonitorSettings, DictError> {
        let empty = Section::default();
        let section = section.unwrap_or(&empty);
        let settings = MonitorSettings {
            enable: section.get_bool("enable", true)?,
            interval: section.get_int("interval", 1u64)?,
            timeout: section.get_int("timeout", 5u64)?,
        };
        if settings.timeout == 0 {
            return Err(DictError::ConfigError(
                "invalid srvmon timeout value".to_string(),
            ));
        }
        Ok(settings)
    }
}

/// Stable non-cryptographic hash used for shard selection; must not change
/// across processes or restarts, or cached keys migrate shards.
pub fn fnv1a(key: &str) -> u64 {
    const BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = BASIS;
    for byte in key.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

fn log_status(address: &(String, u16), status: bool) {
    let (host, port) = address;
    if status {
        info!("server {}:{} is up", host, port);
    } else {
        warn!("server {}:{} is down", host, port);
    }
}

fn check_server(address: &(String, u16), timeout: Duration) -> bool {
    let addrs = match (address.0.as_str(), address.1).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(_) => return false,
    };
    for addr in addrs {
        if TcpStream::connect_timeout(&addr, timeout).is_ok() {
            return true;
        }
    }
    false
}

/// Tracks per-shard liveness. One status slot per shard; heartbeat threads
/// and `notify_server_down` write the slots without synchronisation beyond
/// the atomic itself. The per-slot race is harmless: a stale read only
/// redirects one cache call.
pub struct ServerMonitor {
    servers: Vec<(String, u16)>,
    statuses: Arc<Vec<AtomicBool>>,
    enabled: bool,
}

impl ServerMonitor {
    pub fn new(
        servers: Vec<(String, u16)>,
        settings: &MonitorSettings,
        timeout: Option<Duration>,
    ) -> ServerMonitor {
        let timeout = timeout.unwrap_or_else(|| Duration::from_secs(settings.timeout));
        let statuses: Arc<Vec<AtomicBool>> =
            Arc::new(servers.iter().map(|_| AtomicBool::new(true)).collect());
        let monitor = ServerMonitor {
            servers,
            statuses,
            enabled: settings.enable,
        };
        if monitor.enabled {
            let interval = Duration::from_secs(settings.interval);
            for (index, server) in monitor.servers.iter().enumerate() {
                let statuses = monitor.statuses.clone();
                let address = server.clone();
                thread::Builder::new()
                    .name(format!("heartbeat-{}", index))
                    .spawn(move || heartbeat(statuses, index, address, timeout, interval))
                    .unwrap_or_else(|e| {
                        error!("cannot start heartbeat thread: {}", e);
                        std::process::exit(1);
                    });
            }
        }
        monitor
    }

    /// The preferred shard for a key, or a secondary from the up-set when the
    /// preferred one is down, or `None` when nothing is up.
    pub fn get_server_index(&self, key: &str) -> Option<usize> {
        let count = self.servers.len();
        if count == 0 {
            return None;
        }
        let hash = fnv1a(key);
        let index = (hash % count as u64) as usize;
        if self.statuses[index].load(Ordering::Relaxed) {
            return Some(index);
        }
        let available: Vec<usize> = (0..count)
            .filter(|&i| self.statuses[i].load(Ordering::Relaxed))
            .collect();
        if available.is_empty() {
            return None;
        }
        Some(available[(hash % available.len() as u64) as usize])
    }

    pub fn notify_server_down(&self, index: usize) {
        if !self.enabled {
            return;
        }
        if self.statuses[index].load(Ordering::Relaxed) {
            log_status(&self.servers[index], false);
        }
        self.statuses[index].store(false, Ordering::Relaxed);
    }
}

fn heartbeat(
    statuses: Arc<Vec<AtomicBool>>,
    index: usize,
    address: (String, u16),
    timeout: Duration,
    interval: Duration,
) {
    let jitter = rand::thread_rng().gen::<f64>();
    thread::sleep(Duration::from_secs_f64(jitter));
    loop {
        let status = check_server(&address, timeout);
        if statuses[index].load(Ordering::Relaxed) != status {
            log_status(&address, status);
        }
        statuses[index].store(status, Ordering::Relaxed);
        thread::sleep(interval);
    }
}
