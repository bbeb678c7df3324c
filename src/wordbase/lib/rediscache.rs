use std::sync::Arc;
use std::time::Duration;

use log::{debug, error};
use redis::{Commands, ConnectionAddr, ConnectionInfo, RedisConnectionInfo, RedisResult};

use crate::cache::Cache;
use crate::config::Section;
use crate::errors::DictError;
use crate::srvmon::{MonitorSettings, ServerMonitor};

#[derive(Debug, Clone, PartialEq)]
pub struct RedisServer {
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
}

/// Parses the comma-separated `servers` value, one shard per entry in the
/// form `[password@]host[:port][:db]`.
pub fn parse_servers(spec: &str) -> Result<Vec<RedisServer>, DictError> {
    let mut servers = Vec::new();
    for entry in spec.split(',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let (password, address) = match entry.rfind('@') {
            Some(at) => (Some(entry[..at].to_string()), &entry[at + 1..]),
            None => (None, entry),
        };

        let parts: Vec<&str> = address.split(':').collect();
        let bad = || DictError::ConfigError(format!("invalid redis connection string: {}", entry));
        let (host, port, db) = match parts.as_slice() {
            [host] => (*host, 6379, 0),
            [host, port] => (*host, port.parse().map_err(|_| bad())?, 0),
            [host, port, db] => (
                *host,
                port.parse().map_err(|_| bad())?,
                db.parse().map_err(|_| bad())?,
            ),
            _ => return Err(bad()),
        };
        if host.is_empty() {
            return Err(bad());
        }
        servers.push(RedisServer {
            host: host.to_string(),
            port,
            db,
            password,
        });
    }
    if servers.is_empty() {
        return Err(DictError::ConfigError(
            "no redis connection strings specified".to_string(),
        ));
    }
    Ok(servers)
}

#[derive(Debug, Clone)]
pub struct RedisSettings {
    pub servers: Vec<RedisServer>,
    pub timeout: Option<Duration>,
    pub ttl: u64,
}

impl RedisSettings {
    pub fn from_config(section: Option<&Section>) -> Result<RedisSettings, DictError> {
        let empty = Section::default();
        let section = section.unwrap_or(&empty);
        let servers = parse_servers(section.get("servers").unwrap_or(""))?;
        let timeout = section.get_int("timeout", 15u64)?;
        Ok(RedisSettings {
            servers,
            timeout: if timeout == 0 {
                None
            } else {
                Some(Duration::from_secs(timeout))
            },
            ttl: section.get_int("ttl", 0u64)?,
        })
    }
}

/// Per-process shard state: the parsed settings plus the liveness monitor.
/// Sessions share this and hold their own connections.
pub struct RedisShared {
    settings: RedisSettings,
    monitor: ServerMonitor,
}

impl RedisShared {
    pub fn new(settings: RedisSettings, monitor_settings: &MonitorSettings) -> RedisShared {
        let servers = settings
            .servers
            .iter()
            .map(|s| (s.host.clone(), s.port))
            .collect();
        let monitor = ServerMonitor::new(servers, monitor_settings, settings.timeout);
        RedisShared { settings, monitor }
    }
}

fn is_conn_err(err: &redis::RedisError) -> bool {
    err.kind() == redis::ErrorKind::IoError || err.is_connection_refusal()
}

/// Sharded word-list cache over Redis. Keys map to shards by FNV-1a; a down
/// shard degrades the call to a miss rather than failing the query.
pub struct RedisCache {
    shared: Arc<RedisShared>,
    connections: Vec<Option<redis::Connection>>,
}

impl RedisCache {
    pub fn new(shared: Arc<RedisShared>) -> RedisCache {
        let connections = shared.settings.servers.iter().map(|_| None).collect();
        RedisCache {
            shared,
            connections,
        }
    }

    fn connection(&mut self, index: usize) -> RedisResult<&mut redis::Connection> {
        if self.connections[index].is_none() {
            let server = &self.shared.settings.servers[index];
            let info = ConnectionInfo {
                addr: ConnectionAddr::Tcp(server.host.clone(), server.port),
                redis: RedisConnectionInfo {
                    db: server.db,
                    username: None,
                    password: server.password.clone(),
                },
            };
            let client = redis::Client::open(info)?;
            let conn = match self.shared.settings.timeout {
                Some(timeout) => client.get_connection_with_timeout(timeout)?,
                None => client.get_connection()?,
            };
            conn.set_read_timeout(self.shared.settings.timeout)?;
            conn.set_write_timeout(self.shared.settings.timeout)?;
            debug!(
                "connected to redis shard {}:{}",
                server.host, server.port
            );
            self.connections[index] = Some(conn);
        }
        match self.connections[index].as_mut() {
            Some(conn) => Ok(conn),
            None => Err((redis::ErrorKind::ClientError, "connection unavailable").into()),
        }
    }

    fn get_at(&mut self, index: usize, key: &str) -> RedisResult<Option<Vec<u8>>> {
        let ttl = self.shared.settings.ttl;
        let conn = self.connection(index)?;
        if ttl == 0 {
            conn.get(key)
        } else {
            // one round trip for the read and the expiry refresh
            let (value,): (Option<Vec<u8>>,) = redis::pipe()
                .cmd("GET")
                .arg(key)
                .cmd("EXPIRE")
                .arg(key)
                .arg(ttl)
                .ignore()
                .query(conn)?;
            Ok(value)
        }
    }

    fn set_at(&mut self, index: usize, key: &str, value: &[u8]) -> RedisResult<()> {
        let ttl = self.shared.settings.ttl;
        let conn = self.connection(index)?;
        if ttl == 0 {
            conn.set(key, value)
        } else {
            redis::pipe()
                .cmd("SET")
                .arg(key)
                .arg(value)
                .ignore()
                .cmd("EXPIRE")
                .arg(key)
                .arg(ttl)
                .ignore()
                .query(conn)
        }
    }

    /// Shard-level connection failures mark the shard down and degrade to a
    /// miss; other driver errors surface as `CacheError`.
    fn degrade<T: Default>(
        &mut self,
        index: usize,
        result: RedisResult<T>,
    ) -> Result<T, DictError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) if is_conn_err(&err) => {
                self.shared.monitor.notify_server_down(index);
                self.connections[index] = None;
                Ok(T::default())
            }
            Err(err) => {
                error!("{}", err);
                Err(DictError::CacheError(err.to_string()))
            }
        }
    }
}

impl Cache for RedisCache {
    fn connect(&mut self) -> Result<(), DictError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), DictError> {
        for conn in self.connections.iter_mut() {
            *conn = None;
        }
        Ok(())
    }

    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, DictError> {
        let index = match self.shared.monitor.get_server_index(key) {
            Some(index) => index,
            None => return Ok(None),
        };
        let result = self.get_at(index, key);
        self.degrade(index, result)
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), DictError> {
        let index = match self.shared.monitor.get_server_index(key) {
            Some(index) => index,
            None => return Ok(()),
        };
        let result = self.set_at(index, key, value);
        self.degrade(index, result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_host() {
        let servers = parse_servers("localhost").unwrap();
        assert_eq!(
            servers,
            vec![RedisServer {
                host: "localhost".to_string(),
                port: 6379,
                db: 0,
                password: None,
            }]
        );
    }

    #[test]
    fn host_port_and_db() {
        let servers = parse_servers("cache1:6380:2").unwrap();
        assert_eq!(servers[0].port, 6380);
        assert_eq!(servers[0].db, 2);
    }

    #[test]
    fn password_may_contain_at() {
        let servers = parse_servers("s3c@ret@cache1:6380").unwrap();
        assert_eq!(servers[0].password.as_deref(), Some("s3c@ret"));
        assert_eq!(servers[0].host, "cache1");
        assert_eq!(servers[0].port, 6380);
    }

    #[test]
    fn multiple_servers_keep_order() {
        let servers = parse_servers("a, b:6380 ,c").unwrap();
        let hosts: Vec<&str> = servers.iter().map(|s| s.host.as_str()).collect();
        assert_eq!(hosts, vec!["a", "b", "c"]);
    }

    #[test]
    fn invalid_strings_are_fatal() {
        assert!(parse_servers("").is_err());
        assert!(parse_servers("host:notaport").is_err());
        assert!(parse_servers("host:1:2:3").is_err());
        assert!(parse_servers("pw@").is_err());
    }

    #[test]
    fn settings_defaults() {
        use crate::config::Config;
        let config = Config::parse("[redis]\nservers = localhost\n").unwrap();
        let settings = RedisSettings::from_config(config.section("redis")).unwrap();
        assert_eq!(settings.timeout, Some(Duration::from_secs(15)));
        assert_eq!(settings.ttl, 0);
    }

    #[test]
    fn zero_timeout_disables_it() {
        use crate::config::Config;
        let config = Config::parse("[redis]\nservers = localhost\ntimeout = 0\nttl = 600\n").unwrap();
        let settings = RedisSettings::from_config(config.section("redis")).unwrap();
        assert_eq!(settings.timeout, None);
        assert_eq!(settings.ttl, 600);
    }
}
