use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};
use rand::Rng;

use crate::cache::{Cache, NullCache};
use crate::db::Backend;
use crate::errors::DictError;
use crate::handlers;
use crate::matching::StrategyRegistry;
use crate::net::{Conn, Connection};
use crate::parser;
use crate::pgsql::{PgBackend, PgSettings};
use crate::rediscache::{RedisCache, RedisShared};

pub enum BackendConfig {
    Pgsql(PgSettings),
}

pub enum CacheConfig {
    None,
    Redis(Arc<RedisShared>),
}

/// Everything configuration-derived that a session needs, built once at
/// startup and shared read-only across sessions.
pub struct Server {
    pub server_string: String,
    pub domain: String,
    pub server_info: Option<PathBuf>,
    pub strategies: StrategyRegistry,
    pub debug: bool,
    pub backend: BackendConfig,
    pub cache: CacheConfig,
}

impl Server {
    pub fn new_backend(&self) -> Box<dyn Backend> {
        match &self.backend {
            BackendConfig::Pgsql(settings) => Box::new(PgBackend::new(settings.clone())),
        }
    }

    pub fn new_cache(&self) -> Box<dyn Cache> {
        match &self.cache {
            CacheConfig::None => Box::new(NullCache),
            CacheConfig::Redis(shared) => Box::new(RedisCache::new(shared.clone())),
        }
    }
}

fn send_banner(server: &Server, conn: &mut dyn Conn) -> Result<(), DictError> {
    let fqdn = hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string());
    let mut rng = rand::thread_rng();
    let msg_id = format!(
        "<{}.{}@{}>",
        rng.gen_range(0, 10_000u32),
        rng.gen_range(0, 10_000u32),
        server.domain
    );
    conn.write_status(220, &format!("{} {} {}", fqdn, server.server_string, msg_id))
}

fn run_commands(
    server: &Server,
    conn: &mut dyn Conn,
    backend: &mut dyn Backend,
    cache: &mut dyn Cache,
) -> Result<(), DictError> {
    send_banner(server, conn)?;
    loop {
        let line = conn.read_line()?;
        match parser::parse(&line, server.debug) {
            Ok(command) => {
                if handlers::handle_command(server, conn, backend, cache, &command)? {
                    return Ok(());
                }
            }
            Err(verb) => handlers::handle_syntax_error(conn, verb)?,
        }
    }
}

fn session(server: &Server, conn: &mut dyn Conn, backend: &mut dyn Backend, cache: &mut dyn Cache) {
    match run_commands(server, conn, backend, cache) {
        Ok(()) => (),
        Err(DictError::BackendError(msg)) | Err(DictError::VirtualDatabase(msg)) => {
            error!("{}", msg);
            let _ = conn.write_status(420, "Server temporarily unavailable");
        }
        Err(
            err @ DictError::IoError(_)
            | err @ DictError::EncodingError(_)
            | err @ DictError::Eof
            | err @ DictError::Timeout
            | err @ DictError::LineTooLong,
        ) => {
            error!("{}", err);
        }
        Err(err) => {
            error!("unexpected error: {}", err);
        }
    }
}

/// One session over one accepted connection: banner, command loop, teardown.
pub fn process_session(server: &Server, stream: TcpStream, addr: SocketAddr) {
    info!("session started from address {}", addr);
    let mut conn = Connection::new(stream);
    let mut backend = server.new_backend();
    let mut cache = server.new_cache();
    session(server, &mut conn, backend.as_mut(), cache.as_mut());
    if let Err(err) = backend.close() {
        error!("{}", err);
    }
    if let Err(err) = cache.close() {
        error!("{}", err);
    }
    info!("session ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::DatabaseEntry;
    use std::collections::VecDeque;

    struct ScriptedConn {
        input: VecDeque<String>,
        lines: Vec<String>,
    }

    impl ScriptedConn {
        fn new(lines: &[&str]) -> ScriptedConn {
            ScriptedConn {
                input: lines.iter().map(|s| s.to_string()).collect(),
                lines: Vec::new(),
            }
        }
    }

    impl Conn for ScriptedConn {
        fn read_line(&mut self) -> Result<String, DictError> {
            self.input.pop_front().ok_or(DictError::Eof)
        }

        fn write_line(&mut self, line: &str, _split: bool) -> Result<(), DictError> {
            self.lines.push(line.to_string());
            Ok(())
        }

        fn write_text_end(&mut self) -> Result<(), DictError> {
            self.lines.push(".".to_string());
            Ok(())
        }
    }

    struct FailingBackend;

    impl Backend for FailingBackend {
        fn connect(&mut self) -> Result<(), DictError> {
            Ok(())
        }
        fn close(&mut self) -> Result<(), DictError> {
            Ok(())
        }
        fn get_databases(&mut self) -> Result<Vec<DatabaseEntry>, DictError> {
            Err(DictError::BackendError("connection refused".to_string()))
        }
        fn get_database_info(&mut self, _db: &str) -> Result<(bool, Option<String>), DictError> {
            Err(DictError::BackendError("connection refused".to_string()))
        }
        fn get_words(&mut self, _db: &str) -> Result<Vec<String>, DictError> {
            Err(DictError::BackendError("connection refused".to_string()))
        }
        fn get_virtual_database(&mut self, _db: &str) -> Result<Vec<String>, DictError> {
            Err(DictError::BackendError("connection refused".to_string()))
        }
        fn get_definitions(&mut self, _db: &str, _w: &str) -> Result<Vec<String>, DictError> {
            Err(DictError::BackendError("connection refused".to_string()))
        }
    }

    fn test_server() -> Server {
        Server {
            server_string: "wordbase 0.1".to_string(),
            domain: "example.com".to_string(),
            server_info: None,
            strategies: StrategyRegistry::new(),
            debug: false,
            backend: BackendConfig::Pgsql(PgSettings::from_config(None).unwrap()),
            cache: CacheConfig::None,
        }
    }

    fn run_scripted(input: &[&str]) -> Vec<String> {
        let server = test_server();
        let mut conn = ScriptedConn::new(input);
        let mut backend = FailingBackend;
        let mut cache = NullCache;
        session(&server, &mut conn, &mut backend, &mut cache);
        conn.lines
    }

    #[test]
    fn banner_then_quit() {
        let lines = run_scripted(&["QUIT"]);
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("220 "));
        assert!(lines[0].contains(" wordbase 0.1 <"));
        assert!(lines[0].ends_with("@example.com>"));
        assert_eq!(lines[1], "221 Closing Connection");
    }

    #[test]
    fn banner_msg_id_is_two_decimals() {
        let lines = run_scripted(&["QUIT"]);
        let start = lines[0].find('<').unwrap();
        let end = lines[0].find('@').unwrap();
        let local = &lines[0][start + 1..end];
        let parts: Vec<&str> = local.split('.').collect();
        assert_eq!(parts.len(), 2);
        for part in parts {
            let n: u32 = part.parse().unwrap();
            assert!(n < 10_000);
            assert_eq!(part, n.to_string());
        }
    }

    #[test]
    fn syntax_error_keeps_the_session_open() {
        let lines = run_scripted(&["\u{1}garbage", "NOTACOMMAND", "STATUS extra", "QUIT"]);
        assert_eq!(lines[1], "500 Syntax error, command not recognized");
        assert_eq!(lines[2], "500 Syntax error, command not recognized");
        assert_eq!(lines[3], "210 up");
        assert_eq!(lines[4], "221 Closing Connection");
    }

    #[test]
    fn empty_lines_produce_no_response() {
        let lines = run_scripted(&["", "   ", "QUIT"]);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "221 Closing Connection");
    }

    #[test]
    fn backend_error_maps_to_420_and_ends() {
        let lines = run_scripted(&["SHOW DB", "STATUS"]);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "420 Server temporarily unavailable");
    }

    #[test]
    fn eof_ends_silently() {
        let lines = run_scripted(&["STATUS"]);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "210 up");
    }
}
