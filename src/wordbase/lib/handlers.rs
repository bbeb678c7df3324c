use std::fs;
use std::time::Instant;

use log::{debug, info};

use crate::cache::{self, Cache};
use crate::core::Server;
use crate::db::{invalid_db, Backend, DatabaseEntry};
use crate::errors::DictError;
use crate::helpmsg;
use crate::matching::{self, StrategyRegistry, WordFilter};
use crate::net::{Conn, NullConnection};
use crate::parser::{Command, ShowParam};

/// Wildcard iteration in `db_order` halts at this name.
pub const STOP_DB_NAME: &str = "--exit--";

/// Escaping for text inside quoted status parameters.
fn escaped(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

fn send_text(conn: &mut dyn Conn, text: &str) -> Result<(), DictError> {
    for line in text.lines() {
        conn.write_line(line, true)?;
    }
    Ok(())
}

fn validate_db_name(name: &str) -> Result<(), DictError> {
    if name == STOP_DB_NAME {
        Err(invalid_db(name))
    } else {
        Ok(())
    }
}

/// Translates per-command lookup failures into their status lines; everything
/// else keeps propagating to the session.
fn query_error_boundary(
    conn: &mut dyn Conn,
    result: Result<(), DictError>,
) -> Result<(), DictError> {
    match result {
        Err(DictError::InvalidDatabase(name)) => {
            debug!("invalid database: {}", name);
            conn.write_status(550, "Invalid database, use \"SHOW DB\" for list of databases")
        }
        Err(DictError::InvalidStrategy(name)) => {
            debug!("invalid strategy: {}", name);
            conn.write_status(551, "Invalid strategy, use \"SHOW STRAT\" for a list of strategies")
        }
        other => other,
    }
}

pub fn handle_syntax_error(
    conn: &mut dyn Conn,
    verb: Option<&'static str>,
) -> Result<(), DictError> {
    let (code, message) = match verb {
        None => (500, "Syntax error, command not recognized"),
        Some(_) => (501, "Syntax error, illegal parameters"),
    };
    conn.write_status(code, message)
}

/// Dispatches one parsed command. Returns true when the session should end.
pub fn handle_command(
    server: &Server,
    conn: &mut dyn Conn,
    backend: &mut dyn Backend,
    cache: &mut dyn Cache,
    command: &Command,
) -> Result<bool, DictError> {
    match command {
        Command::Empty => Ok(false),
        Command::Quit => {
            conn.write_status(221, "Closing Connection")?;
            Ok(true)
        }
        Command::Help => {
            handle_help(conn)?;
            Ok(false)
        }
        Command::Status => {
            conn.write_status(210, "up")?;
            Ok(false)
        }
        Command::Client(text) => {
            info!("client: {}", text);
            conn.write_status(250, "ok")?;
            Ok(false)
        }
        Command::Show(param) => {
            handle_show(server, conn, backend, cache, param)?;
            Ok(false)
        }
        Command::Match {
            database,
            strategy,
            word,
        } => {
            let result = handle_match(server, conn, backend, cache, database, strategy, word);
            query_error_boundary(conn, result)?;
            Ok(false)
        }
        Command::Define { database, word } => {
            let result = handle_define(server, conn, backend, cache, database, word);
            query_error_boundary(conn, result)?;
            Ok(false)
        }
        Command::Option | Command::Auth | Command::SaslAuth | Command::SaslResp => {
            conn.write_status(502, "Command not implemented")?;
            Ok(false)
        }
        Command::Time { count, command } => {
            handle_time(server, conn, backend, cache, *count, command)?;
            Ok(false)
        }
    }
}

fn handle_help(conn: &mut dyn Conn) -> Result<(), DictError> {
    conn.write_status(113, "help text follows")?;
    conn.write_text(helpmsg::HELP_LINES)?;
    conn.write_status(250, "ok")
}

fn handle_show(
    server: &Server,
    conn: &mut dyn Conn,
    backend: &mut dyn Backend,
    _cache: &mut dyn Cache,
    param: &ShowParam,
) -> Result<(), DictError> {
    match param {
        ShowParam::Databases => show_db(conn, backend),
        ShowParam::Strategies => show_strat(server, conn),
        ShowParam::Info(database) => {
            let result = show_info(conn, backend, database);
            query_error_boundary(conn, result)
        }
        ShowParam::Server => show_server(server, conn),
    }
}

fn show_db(conn: &mut dyn Conn, backend: &mut dyn Backend) -> Result<(), DictError> {
    let dbs: Vec<DatabaseEntry> = backend
        .get_databases()?
        .into_iter()
        .filter(|db| db.name != STOP_DB_NAME)
        .collect();
    if dbs.is_empty() {
        return conn.write_status(554, "No databases present");
    }
    conn.write_status(110, &format!("{} databases present - text follows", dbs.len()))?;
    for db in &dbs {
        conn.write_line(&format!("{} \"{}\"", db.name, escaped(&db.short_desc)), true)?;
    }
    conn.write_text_end()?;
    conn.write_status(250, "ok")
}

fn show_strat(server: &Server, conn: &mut dyn Conn) -> Result<(), DictError> {
    let strats = server.strategies.list();
    if strats.is_empty() {
        return conn.write_status(555, "No strategies available");
    }
    conn.write_status(111, &format!("{} strategies available - text follows", strats.len()))?;
    for (name, desc) in strats {
        conn.write_line(&format!("{} \"{}\"", name, escaped(desc)), true)?;
    }
    conn.write_text_end()
}

fn show_info(
    conn: &mut dyn Conn,
    backend: &mut dyn Backend,
    database: &str,
) -> Result<(), DictError> {
    validate_db_name(database)?;
    let (is_virtual, info) = backend.get_database_info(database)?;
    conn.write_status(112, "database information follows")?;
    match info {
        Some(ref text) if !text.is_empty() => send_text(conn, text)?,
        _ => {
            if is_virtual {
                for name in backend.get_virtual_database(database)? {
                    conn.write_line(
                        &format!("================ {} ================", name),
                        true,
                    )?;
                    let (_, member_info) = backend.get_database_info(&name)?;
                    if let Some(ref text) = member_info {
                        if !text.is_empty() {
                            send_text(conn, text)?;
                        }
                    }
                }
            }
        }
    }
    conn.write_text_end()?;
    conn.write_status(250, "ok")
}

fn show_server(server: &Server, conn: &mut dyn Conn) -> Result<(), DictError> {
    let info_text = match &server.server_info {
        Some(path) => Some(fs::read_to_string(path)?),
        None => None,
    };
    conn.write_status(114, "server information follows")?;
    conn.write_line(&server.server_string, true)?;
    let os = os_info::get();
    conn.write_line(&format!("{} {}", os.os_type(), os.version()), true)?;
    if let Some(text) = info_text {
        for line in text.lines() {
            conn.write_line(line, true)?;
        }
    }
    conn.write_text_end()?;
    conn.write_status(250, "ok")
}

fn cache_get(cache: &mut dyn Cache, key: &str) -> Option<Vec<u8>> {
    match cache.get(key) {
        Ok(value) => value,
        Err(err) => {
            debug!("cache get failed for {}: {}", key, err);
            None
        }
    }
}

fn cache_set(cache: &mut dyn Cache, key: &str, value: &[u8]) {
    if let Err(err) = cache.set(key, value) {
        debug!("cache set failed for {}: {}", key, err);
    }
}

fn cached_list(cache: &mut dyn Cache, key: &str) -> Option<Vec<String>> {
    let data = cache_get(cache, key)?;
    match cache::parse_list(&data) {
        Ok(items) => Some(items),
        Err(err) => {
            debug!("{}", err);
            None
        }
    }
}

/// Word list and its preprocessed twin for one real dictionary, cache first,
/// backend on miss.
fn retrieve_words(
    backend: &mut dyn Backend,
    cache: &mut dyn Cache,
    db_name: &str,
) -> Result<(Vec<String>, Vec<String>), DictError> {
    let words_key = cache::words_key(db_name);
    let preproc_key = cache::preproc_key(db_name);

    let words = match cached_list(cache, &words_key) {
        Some(words) => words,
        None => {
            let words = backend.get_words(db_name)?;
            cache_set(cache, &words_key, &cache::format_list(&words));
            words
        }
    };

    let preprocessed = match cached_list(cache, &preproc_key) {
        Some(preprocessed) => preprocessed,
        None => {
            let preprocessed = matching::preprocessed(&words);
            cache_set(cache, &preproc_key, &cache::format_list(&preprocessed));
            preprocessed
        }
    };

    Ok((words, preprocessed))
}

fn match_one(
    backend: &mut dyn Backend,
    cache: &mut dyn Cache,
    filter: &WordFilter,
    db_name: &str,
    word: &str,
) -> Result<Vec<String>, DictError> {
    let (words, preprocessed) = retrieve_words(backend, cache, db_name)?;
    Ok(filter.filter(word, &words, &preprocessed))
}

/// Resolves the database selector and collects `(db, matches)` pairs.
/// `*` and `!` walk real dictionaries in `db_order` up to the stop marker;
/// `!` ends at the first dictionary with matches.
fn find_matches(
    registry: &StrategyRegistry,
    backend: &mut dyn Backend,
    cache: &mut dyn Cache,
    dbs: &[DatabaseEntry],
    database: &str,
    strategy: &str,
    word: &str,
) -> Result<Vec<(String, Vec<String>)>, DictError> {
    validate_db_name(database)?;
    let strat = if strategy == "." { None } else { Some(strategy) };
    let filter = registry.get_filter(strat)?;

    let mut results = Vec::new();
    if database == "*" || database == "!" {
        for entry in dbs {
            if entry.is_virtual {
                continue;
            }
            if entry.name == STOP_DB_NAME {
                break;
            }
            let matches = match_one(backend, cache, &filter, &entry.name, word)?;
            let found = !matches.is_empty();
            results.push((entry.name.clone(), matches));
            if database == "!" && found {
                break;
            }
        }
    } else {
        let entry = dbs
            .iter()
            .find(|entry| entry.name == database)
            .ok_or_else(|| invalid_db(database))?;
        if entry.is_virtual {
            for name in backend.get_virtual_database(database)? {
                let matches = match_one(backend, cache, &filter, &name, word)?;
                results.push((name, matches));
            }
        } else {
            let matches = match_one(backend, cache, &filter, &entry.name, word)?;
            results.push((entry.name.clone(), matches));
        }
    }
    Ok(results)
}

fn handle_match(
    server: &Server,
    conn: &mut dyn Conn,
    backend: &mut dyn Backend,
    cache: &mut dyn Cache,
    database: &str,
    strategy: &str,
    word: &str,
) -> Result<(), DictError> {
    let dbs = backend.get_databases()?;
    let results = find_matches(&server.strategies, backend, cache, &dbs, database, strategy, word)?;
    let num_matches: usize = results.iter().map(|(_, matches)| matches.len()).sum();

    if num_matches == 0 {
        return conn.write_status(552, "No match");
    }

    conn.write_status(152, &format!("{} matches found - text follows", num_matches))?;
    for (name, matches) in &results {
        for m in matches {
            conn.write_line(&format!("{} \"{}\"", name, escaped(m)), true)?;
        }
    }
    conn.write_text_end()?;
    conn.write_status(250, "ok")
}

fn handle_define(
    server: &Server,
    conn: &mut dyn Conn,
    backend: &mut dyn Backend,
    cache: &mut dyn Cache,
    database: &str,
    word: &str,
) -> Result<(), DictError> {
    let dbs = backend.get_databases()?;
    let results = find_matches(&server.strategies, backend, cache, &dbs, database, "exact", word)?;

    let mut entries: Vec<(String, String, Vec<String>)> = Vec::new();
    let mut num_defs = 0;
    for (name, matches) in results {
        for matched in matches {
            let defs = backend.get_definitions(&name, &matched)?;
            num_defs += defs.len();
            entries.push((name.clone(), matched, defs));
        }
    }

    if num_defs == 0 {
        return conn.write_status(552, "No match");
    }

    conn.write_status(150, &format!("{} definitions retrieved - definitions follow", num_defs))?;
    for (name, matched, defs) in &entries {
        let short_desc = dbs
            .iter()
            .find(|entry| entry.name == *name)
            .map(|entry| entry.short_desc.clone())
            .unwrap_or_default();
        for definition in defs {
            conn.write_status(
                151,
                &format!(
                    "\"{}\" {} \"{}\" - text follows",
                    escaped(matched),
                    name,
                    escaped(&short_desc)
                ),
            )?;
            send_text(conn, definition)?;
            conn.write_text_end()?;
        }
    }
    conn.write_status(250, "ok")
}

/// Runs the subcommand `count` times against a sink connection, once for
/// real, then reports the elapsed time of the sink runs.
fn handle_time(
    server: &Server,
    conn: &mut dyn Conn,
    backend: &mut dyn Backend,
    cache: &mut dyn Cache,
    count: u32,
    command: &Command,
) -> Result<(), DictError> {
    let start = Instant::now();
    let mut null_conn = NullConnection;
    for _ in 0..count {
        handle_command(server, &mut null_conn, backend, cache, command)?;
    }
    let elapsed = start.elapsed().as_secs_f64();

    handle_command(server, conn, backend, cache, command)?;

    conn.write_status(280, &format!("time: {:.3} s", elapsed))
}
