use std::ffi::CString;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{App, Arg, ArgMatches, ErrorKind};
use log::{error, info, warn, LevelFilter};

use wordbaselib::config::Config;
use wordbaselib::core::{process_session, BackendConfig, CacheConfig, Server};
use wordbaselib::errors::DictError;
use wordbaselib::master::{self, NetSettings};
use wordbaselib::matching::StrategyRegistry;
use wordbaselib::mp;
use wordbaselib::pgsql::PgSettings;
use wordbaselib::rediscache::{RedisSettings, RedisShared};
use wordbaselib::srvmon::MonitorSettings;

const PROGRAM_NAME: &str = "wordbase";
const DEFAULT_CONF_PATH: &str = "/etc/wordbase.conf";

fn build_cli() -> App<'static, 'static> {
    App::new(PROGRAM_NAME)
        .version(env!("CARGO_PKG_VERSION"))
        .about("Dictionary server implementing RFC2229")
        .arg(
            Arg::with_name("version")
                .short("v")
                .help("print version information and exit"),
        )
        .arg(
            Arg::with_name("conf")
                .short("f")
                .value_name("conf_file")
                .takes_value(true)
                .help("read the specified configuration file"),
        )
        .arg(
            Arg::with_name("daemon")
                .short("d")
                .value_name("command")
                .takes_value(true)
                .possible_values(&["start", "stop", "restart"])
                .help("daemon control command"),
        )
        .arg(Arg::with_name("debug").short("D").help("debug mode"))
}

fn print_help_hint() {
    eprintln!("Try '{} -h' for more information.", PROGRAM_NAME);
}

fn main() {
    let matches = match build_cli().get_matches_safe() {
        Ok(matches) => matches,
        Err(err) => match err.kind {
            ErrorKind::HelpDisplayed | ErrorKind::VersionDisplayed => {
                println!("{}", err.message);
                return;
            }
            _ => {
                eprintln!("{}", err.message);
                print_help_hint();
                std::process::exit(2);
            }
        },
    };

    if matches.is_present("version") {
        println!("{} {}", PROGRAM_NAME, env!("CARGO_PKG_VERSION"));
        return;
    }

    let debug = matches.is_present("debug");
    simple_logging::log_to_stderr(if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    if let Err(err) = run(&matches, debug) {
        error!("terminating on unhandled error: {}", err);
        eprintln!("{}", err);
        std::process::exit(1);
    }
}

fn run(matches: &ArgMatches, debug: bool) -> Result<(), DictError> {
    let conf_path = PathBuf::from(matches.value_of("conf").unwrap_or(DEFAULT_CONF_PATH));
    let config = Config::load(&conf_path)?;

    let wordbase = config.require_section("wordbase")?;
    let net_settings = NetSettings::from_config(wordbase)?;
    let pidfile = wordbase.get_str("pidfile", "/var/run/wordbase.pid");
    let user = wordbase.get_str("user", "");
    let group = wordbase.get_str("group", "");

    match matches.value_of("daemon") {
        Some("stop") => {
            stop_daemon(&pidfile)?;
            return Ok(());
        }
        Some("restart") => {
            if let Err(err) = stop_daemon(&pidfile) {
                warn!("could not stop a running daemon: {}", err);
            }
        }
        _ => (),
    }

    let dict = config.require_section("dict")?;
    let server_string = dict.get_str("server", PROGRAM_NAME);
    let domain = dict.get_str("domain", "example.com");
    let server_info = dict.get("info").map(PathBuf::from);
    let strategies = StrategyRegistry::from_config(&dict.get_str("strategies", ""))?;

    let (mp_kind, db_kind, cache_kind) = match config.section("modules") {
        Some(modules) => (
            modules.get_str("mp", "thread"),
            modules.get_str("db", "pgsql"),
            modules.get_str("cache", "none"),
        ),
        None => ("thread".to_string(), "pgsql".to_string(), "none".to_string()),
    };

    let backend = match db_kind.as_str() {
        "pgsql" => BackendConfig::Pgsql(PgSettings::from_config(config.section("pgsql"))?),
        other => {
            return Err(DictError::ConfigError(format!(
                "unknown db module: {}",
                other
            )))
        }
    };

    let cache = match cache_kind.as_str() {
        "none" => CacheConfig::None,
        "redis" => {
            let settings = RedisSettings::from_config(config.section("redis"))?;
            let monitor_settings = MonitorSettings::from_config(config.section("srvmon"))?;
            CacheConfig::Redis(Arc::new(RedisShared::new(settings, &monitor_settings)))
        }
        other => {
            return Err(DictError::ConfigError(format!(
                "unknown cache module: {}",
                other
            )))
        }
    };

    let max_clients = mp::max_clients_from_config(config.section(&mp_kind))?;
    let dispatcher = mp::new_dispatcher(&mp_kind, max_clients)?;

    let server = Arc::new(Server {
        server_string,
        domain,
        server_info,
        strategies,
        debug,
        backend,
        cache,
    });

    if matches.value_of("daemon").is_some() {
        // detaching is left to the service manager
        warn!("daemon mode runs in the foreground");
        write_pidfile(&pidfile)?;
    }

    let listener = master::bind(&net_settings)?;
    drop_privs(&user, &group)?;

    let task: mp::SessionTask = {
        let server = server.clone();
        Arc::new(move |sock, addr| process_session(&server, sock, addr))
    };
    master::run(listener, net_settings.timeout, dispatcher.as_ref(), task)
}

fn write_pidfile(pidfile: &str) -> Result<(), DictError> {
    fs::write(pidfile, format!("{}\n", std::process::id()))
        .map_err(|err| DictError::ConfigError(format!("cannot write {}: {}", pidfile, err)))
}

fn stop_daemon(pidfile: &str) -> Result<(), DictError> {
    let content = fs::read_to_string(pidfile)
        .map_err(|err| DictError::ConfigError(format!("cannot read {}: {}", pidfile, err)))?;
    let pid: libc::pid_t = content
        .trim()
        .parse()
        .map_err(|_| DictError::ConfigError(format!("invalid pid in {}", pidfile)))?;
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    info!("sent SIGTERM to process {}", pid);
    Ok(())
}

fn drop_privs(user: &str, group: &str) -> Result<(), DictError> {
    if user.is_empty() {
        return Ok(());
    }
    let c_user = CString::new(user)
        .map_err(|_| DictError::ConfigError(format!("invalid user name: {}", user)))?;
    unsafe {
        let pw = libc::getpwnam(c_user.as_ptr());
        if pw.is_null() {
            return Err(DictError::ConfigError(format!("unknown user: {}", user)));
        }
        let uid = (*pw).pw_uid;
        let mut gid = (*pw).pw_gid;
        if !group.is_empty() {
            let c_group = CString::new(group)
                .map_err(|_| DictError::ConfigError(format!("invalid group name: {}", group)))?;
            let gr = libc::getgrnam(c_group.as_ptr());
            if gr.is_null() {
                return Err(DictError::ConfigError(format!("unknown group: {}", group)));
            }
            gid = (*gr).gr_gid;
        }
        if libc::setgid(gid) != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        if libc::setuid(uid) != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
    }
    info!("dropped privileges to user {}", user);
    Ok(())
}
