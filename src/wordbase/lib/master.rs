use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use log::{debug, error, info};
use socket2::{Domain, Socket, Type};

use crate::config::Section;
use crate::errors::DictError;
use crate::mp::{Dispatcher, SessionTask};

#[derive(Debug, Clone)]
pub struct NetSettings {
    pub host: String,
    pub port: u16,
    pub backlog: i32,
    pub timeout: u64,
}

impl NetSettings {
    pub fn from_config(section: &Section) -> Result<NetSettings, DictError> {
        Ok(NetSettings {
            host: section.get_str("host", "localhost"),
            port: section.get_int("port", 2628u16)?,
            backlog: section.get_int("backlog", 5i32)?,
            timeout: section.get_int("timeout", 60u64)?,
        })
    }
}

static STOP: AtomicBool = AtomicBool::new(false);

extern "C" fn sigterm_handler(_signum: libc::c_int) {
    STOP.store(true, Ordering::SeqCst);
}

fn install_sigterm_handler() {
    let handler = sigterm_handler as extern "C" fn(libc::c_int);
    unsafe {
        libc::signal(libc::SIGTERM, handler as libc::sighandler_t);
    }
}

/// Builds the listening socket. Separate from `run` so privileges can be
/// dropped after binding a low port.
pub fn bind(settings: &NetSettings) -> Result<TcpListener, DictError> {
    let address: SocketAddr = (settings.host.as_str(), settings.port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            DictError::ConfigError(format!("cannot resolve listen address: {}", settings.host))
        })?;

    let domain = match address {
        SocketAddr::V4(_) => Domain::IPV4,
        SocketAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&address.into())?;
    socket.listen(settings.backlog)?;

    info!("Listening at address {}:{}", settings.host, settings.port);
    Ok(socket.into())
}

/// Accepts connections until SIGTERM, then drains running sessions.
pub fn run(
    listener: TcpListener,
    timeout: u64,
    dispatcher: &dyn Dispatcher,
    task: SessionTask,
) -> Result<(), DictError> {
    info!("Server starting");
    install_sigterm_handler();
    listener.set_nonblocking(true)?;

    info!("Waiting for connections");
    while !STOP.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((sock, addr)) => {
                debug!("Accepted connection from address {}", addr);
                sock.set_nonblocking(false)?;
                let timeout = if timeout > 0 {
                    Some(Duration::from_secs(timeout))
                } else {
                    None
                };
                sock.set_read_timeout(timeout)?;
                sock.set_write_timeout(timeout)?;
                dispatcher.dispatch(task.clone(), sock, addr);
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(100));
            }
            Err(ref err) if err.kind() == std::io::ErrorKind::Interrupted => (),
            Err(err) => error!("Could not accept connection: {}", err),
        }
    }

    info!("Caught SIGTERM, terminating");
    dispatcher.drain();
    info!("Server terminated");
    Ok(())
}
