use std::net::{SocketAddr, TcpStream};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

use log::{debug, error, warn};

use crate::config::Section;
use crate::errors::DictError;

pub type SessionTask = Arc<dyn Fn(TcpStream, SocketAddr) + Send + Sync>;

/// Hands accepted connections to session workers, bounded by `max-clients`.
pub trait Dispatcher {
    fn dispatch(&self, task: SessionTask, sock: TcpStream, addr: SocketAddr);

    /// Blocks until all running sessions have finished.
    fn drain(&self);
}

pub fn max_clients_from_config(section: Option<&Section>) -> Result<usize, DictError> {
    let empty = Section::default();
    let section = section.unwrap_or(&empty);
    section.get_int("max-clients", 20usize)
}

pub fn new_dispatcher(kind: &str, max_clients: usize) -> Result<Box<dyn Dispatcher>, DictError> {
    match kind {
        "thread" => Ok(Box::new(ThreadDispatcher::new(max_clients))),
        "fork" => Ok(Box::new(ForkDispatcher::new(max_clients))),
        other => Err(DictError::ConfigError(format!(
            "unknown mp module: {}",
            other
        ))),
    }
}

/// One thread per session, capped by a counting semaphore.
pub struct ThreadDispatcher {
    max_clients: usize,
    active: Arc<(Mutex<usize>, Condvar)>,
}

struct ActiveGuard(Arc<(Mutex<usize>, Condvar)>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let (lock, cvar) = &*self.0;
        let mut active = lock.lock().unwrap();
        *active -= 1;
        cvar.notify_all();
    }
}

impl ThreadDispatcher {
    pub fn new(max_clients: usize) -> ThreadDispatcher {
        ThreadDispatcher {
            max_clients,
            active: Arc::new((Mutex::new(0), Condvar::new())),
        }
    }
}

impl Dispatcher for ThreadDispatcher {
    fn dispatch(&self, task: SessionTask, sock: TcpStream, addr: SocketAddr) {
        {
            let (lock, cvar) = &*self.active;
            let mut active = lock.lock().unwrap();
            if *active >= self.max_clients {
                warn!("max-clients limit exceeded; waiting for a thread to terminate");
                while *active >= self.max_clients {
                    active = cvar.wait(active).unwrap();
                }
            }
            *active += 1;
        }
        let guard = ActiveGuard(self.active.clone());
        thread::spawn(move || {
            let _guard = guard;
            debug!("thread started");
            if catch_unwind(AssertUnwindSafe(|| task(sock, addr))).is_err() {
                error!("unhandled panic in session thread");
            }
            debug!("thread exiting");
        });
    }

    fn drain(&self) {
        let (lock, cvar) = &*self.active;
        let mut active = lock.lock().unwrap();
        while *active > 0 {
            active = cvar.wait(active).unwrap();
        }
    }
}

/// One child process per session. Children are reaped non-blockingly at each
/// dispatch, so a zombie lives at most until the next connection arrives.
pub struct ForkDispatcher {
    max_clients: usize,
    children: Mutex<Vec<libc::pid_t>>,
}

impl ForkDispatcher {
    pub fn new(max_clients: usize) -> ForkDispatcher {
        ForkDispatcher {
            max_clients,
            children: Mutex::new(Vec::new()),
        }
    }

    fn reap(&self) {
        let mut children = self.children.lock().unwrap();
        loop {
            let mut status: libc::c_int = 0;
            let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
            if pid <= 0 {
                break;
            }
            children.retain(|&child| child != pid);
            debug!("child process {} terminated", pid);
        }
    }

    fn active(&self) -> usize {
        self.children.lock().unwrap().len()
    }
}

impl Dispatcher for ForkDispatcher {
    fn dispatch(&self, task: SessionTask, sock: TcpStream, addr: SocketAddr) {
        self.reap();
        let mut overload_logged = false;
        while self.active() >= self.max_clients {
            if !overload_logged {
                warn!("max-clients limit exceeded; waiting for a child to terminate");
                overload_logged = true;
            }
            thread::sleep(Duration::from_secs(1));
            self.reap();
        }

        let pid = unsafe { libc::fork() };
        if pid == 0 {
            debug!("process started");
            let status = match catch_unwind(AssertUnwindSafe(|| task(sock, addr))) {
                Ok(()) => 0,
                Err(_) => {
                    error!("unhandled panic in session process");
                    1
                }
            };
            debug!("process exiting");
            unsafe { libc::_exit(status) };
        } else if pid < 0 {
            error!("fork failed: {}", std::io::Error::last_os_error());
        } else {
            self.children.lock().unwrap().push(pid);
            // the child owns the connection now
            drop(sock);
        }
    }

    fn drain(&self) {
        loop {
            self.reap();
            if self.active() == 0 {
                return;
            }
            thread::sleep(Duration::from_secs(1));
        }
    }
}
