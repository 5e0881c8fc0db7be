//! Listener and connection spawning.

use crate::runtime::RuntimeConfig;
use may::net::{TcpListener, TcpStream};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// A running server. Lets callers block until the port accepts
/// connections, wait for shutdown, or cancel the accept loop.
pub struct ServerHandle {
    addr: SocketAddr,
    handle: may::coroutine::JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener actually bound to. Useful with port 0.
    #[must_use]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Block until the listener accepts TCP connections, or the timeout
    /// elapses.
    pub fn wait_ready(&self, timeout: Duration) -> io::Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            match std::net::TcpStream::connect_timeout(&self.addr, Duration::from_millis(100)) {
                Ok(_) => return Ok(()),
                Err(e) if Instant::now() >= deadline => return Err(e),
                Err(_) => std::thread::sleep(Duration::from_millis(10)),
            }
        }
    }

    /// Cancel the accept loop and wait for it to unwind.
    pub fn stop(self) {
        // SAFETY: the accept coroutine only blocks in may-aware accept/IO
        // calls, which are cancellation points; it holds no locks across
        // them.
        #[allow(unsafe_code)]
        unsafe {
            self.handle.coroutine().cancel();
        }
        let _ = self.handle.join();
    }

    /// Block until the accept loop exits on its own.
    pub fn join(self) {
        let _ = self.handle.join();
    }
}

/// Bind `addr` and run an accept loop, spawning one coroutine per
/// connection which runs `on_connection` to completion.
pub fn start<F>(addr: &str, runtime: RuntimeConfig, on_connection: F) -> io::Result<ServerHandle>
where
    F: Fn(TcpStream) + Send + Sync + 'static,
{
    let listener = TcpListener::bind(addr)?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "listening");
    let on_connection = Arc::new(on_connection);
    let stack_size = runtime.stack_size;
    // SAFETY: stack_size comes from RuntimeConfig and the closure owns
    // everything it touches; nothing borrows from the spawning frame.
    #[allow(unsafe_code)]
    let handle = unsafe {
        may::coroutine::Builder::new()
            .name("grackle-accept".to_string())
            .stack_size(stack_size)
            .spawn(move || {
                for incoming in listener.incoming() {
                    match incoming {
                        Ok(stream) => {
                            let on_connection = Arc::clone(&on_connection);
                            let spawned = may::coroutine::Builder::new()
                                .stack_size(stack_size)
                                .spawn(move || on_connection(stream));
                            if let Err(e) = spawned {
                                error!(error = %e, "failed to spawn connection coroutine");
                            }
                        }
                        Err(e) => warn!(error = %e, "accept failed"),
                    }
                }
            })
    }?;
    Ok(ServerHandle {
        addr: local_addr,
        handle,
    })
}
