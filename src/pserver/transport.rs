//! Byte transports for the CVS client/server protocol: a TCP socket for
//! pserver, or the stdio pipes of an `ssh ... cvs server` / `cvs server`
//! child process.
//!
//! Sockets carry their own read and write timeouts. Pipes have none, so a
//! [`Watchdog`] thread kills the child when one read or write outlives
//! the I/O timeout.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use super::ProtocolError;

/// Longest response line accepted before the stream is considered garbage.
pub const MAX_LINE: usize = 1 << 20;

pub enum Connection {
    Tcp {
        reader: BufReader<TcpStream>,
        writer: TcpStream,
    },
    Process {
        reader: BufReader<ChildStdout>,
        writer: ChildStdin,
        watchdog: Watchdog,
    },
}

impl Connection {
    pub fn tcp(host: &str, port: u16, connect_timeout: Duration, io_timeout: Duration) -> Result<Self, ProtocolError> {
        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(io_timeout))?;
                    stream.set_write_timeout(Some(io_timeout))?;
                    stream.set_nodelay(true)?;
                    debug!(%addr, "connected");
                    let writer = stream.try_clone()?;
                    return Ok(Connection::Tcp {
                        reader: BufReader::new(stream),
                        writer,
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(match last_err {
            Some(e) => ProtocolError::Io(e),
            None => ProtocolError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no address for {}:{}", host, port),
            )),
        })
    }

    /// Spawn `program args...` and talk to it over stdin/stdout.
    pub fn process(program: &str, args: &[String], io_timeout: Duration) -> Result<Self, ProtocolError> {
        debug!(program, ?args, "spawning cvs server");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| ProtocolError::Spawn {
                program: program.to_string(),
                source: e,
            })?;
        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(i), Some(o)) => (i, o),
            _ => {
                let _ = child.kill();
                return Err(ProtocolError::ConnectionClosed);
            }
        };
        Ok(Connection::Process {
            reader: BufReader::new(stdout),
            writer: stdin,
            watchdog: Watchdog::spawn(child, io_timeout),
        })
    }

    /// Run one blocking operation, under the watchdog for child processes.
    fn guarded<T>(
        &mut self,
        op: impl FnOnce(&mut dyn BufRead, &mut dyn Write) -> std::io::Result<T>,
    ) -> Result<T, ProtocolError> {
        match self {
            Connection::Tcp { reader, writer } => Ok(op(reader, writer)?),
            Connection::Process {
                reader,
                writer,
                watchdog,
            } => {
                watchdog.arm();
                let result = op(reader, writer);
                if watchdog.disarm() {
                    return Err(ProtocolError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "cvs server process stalled and was killed",
                    )));
                }
                Ok(result?)
            }
        }
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.guarded(|_, writer| {
            writer.write_all(data)?;
            writer.flush()
        })
    }

    /// Next line including its `\n`; `None` on a clean end of stream.
    pub fn read_line(&mut self) -> Result<Option<Vec<u8>>, ProtocolError> {
        let mut buf = Vec::new();
        let n = self.guarded(|reader, _| reader.take(MAX_LINE as u64).read_until(b'\n', &mut buf))?;
        if n == 0 {
            return Ok(None);
        }
        if buf.last() != Some(&b'\n') {
            if buf.len() >= MAX_LINE {
                return Err(ProtocolError::Malformed("overlong response line".into()));
            }
            // Stream ended mid-line.
            return Err(ProtocolError::ConnectionClosed);
        }
        Ok(Some(buf))
    }

    /// Like [`read_line`](Self::read_line) but end of stream is an error.
    pub fn expect_line(&mut self) -> Result<Vec<u8>, ProtocolError> {
        self.read_line()?.ok_or(ProtocolError::ConnectionClosed)
    }

    /// Exactly `len` bytes. The buffer grows with the data received, never
    /// up front from the announced count.
    pub fn read_exact(&mut self, len: u64) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::new();
        let n = self.guarded(|reader, _| reader.take(len).read_to_end(&mut buf))?;
        if (n as u64) < len {
            return Err(ProtocolError::ConnectionClosed);
        }
        Ok(buf)
    }
}

#[derive(Default)]
struct WatchState {
    deadline: Option<Instant>,
    fired: bool,
    closed: bool,
}

/// Kills a child process when an armed deadline passes.
pub struct Watchdog {
    io_timeout: Duration,
    state: Arc<(Mutex<WatchState>, Condvar)>,
    child: Arc<Mutex<Child>>,
    thread: Option<JoinHandle<()>>,
    killed: Arc<AtomicBool>,
}

impl Watchdog {
    fn spawn(child: Child, io_timeout: Duration) -> Self {
        let state = Arc::new((Mutex::new(WatchState::default()), Condvar::new()));
        let child = Arc::new(Mutex::new(child));
        let killed = Arc::new(AtomicBool::new(false));
        let thread = {
            let state = state.clone();
            let child = child.clone();
            let killed = killed.clone();
            std::thread::spawn(move || watch(&state, &child, &killed))
        };
        Self {
            io_timeout,
            state,
            child,
            thread: Some(thread),
            killed,
        }
    }

    fn arm(&self) {
        let (lock, cond) = &*self.state;
        let mut st = lock.lock().unwrap_or_else(|e| e.into_inner());
        st.deadline = Some(Instant::now() + self.io_timeout);
        cond.notify_all();
    }

    /// Clear the deadline; `true` when it had already fired.
    fn disarm(&self) -> bool {
        let (lock, _) = &*self.state;
        let mut st = lock.lock().unwrap_or_else(|e| e.into_inner());
        st.deadline = None;
        std::mem::take(&mut st.fired)
    }
}

fn watch(state: &(Mutex<WatchState>, Condvar), child: &Mutex<Child>, killed: &AtomicBool) {
    let (lock, cond) = state;
    let mut st = lock.lock().unwrap_or_else(|e| e.into_inner());
    loop {
        if st.closed {
            return;
        }
        match st.deadline {
            None => st = cond.wait(st).unwrap_or_else(|e| e.into_inner()),
            Some(deadline) => {
                let now = Instant::now();
                if now < deadline {
                    st = cond
                        .wait_timeout(st, deadline - now)
                        .map(|(g, _)| g)
                        .unwrap_or_else(|e| e.into_inner().0);
                    continue;
                }
                warn!("cvs server process stalled, killing it");
                st.deadline = None;
                st.fired = true;
                if !killed.swap(true, Ordering::SeqCst) {
                    let _ = child.lock().unwrap_or_else(|e| e.into_inner()).kill();
                }
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        {
            let (lock, cond) = &*self.state;
            let mut st = lock.lock().unwrap_or_else(|e| e.into_inner());
            st.closed = true;
            cond.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        let mut child = self.child.lock().unwrap_or_else(|e| e.into_inner());
        if !self.killed.swap(true, Ordering::SeqCst) {
            let _ = child.kill();
        }
        let _ = child.wait();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_stalled_process_is_killed() {
        let mut conn = Connection::process("sleep", &["30".to_string()], Duration::from_millis(200)).unwrap();
        let started = Instant::now();
        match conn.read_line() {
            Err(ProtocolError::Io(e)) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("unexpected {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_process_reads_within_timeout() {
        let mut conn = Connection::process("echo", &["ok".to_string()], Duration::from_secs(5)).unwrap();
        assert_eq!(conn.read_line().unwrap(), Some(b"ok\n".to_vec()));
        assert_eq!(conn.read_line().unwrap(), None);
    }

    #[test]
    fn test_short_body_is_connection_closed() {
        let mut conn = Connection::process("printf", &["abc".to_string()], Duration::from_secs(5)).unwrap();
        assert!(matches!(conn.read_exact(10), Err(ProtocolError::ConnectionClosed)));
    }
}
