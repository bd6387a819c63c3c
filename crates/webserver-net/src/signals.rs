use std::io::{self, Read};
use std::os::unix::net::UnixStream as StdUnixStream;

use mio::net::UnixStream as MioUnixStream;

/// A self-pipe a signal handler writes one byte into, registered with the
/// reactor's `Poll` like any other readable source. This is the standard
/// way to fold async-signal-safe notification into a readiness loop
/// without a dedicated `signalfd`.
pub struct SignalPipe {
    pub receiver: MioUnixStream,
    scratch: [u8; 64],
}

impl SignalPipe {
    /// Registers `signals` (e.g. `SIGTERM`, `SIGINT`) to each write a byte
    /// into the pipe, returning the readable end for the caller to
    /// register with its `Poll`.
    pub fn install(signals: &[libc::c_int]) -> io::Result<Self> {
        let (sender, receiver) = StdUnixStream::pair()?;
        for &signal in signals {
            signal_hook::low_level::pipe::register(signal, sender.try_clone()?)?;
        }
        receiver.set_nonblocking(true)?;
        Ok(Self { receiver: MioUnixStream::from_std(receiver), scratch: [0; 64] })
    }

    /// Drains every byte currently buffered in the pipe. Returns the
    /// number of bytes read; `0` means a signal fired and was already
    /// drained by an earlier call, or the read woke spuriously.
    pub fn drain(&mut self) -> io::Result<usize> {
        let mut total = 0;
        loop {
            match self.receiver.read(&mut self.scratch) {
                Ok(0) => break,
                Ok(n) => total += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }
}
