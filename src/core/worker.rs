//! Worker process launcher
//!
//! A worker is a forked copy of the calling process that runs one function and
//! reports its outcome through a pipe as a single length-prefixed JSON frame.
//! A reader thread in the parent drains the pipe while the worker runs, so a
//! result larger than the pipe buffer never blocks the worker from exiting.
//!
//! The function runs in the child after `fork`, so it must be fork-safe: it
//! should not rely on other threads of the parent or on locks they may hold.

use crate::core::frame::{self, read_frame, write_frame};
use crate::error::{Result, WatchmeError};

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::marker::PhantomData;
use std::os::unix::io::FromRawFd;
use std::os::unix::process::ExitStatusExt;
use std::panic::{self, AssertUnwindSafe};
use std::process::ExitStatus;
use std::thread::{self, JoinHandle};

/// Exit code of a worker that delivered its outcome
const EXIT_DELIVERED: i32 = 0;
/// Exit code of a worker that failed to write its outcome
const EXIT_UNDELIVERED: i32 = 1;

/// Anything the sampler loop can watch
pub trait Liveness {
    fn pid(&self) -> u32;
    fn is_alive(&self) -> bool;
}

/// What the worker sends back through the result channel
#[derive(Debug, Serialize, Deserialize)]
pub enum WorkerOutcome<R> {
    Returned(R),
    Panicked(String),
    /// The function returned, but its value could not be encoded
    Unencodable(String),
}

type FrameReader = JoinHandle<Result<Option<Vec<u8>>>>;

/// Launches functions in worker processes
pub struct Worker;

impl Worker {
    /// Fork a worker running `func` and return without waiting for it
    pub fn start<F, R>(func: F) -> Result<WorkerHandle<R>>
    where
        F: FnOnce() -> R,
        R: Serialize + DeserializeOwned,
    {
        let (mut reader, writer) = result_channel().map_err(WatchmeError::ProcessLaunch)?;

        let child_pid = unsafe { libc::fork() };
        if child_pid < 0 {
            return Err(WatchmeError::ProcessLaunch(io::Error::last_os_error()));
        }

        if child_pid == 0 {
            drop(reader);
            let code = run_worker(func, writer);
            unsafe { libc::_exit(code) }
        }

        drop(writer);
        let pid = child_pid as u32;
        debug!("Started worker process {}", pid);

        // On error the handle is dropped, which kills and reaps the worker
        let mut handle = WorkerHandle {
            pid,
            frame: None,
            reaped: false,
            _result: PhantomData,
        };
        let frame = thread::Builder::new()
            .name(format!("watchme-result-{pid}"))
            .spawn(move || read_frame(&mut reader))
            .map_err(WatchmeError::ProcessLaunch)?;
        handle.frame = Some(frame);

        Ok(handle)
    }
}

/// A running worker
///
/// Dropping a handle that was never joined kills and reaps the worker.
#[derive(Debug)]
pub struct WorkerHandle<R> {
    pid: u32,
    frame: Option<FrameReader>,
    reaped: bool,
    _result: PhantomData<fn() -> R>,
}

impl<R: DeserializeOwned> WorkerHandle<R> {
    /// Process id of the worker
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Check whether the worker is still running
    ///
    /// Uses `WNOWAIT` so the exit status stays available for the final join.
    pub fn is_alive(&self) -> bool {
        loop {
            let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
            let rc = unsafe {
                libc::waitid(
                    libc::P_PID,
                    self.pid as libc::id_t,
                    &mut info,
                    libc::WEXITED | libc::WNOHANG | libc::WNOWAIT,
                )
            };
            if rc == 0 {
                return unsafe { info.si_pid() == 0 };
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                // ECHILD: already reaped
                return false;
            }
        }
    }

    /// Wait for the worker to finish and take its return value
    pub fn join_and_collect(mut self) -> Result<R> {
        let frame = match self.frame.take() {
            Some(reader) => reader.join().unwrap_or_else(|_| {
                Err(WatchmeError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "result reader thread panicked",
                )))
            }),
            None => Ok(None),
        };
        let status = self.wait()?;
        debug!("Worker process {} finished with {}", self.pid, status);

        let bytes = match frame? {
            Some(bytes) => bytes,
            None => {
                return Err(WatchmeError::ResultUnavailable {
                    pid: self.pid,
                    status,
                })
            }
        };

        let outcome: WorkerOutcome<R> =
            frame::decode(&bytes).map_err(|source| WatchmeError::ResultDecode {
                pid: self.pid,
                source,
            })?;

        match outcome {
            WorkerOutcome::Returned(value) => Ok(value),
            WorkerOutcome::Panicked(message) => Err(WatchmeError::WorkerPanicked {
                pid: self.pid,
                message,
            }),
            WorkerOutcome::Unencodable(reason) => Err(WatchmeError::ResultEncode {
                pid: self.pid,
                reason,
            }),
        }
    }

    /// Blocking reap of the worker
    fn wait(&mut self) -> Result<ExitStatus> {
        let mut status: libc::c_int = 0;
        loop {
            let rc = unsafe { libc::waitpid(self.pid as libc::pid_t, &mut status, 0) };
            if rc >= 0 {
                break;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                self.reaped = true;
                return Err(WatchmeError::Io(err));
            }
        }
        self.reaped = true;
        Ok(ExitStatus::from_raw(status))
    }
}

impl<R: DeserializeOwned> Liveness for WorkerHandle<R> {
    fn pid(&self) -> u32 {
        WorkerHandle::pid(self)
    }

    fn is_alive(&self) -> bool {
        WorkerHandle::is_alive(self)
    }
}

impl<R> Drop for WorkerHandle<R> {
    fn drop(&mut self) {
        if self.reaped {
            return;
        }
        warn!("Worker process {} dropped before join, killing it", self.pid);
        let pid = self.pid as libc::pid_t;
        unsafe {
            libc::kill(pid, libc::SIGKILL);
            let mut status: libc::c_int = 0;
            while libc::waitpid(pid, &mut status, 0) < 0
                && io::Error::last_os_error().kind() == io::ErrorKind::Interrupted
            {}
        }
    }
}

/// Runs in the child: call the function and write its outcome
fn run_worker<F, R>(func: F, mut writer: File) -> i32
where
    F: FnOnce() -> R,
    R: Serialize,
{
    let outcome = match panic::catch_unwind(AssertUnwindSafe(func)) {
        Ok(value) => WorkerOutcome::Returned(value),
        Err(payload) => WorkerOutcome::Panicked(panic_message(payload.as_ref())),
    };

    let encoded = frame::encode(&outcome)
        .or_else(|reason| frame::encode(&WorkerOutcome::<()>::Unencodable(reason)));

    match encoded {
        Ok(body) if write_frame(&mut writer, &body).is_ok() => EXIT_DELIVERED,
        _ => EXIT_UNDELIVERED,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn result_channel() -> io::Result<(File, File)> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let reader = unsafe { File::from_raw_fd(fds[0]) };
    let writer = unsafe { File::from_raw_fd(fds[1]) };
    Ok((reader, writer))
}
