use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;

use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::libc;
use nix::unistd::{fork, pipe2, write, ForkResult, Pid};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::endpoint::{self, EndpointError};
use crate::invocation::{ArgVector, ProgramInvocation};
use crate::redirection::{DescriptorPlan, ExecutionMode, StdStream};

/// Status a child exits with when its program cannot be executed.
pub const EXIT_EXEC_FAILED: i32 = 127;
/// Status a child exits with when its standard streams cannot be wired.
pub const EXIT_WIRING_FAILED: i32 = 126;

#[derive(Error, Debug)]
pub enum ExecutableError {
    #[error("argument contains a NUL byte: {0:?}")]
    InvalidArgument(String),

    #[error("cannot create pipe: {0}")]
    Pipe(Errno),

    #[error("cannot open '{filename}' for output redirection: {source}")]
    OpenOutput { filename: String, source: io::Error },

    #[error("cannot open '{filename}' for input redirection: {source}")]
    OpenInput { filename: String, source: io::Error },

    #[error(transparent)]
    Endpoint(#[from] EndpointError),

    #[error("cannot fork process for '{program}': {source}")]
    Spawn { program: String, source: Errno },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Termination {
    Exited(i32),
    Signaled(Signal),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub program: String,
    pub pid: Pid,
    pub termination: Termination,
}

impl ProcessOutcome {
    pub fn success(&self) -> bool {
        return self.termination == Termination::Exited(0);
    }

    pub fn describe(&self) -> String {
        return match self.termination {
            Termination::Exited(code) => format!("{}: exited with status {}", self.program, code),
            Termination::Signaled(signal) => {
                format!("{}: terminated by signal {}", self.program, signal.as_str())
            }
        };
    }
}

/// Per-process outcome of one dispatch, in spawn order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TerminationReport {
    pub outcomes: Vec<ProcessOutcome>,
}

impl TerminationReport {
    pub fn success(&self) -> bool {
        return self.outcomes.iter().all(|outcome| outcome.success());
    }
}

/// One parsed `Run` request: the primary program and how it is wired.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub program: ProgramInvocation,
    pub mode: ExecutionMode,
}

pub trait ExecutableRunner {
    fn execute(&self, job: &Job) -> Result<TerminationReport, ExecutableError> {
        debug!(program = job.program.path(), mode = job.mode.describe(), "dispatching");

        let first = ArgVector::build(&job.program)?;
        let report = match &job.mode {
            ExecutionMode::Direct => run_single(first, DescriptorPlan::inherit(), None)?,
            ExecutionMode::Piped { second } => {
                let second = ArgVector::build(second)?;
                run_piped(first, second, &mut spawn)?
            }
            ExecutionMode::OutputRedirect { filename } => {
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .mode(0o644)
                    .open(filename)
                    .map_err(|source| ExecutableError::OpenOutput {
                        filename: filename.clone(),
                        source,
                    })?;
                run_wired(first, OwnedFd::from(file), StdStream::Output)?
            }
            ExecutionMode::InputRedirect { filename } => {
                let file = File::open(filename).map_err(|source| ExecutableError::OpenInput {
                    filename: filename.clone(),
                    source,
                })?;
                run_wired(first, OwnedFd::from(file), StdStream::Input)?
            }
            ExecutionMode::NetworkRedirect { hostname, port } => {
                let stream = endpoint::resolve(hostname, port)?;
                run_wired(first, OwnedFd::from(stream), StdStream::Output)?
            }
        };

        for outcome in report.outcomes.iter().filter(|outcome| !outcome.success()) {
            info!(pid = outcome.pid.as_raw(), "{}", outcome.describe());
        }

        return Ok(report);
    }
}

pub struct Runner {}

impl ExecutableRunner for Runner {}

impl Runner {
    pub fn new() -> Self {
        return Self {};
    }
}

/// One child whose `target` stream is `resource`.
fn run_wired(
    argv: ArgVector,
    resource: OwnedFd,
    target: StdStream,
) -> Result<TerminationReport, ExecutableError> {
    let plan = DescriptorPlan::inherit().bind(resource.as_raw_fd(), target);
    return run_single(argv, plan, Some(resource));
}

fn run_single(
    argv: ArgVector,
    plan: DescriptorPlan,
    resource: Option<OwnedFd>,
) -> Result<TerminationReport, ExecutableError> {
    let spawned = spawn(&argv, &plan);
    drop(resource);

    let pid = spawned?;
    let outcome = wait(argv.name(), pid);

    return Ok(TerminationReport {
        outcomes: vec![outcome],
    });
}

fn run_piped(
    first: ArgVector,
    second: ArgVector,
    spawner: &mut impl FnMut(&ArgVector, &DescriptorPlan) -> Result<Pid, ExecutableError>,
) -> Result<TerminationReport, ExecutableError> {
    // Close-on-exec keeps the ends out of unrelated children; dup2 clears the flag
    // on the copies that become standard streams.
    let (read_end, write_end) = pipe2(OFlag::O_CLOEXEC).map_err(ExecutableError::Pipe)?;
    let (read_fd, write_fd) = (read_end.as_raw_fd(), write_end.as_raw_fd());

    let writer_plan = DescriptorPlan::inherit()
        .bind(write_fd, StdStream::Output)
        .close(read_fd);
    let reader_plan = DescriptorPlan::inherit()
        .bind(read_fd, StdStream::Input)
        .close(write_fd);

    let writer = match spawner(&first, &writer_plan) {
        Ok(pid) => pid,
        Err(error) => {
            drop((read_end, write_end));
            return Err(error);
        }
    };
    let reader = spawner(&second, &reader_plan);
    drop((read_end, write_end));

    let reader = match reader {
        Ok(pid) => pid,
        Err(error) => {
            let orphan = wait(first.name(), writer);
            warn!(
                pid = writer.as_raw(),
                "reaped first child after failed spawn: {}",
                orphan.describe()
            );
            return Err(error);
        }
    };

    let outcomes = vec![wait(first.name(), writer), wait(second.name(), reader)];
    return Ok(TerminationReport { outcomes });
}

fn spawn(argv: &ArgVector, plan: &DescriptorPlan) -> Result<Pid, ExecutableError> {
    // SAFETY: the child only rewires descriptors, calls execvp and exits.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            debug!(pid = child.as_raw(), program = %argv.name(), "spawned child");
            return Ok(child);
        }
        Ok(ForkResult::Child) => replace_image(argv, plan),
        Err(source) => {
            return Err(ExecutableError::Spawn {
                program: argv.name(),
                source,
            })
        }
    }
}

/// Applies `plan` and replaces the process image. Never returns to the caller.
///
/// Nothing here allocates: the pointer array was built before the fork.
fn replace_image(argv: &ArgVector, plan: &DescriptorPlan) -> ! {
    if let Err(errno) = plan.apply() {
        child_report("cannot wire standard streams for", argv, errno);
        exit_child(EXIT_WIRING_FAILED);
    }

    // SAFETY: `program` is a valid C string and `pointers` is a null-terminated
    // array of valid C strings, both owned by `argv` for the whole call.
    unsafe { libc::execvp(argv.program().as_ptr(), argv.pointers().as_ptr()) };
    child_report("cannot execute", argv, Errno::last());
    exit_child(EXIT_EXEC_FAILED);
}

fn exit_child(code: i32) -> ! {
    // SAFETY: `_exit` skips atexit handlers and stdio flushing, so the child never
    // runs cleanup that belongs to the parent.
    unsafe { libc::_exit(code) }
}

fn child_report(step: &str, argv: &ArgVector, errno: Errno) {
    let stderr = io::stderr();
    let parts: [&[u8]; 7] = [
        b"Error: ",
        step.as_bytes(),
        b" '",
        argv.program().to_bytes(),
        b"': ",
        errno.desc().as_bytes(),
        b"\n",
    ];
    for part in parts {
        let _ = write(&stderr, part);
    }
}

/// Blocks until `pid` terminates. Each spawned pid is passed here exactly once.
fn wait(program: String, pid: Pid) -> ProcessOutcome {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                debug!(pid = pid.as_raw(), code, "child exited");
                return ProcessOutcome {
                    program,
                    pid,
                    termination: Termination::Exited(code),
                };
            }
            Ok(WaitStatus::Signaled(_, signal, _)) => {
                debug!(pid = pid.as_raw(), signal = signal.as_str(), "child signaled");
                return ProcessOutcome {
                    program,
                    pid,
                    termination: Termination::Signaled(signal),
                };
            }
            Ok(_) | Err(Errno::EINTR) => continue,
            Err(errno) => {
                // Only ECHILD is possible here, and it means the pid is already gone.
                warn!(pid = pid.as_raw(), %errno, "waitpid failed");
                return ProcessOutcome {
                    program,
                    pid,
                    termination: Termination::Exited(-1),
                };
            }
        }
    }
}
