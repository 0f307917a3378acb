use std::os::fd::RawFd;

use nix::libc::{STDIN_FILENO, STDOUT_FILENO};
use nix::unistd::{close, dup2};

use crate::invocation::ProgramInvocation;

/// How the standard streams of a dispatch are wired.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionMode {
    Direct,
    Piped { second: ProgramInvocation },
    OutputRedirect { filename: String },
    InputRedirect { filename: String },
    NetworkRedirect { hostname: String, port: String },
}

impl ExecutionMode {
    pub fn describe(&self) -> &'static str {
        return match self {
            ExecutionMode::Direct => "direct",
            ExecutionMode::Piped { .. } => "piped",
            ExecutionMode::OutputRedirect { .. } => "output-redirect",
            ExecutionMode::InputRedirect { .. } => "input-redirect",
            ExecutionMode::NetworkRedirect { .. } => "network-redirect",
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StdStream {
    Input,
    Output,
}

impl StdStream {
    pub fn fd(self) -> RawFd {
        return match self {
            StdStream::Input => STDIN_FILENO,
            StdStream::Output => STDOUT_FILENO,
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Binding {
    pub source: RawFd,
    pub target: StdStream,
}

/// Duplicate/close operations a child performs on its descriptor table before it
/// replaces its image.
///
/// The plan is finished in the parent: every bound source is already on the close
/// list and no descriptor appears twice, so [`DescriptorPlan::apply`] allocates
/// nothing and closes each descriptor exactly once.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptorPlan {
    bindings: Vec<Binding>,
    close: Vec<RawFd>,
}

impl DescriptorPlan {
    /// Standard streams stay as inherited.
    pub fn inherit() -> Self {
        return Self::default();
    }

    pub fn bind(mut self, source: RawFd, target: StdStream) -> Self {
        self.bindings.push(Binding { source, target });
        return self.close(source);
    }

    pub fn close(mut self, fd: RawFd) -> Self {
        if !self.close.contains(&fd) {
            self.close.push(fd);
        }
        return self;
    }

    #[cfg(test)]
    pub fn bindings(&self) -> &[Binding] {
        return &self.bindings;
    }

    #[cfg(test)]
    pub fn closes(&self) -> &[RawFd] {
        return &self.close;
    }

    /// Runs in the forked child only.
    pub fn apply(&self) -> nix::Result<()> {
        for binding in &self.bindings {
            if binding.source != binding.target.fd() {
                dup2(binding.source, binding.target.fd())?;
            }
        }

        for &fd in &self.close {
            // A source that already sat on its target is now the standard stream.
            if self.bindings.iter().any(|binding| binding.target.fd() == fd) {
                continue;
            }
            close(fd)?;
        }

        return Ok(());
    }
}
