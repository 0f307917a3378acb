use std::ffi::{c_char, CStr, CString};
use std::ptr;

use crate::executable::ExecutableError;

/// A program path paired with the arguments it will be started with.
///
/// `args[0]` is the path itself, so the child sees the same `argv` a shell would
/// hand it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramInvocation {
    path: String,
    args: Vec<String>,
}

impl ProgramInvocation {
    pub fn new(path: &str, extra: &[&str]) -> Self {
        let mut args = Vec::with_capacity(extra.len() + 1);
        args.push(path.to_string());
        args.extend(extra.iter().map(|arg| arg.to_string()));

        return Self {
            path: path.to_string(),
            args,
        };
    }

    pub fn path(&self) -> &str {
        return &self.path;
    }

    pub fn args(&self) -> &[String] {
        return &self.args;
    }
}

/// Argument vector in the form `execvp` consumes: `[path, arg1, ..., argN, NULL]`.
///
/// Built in the parent so the forked child only hands ready pointers to the
/// kernel. `pointers` borrows the heap buffers of `argv`, which never move or
/// change after `build`.
#[derive(Debug)]
pub struct ArgVector {
    program: CString,
    argv: Vec<CString>,
    pointers: Vec<*const c_char>,
}

impl ArgVector {
    pub fn build(invocation: &ProgramInvocation) -> Result<Self, ExecutableError> {
        let program = to_cstring(invocation.path())?;
        let argv = invocation
            .args()
            .iter()
            .map(|arg| to_cstring(arg))
            .collect::<Result<Vec<CString>, ExecutableError>>()?;

        let pointers = argv
            .iter()
            .map(|arg| arg.as_ptr())
            .chain(std::iter::once(ptr::null()))
            .collect();

        return Ok(Self {
            program,
            argv,
            pointers,
        });
    }

    pub fn program(&self) -> &CStr {
        return &self.program;
    }

    pub fn argv(&self) -> &[CString] {
        return &self.argv;
    }

    /// Null-terminated pointer array over `argv`.
    pub fn pointers(&self) -> &[*const c_char] {
        return &self.pointers;
    }

    pub fn name(&self) -> String {
        return self.program.to_string_lossy().into_owned();
    }
}

fn to_cstring(value: &str) -> Result<CString, ExecutableError> {
    return CString::new(value).map_err(|_| ExecutableError::InvalidArgument(value.to_string()));
}
