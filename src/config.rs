use argh::FromArgs;

pub const DEFAULT_PROMPT: &str = "relay> ";
pub const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(FromArgs, Debug, Clone, PartialEq)]
/// interactive command launcher: run programs with pipes, file or TCP redirection.
pub struct ShellConfig {
    /// prompt written before each command line
    #[argh(option, default = "DEFAULT_PROMPT.to_string()")]
    pub prompt: String,

    /// suppress the welcome banner and farewell message
    #[argh(switch, short = 'q')]
    pub quiet: bool,

    /// print the termination status of every child after each command
    #[argh(switch)]
    pub report_status: bool,

    /// tracing filter used when RUST_LOG is unset, e.g. "debug"
    #[argh(option, default = "DEFAULT_LOG_LEVEL.to_string()")]
    pub log_level: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        return Self {
            prompt: DEFAULT_PROMPT.to_string(),
            quiet: false,
            report_status: false,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        };
    }
}
