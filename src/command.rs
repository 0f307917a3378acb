use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use thiserror::Error;
use tracing::debug;

use crate::{
    config::ShellConfig,
    executable::{ExecutableRunner, Job},
    invocation::ProgramInvocation,
    prompt::Prompter,
    redirection::ExecutionMode,
};

pub const HELP: &str = "Commands:\n  Help\n  Quit\n  Run <program> [<arg>...]\n  Run <program> [<arg>...] Pipe <program2> [<arg2>...]\n  Run <program> [<arg>...] To <file>\n  Run <program> [<arg>...] To /TCP/<host>/<port>\n  Run <program> [<arg>...] From <file>\n";
pub const BANNER: &str = "relay: interactive command launcher. Type 'Help' for commands.\n\n";
pub const FAREWELL: &str = "Goodbye.\n";

const TCP_PREFIX: &str = "/TCP/";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Keyword {
    Pipe,
    To,
    From,
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Keyword::Pipe => "Pipe",
            Keyword::To => "To",
            Keyword::From => "From",
        };
        return write!(f, "{}", text);
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("missing program name after 'Run'")]
    MissingProgram,

    #[error("missing operand after '{keyword}'")]
    MissingOperand { keyword: Keyword },

    #[error("malformed network endpoint '{target}', expected /TCP/<host>/<port>")]
    MalformedEndpoint { target: String },

    #[error("'{second}' cannot follow a '{first}' clause")]
    ConflictingClause { first: Keyword, second: Keyword },

    #[error("unexpected '{token}' after the '{keyword}' target")]
    TrailingToken { keyword: Keyword, token: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verb {
    Help,
    Quit,
    Run,
    Unknown,
}

#[derive(Debug, PartialEq)]
pub struct Command {
    pub verb: Verb,
    pub raw: String,
}

/// What the read loop does after a dispatch.
#[derive(Debug, PartialEq)]
pub enum Flow {
    Continue,
    Quit,
}

impl FromStr for Command {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(first) = s.split_whitespace().next() else {
            return Err(anyhow!("Failed to parse the command"));
        };

        let verb = match first {
            "Help" => Verb::Help,
            "Quit" => Verb::Quit,
            "Run" => Verb::Run,
            _ => Verb::Unknown,
        };

        return Ok(Command {
            verb,
            raw: s.trim().to_string(),
        });
    }
}

impl Command {
    /// Parses the `Run` clause of the line into a job.
    pub fn job(&self) -> Result<Job, ParseError> {
        return parse_run(self.raw.split_whitespace().skip(1));
    }

    pub fn run(
        self,
        prompter: &mut impl Prompter,
        runner: &impl ExecutableRunner,
        config: &ShellConfig,
    ) -> anyhow::Result<Flow> {
        match self.verb {
            Verb::Help => {
                prompter.prompt(HELP)?;
            }
            Verb::Quit => {
                if !config.quiet {
                    prompter.prompt(FAREWELL)?;
                }
                return Ok(Flow::Quit);
            }
            Verb::Run => run_job(&self, prompter, runner, config)?,
            Verb::Unknown => {
                prompter.report("Error: unknown command, use 'Help' for a list of commands")?;
            }
        }

        return Ok(Flow::Continue);
    }
}

fn run_job(
    command: &Command,
    prompter: &mut impl Prompter,
    runner: &impl ExecutableRunner,
    config: &ShellConfig,
) -> anyhow::Result<()> {
    let job = match command.job() {
        Ok(job) => job,
        Err(error) => {
            debug!(line = %command.raw, %error, "parse failed");
            return prompter.report(&format!("Error: {}", error));
        }
    };

    match runner.execute(&job) {
        Ok(report) => {
            debug!(success = report.success(), "dispatch finished");
            if config.report_status {
                for outcome in &report.outcomes {
                    prompter.report(&outcome.describe())?;
                }
            }
        }
        Err(error) => {
            prompter.report(&format!("Error: {}", error))?;
        }
    }

    return Ok(());
}

enum Token<'a> {
    Keyword(Keyword),
    Value(&'a str),
}

fn classify(token: &str) -> Token<'_> {
    return match token {
        "Pipe" => Token::Keyword(Keyword::Pipe),
        "To" => Token::Keyword(Keyword::To),
        "From" => Token::Keyword(Keyword::From),
        value => Token::Value(value),
    };
}

enum State<'a> {
    Program,
    Args,
    SecondProgram,
    SecondArgs,
    Target(Keyword),
    Done(Keyword, &'a str),
}

fn parse_run<'a>(tokens: impl Iterator<Item = &'a str>) -> Result<Job, ParseError> {
    let mut program = "";
    let mut args: Vec<&str> = Vec::new();
    let mut second = "";
    let mut second_args: Vec<&str> = Vec::new();
    let mut state = State::Program;

    for token in tokens {
        state = match (state, classify(token)) {
            (State::Program, Token::Value(value)) => {
                program = value;
                State::Args
            }
            (State::Program, Token::Keyword(_)) => return Err(ParseError::MissingProgram),
            (State::Args, Token::Value(value)) => {
                args.push(value);
                State::Args
            }
            (State::Args, Token::Keyword(Keyword::Pipe)) => State::SecondProgram,
            (State::Args, Token::Keyword(keyword)) => State::Target(keyword),
            (State::SecondProgram, Token::Value(value)) => {
                second = value;
                State::SecondArgs
            }
            (State::SecondProgram, Token::Keyword(_)) => {
                return Err(ParseError::MissingOperand {
                    keyword: Keyword::Pipe,
                })
            }
            (State::SecondArgs, Token::Value(value)) => {
                second_args.push(value);
                State::SecondArgs
            }
            (State::SecondArgs, Token::Keyword(keyword)) => {
                return Err(ParseError::ConflictingClause {
                    first: Keyword::Pipe,
                    second: keyword,
                })
            }
            (State::Target(keyword), Token::Value(value)) => State::Done(keyword, value),
            (State::Target(keyword), Token::Keyword(_)) => {
                return Err(ParseError::MissingOperand { keyword })
            }
            (State::Done(first, _), Token::Keyword(keyword)) => {
                return Err(ParseError::ConflictingClause {
                    first,
                    second: keyword,
                })
            }
            // Rejected rather than dropped: `To out.txt extra` never silently
            // loses `extra`.
            (State::Done(keyword, _), Token::Value(value)) => {
                return Err(ParseError::TrailingToken {
                    keyword,
                    token: value.to_string(),
                })
            }
        };
    }

    let mode = match state {
        State::Program => return Err(ParseError::MissingProgram),
        State::Args => ExecutionMode::Direct,
        State::SecondProgram => {
            return Err(ParseError::MissingOperand {
                keyword: Keyword::Pipe,
            })
        }
        State::SecondArgs => ExecutionMode::Piped {
            second: ProgramInvocation::new(second, &second_args),
        },
        State::Target(keyword) => return Err(ParseError::MissingOperand { keyword }),
        State::Done(Keyword::From, filename) => ExecutionMode::InputRedirect {
            filename: filename.to_string(),
        },
        State::Done(_, target) => match target.strip_prefix(TCP_PREFIX) {
            Some(endpoint) => parse_endpoint(target, endpoint)?,
            None => ExecutionMode::OutputRedirect {
                filename: target.to_string(),
            },
        },
    };

    return Ok(Job {
        program: ProgramInvocation::new(program, &args),
        mode,
    });
}

fn parse_endpoint(target: &str, endpoint: &str) -> Result<ExecutionMode, ParseError> {
    let segments: Vec<&str> = endpoint.split('/').collect();
    let [hostname, port] = segments.as_slice() else {
        return Err(ParseError::MalformedEndpoint {
            target: target.to_string(),
        });
    };
    if hostname.is_empty() || port.is_empty() {
        return Err(ParseError::MalformedEndpoint {
            target: target.to_string(),
        });
    }

    return Ok(ExecutionMode::NetworkRedirect {
        hostname: hostname.to_string(),
        port: port.to_string(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executable::{ExecutableError, TerminationReport};
    use crate::prompt::ConsolePrompter;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingRunner {
        jobs: RefCell<Vec<Job>>,
    }

    impl ExecutableRunner for RecordingRunner {
        fn execute(&self, job: &Job) -> Result<TerminationReport, ExecutableError> {
            self.jobs.borrow_mut().push(job.clone());
            return Ok(TerminationReport::default());
        }
    }

    fn job(line: &str) -> Result<Job, ParseError> {
        return line.parse::<Command>().unwrap().job();
    }

    fn dispatch(line: &str, runner: &RecordingRunner) -> (Flow, String, String) {
        let mut prompter = ConsolePrompter::new(&b""[..], Vec::new(), Vec::new());
        let flow = line
            .parse::<Command>()
            .unwrap()
            .run(&mut prompter, runner, &ShellConfig::default())
            .unwrap();
        let (_, out, err) = prompter.into_inner();

        return (
            flow,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        );
    }

    #[test]
    fn verbs() {
        assert_eq!(Verb::Help, "Help".parse::<Command>().unwrap().verb);
        assert_eq!(Verb::Quit, "Quit".parse::<Command>().unwrap().verb);
        assert_eq!(Verb::Run, "Run ls".parse::<Command>().unwrap().verb);
        assert_eq!(Verb::Unknown, "help".parse::<Command>().unwrap().verb);
        assert_eq!(Verb::Unknown, "Runner ls".parse::<Command>().unwrap().verb);
        assert!("   ".parse::<Command>().is_err());
    }

    #[test]
    fn direct_run() {
        let job = job("Run ls  -l   /tmp").unwrap();

        assert_eq!(ProgramInvocation::new("ls", &["-l", "/tmp"]), job.program);
        assert_eq!(ExecutionMode::Direct, job.mode);
    }

    #[test]
    fn piped_run() {
        let job = job("Run cat notes.txt Pipe grep -n todo").unwrap();

        assert_eq!(ProgramInvocation::new("cat", &["notes.txt"]), job.program);
        assert_eq!(
            ExecutionMode::Piped {
                second: ProgramInvocation::new("grep", &["-n", "todo"])
            },
            job.mode
        );
    }

    #[test]
    fn output_redirect_run() {
        let job = job("Run echo hi To out.txt").unwrap();

        assert_eq!(ProgramInvocation::new("echo", &["hi"]), job.program);
        assert_eq!(
            ExecutionMode::OutputRedirect {
                filename: "out.txt".to_string()
            },
            job.mode
        );
    }

    #[test]
    fn network_redirect_run() {
        let job = job("Run date To /TCP/localhost/9000").unwrap();

        assert_eq!(
            ExecutionMode::NetworkRedirect {
                hostname: "localhost".to_string(),
                port: "9000".to_string()
            },
            job.mode
        );
    }

    #[test]
    fn input_redirect_run() {
        let job = job("Run sort -r From in.txt").unwrap();

        assert_eq!(ProgramInvocation::new("sort", &["-r"]), job.program);
        assert_eq!(
            ExecutionMode::InputRedirect {
                filename: "in.txt".to_string()
            },
            job.mode
        );
    }

    #[test]
    fn malformed_clauses() {
        assert_eq!(Err(ParseError::MissingProgram), job("Run"));
        assert_eq!(Err(ParseError::MissingProgram), job("Run Pipe wc"));
        assert_eq!(
            Err(ParseError::MissingOperand {
                keyword: Keyword::Pipe
            }),
            job("Run ls Pipe")
        );
        assert_eq!(
            Err(ParseError::MissingOperand {
                keyword: Keyword::To
            }),
            job("Run ls To")
        );
        assert_eq!(
            Err(ParseError::MissingOperand {
                keyword: Keyword::From
            }),
            job("Run cat From")
        );
        assert_eq!(
            Err(ParseError::MissingOperand {
                keyword: Keyword::To
            }),
            job("Run ls To From x")
        );
    }

    #[test]
    fn malformed_endpoints() {
        for target in ["/TCP/", "/TCP/host", "/TCP/host/", "/TCP//80", "/TCP/a/80/x"] {
            let line = format!("Run ls To {}", target);
            assert_eq!(
                Err(ParseError::MalformedEndpoint {
                    target: target.to_string()
                }),
                job(&line),
                "{}",
                line
            );
        }
    }

    #[test]
    fn second_clause_is_rejected() {
        assert_eq!(
            Err(ParseError::ConflictingClause {
                first: Keyword::Pipe,
                second: Keyword::To
            }),
            job("Run ls Pipe wc To out.txt")
        );
        assert_eq!(
            Err(ParseError::ConflictingClause {
                first: Keyword::From,
                second: Keyword::Pipe
            }),
            job("Run cat From in.txt Pipe wc")
        );
        assert_eq!(
            Err(ParseError::TrailingToken {
                keyword: Keyword::To,
                token: "extra".to_string()
            }),
            job("Run ls To out.txt extra")
        );
    }

    #[test]
    fn keywords_are_never_literal_arguments() {
        let error = job("Run echo To To").unwrap_err();

        assert_eq!(
            ParseError::MissingOperand {
                keyword: Keyword::To
            },
            error
        );
    }

    #[test]
    fn help_prints_grammar() {
        let runner = RecordingRunner::default();
        let (flow, out, err) = dispatch("Help", &runner);

        assert_eq!(Flow::Continue, flow);
        assert_eq!(HELP, out);
        assert!(err.is_empty());
    }

    #[test]
    fn quit_stops_the_loop() {
        let runner = RecordingRunner::default();
        let (flow, out, _) = dispatch("Quit", &runner);

        assert_eq!(Flow::Quit, flow);
        assert_eq!(FAREWELL, out);
    }

    #[test]
    fn unknown_command_reports_one_line() {
        let runner = RecordingRunner::default();
        let (flow, out, err) = dispatch("Launch rockets", &runner);

        assert_eq!(Flow::Continue, flow);
        assert!(out.is_empty());
        assert_eq!(1, err.lines().count());
        assert!(err.contains("unknown command"));
    }

    #[test]
    fn malformed_run_spawns_nothing() {
        let runner = RecordingRunner::default();
        for line in ["Run", "Run ls Pipe", "Run ls To", "Run cat From"] {
            let (flow, _, err) = dispatch(line, &runner);

            assert_eq!(Flow::Continue, flow);
            assert_eq!(1, err.lines().count(), "{}", line);
            assert!(err.starts_with("Error: "), "{}", line);
        }

        assert!(runner.jobs.borrow().is_empty());
    }

    #[test]
    fn valid_run_reaches_runner() {
        let runner = RecordingRunner::default();
        let (flow, _, err) = dispatch("Run ls -a", &runner);

        assert_eq!(Flow::Continue, flow);
        assert!(err.is_empty());
        assert_eq!(1, runner.jobs.borrow().len());
        assert_eq!(
            ProgramInvocation::new("ls", &["-a"]),
            runner.jobs.borrow()[0].program
        );
    }
}
