use std::io;

pub trait Prompter {
    /// Next trimmed input line, or `None` once input is exhausted.
    fn read(&mut self) -> anyhow::Result<Option<String>>;
    fn prompt(&mut self, prompt: &str) -> anyhow::Result<()>;
    /// Writes one diagnostic line to the error stream.
    fn report(&mut self, message: &str) -> anyhow::Result<()>;
}

/// The three standard streams of the controller, built once at startup.
pub struct ConsolePrompter<R: io::BufRead, W: io::Write, E: io::Write> {
    reader: R,
    writer: W,
    errors: E,
}

impl<R: io::BufRead, W: io::Write, E: io::Write> Prompter for ConsolePrompter<R, W, E> {
    fn read(&mut self) -> anyhow::Result<Option<String>> {
        let mut input = Vec::new();
        let count = self.reader.read_until(b'\n', &mut input)?;
        if count == 0 {
            return Ok(None);
        }

        // Bytes that are not UTF-8 read as U+FFFD.
        return Ok(Some(String::from_utf8_lossy(&input).trim().to_string()));
    }

    fn prompt(&mut self, prompt: &str) -> anyhow::Result<()> {
        write!(self.writer, "{}", prompt)?;
        self.writer.flush()?;

        return Ok(());
    }

    fn report(&mut self, message: &str) -> anyhow::Result<()> {
        writeln!(self.errors, "{}", message)?;
        self.errors.flush()?;

        return Ok(());
    }
}

impl<R: io::BufRead, W: io::Write, E: io::Write> ConsolePrompter<R, W, E> {
    pub fn new(reader: R, writer: W, errors: E) -> Self {
        return ConsolePrompter {
            reader,
            writer,
            errors,
        };
    }

    #[cfg(test)]
    pub fn into_inner(self) -> (R, W, E) {
        return (self.reader, self.writer, self.errors);
    }
}
