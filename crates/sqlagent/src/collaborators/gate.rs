use std::io::{BufRead, Stdin, StdinLock, Stdout, Write};
use std::sync::{Mutex, PoisonError};

use tracing::info;

use super::{CollaboratorError, ConfirmationGate, GateDecision, GateKind};

/// Line-oriented confirmation prompt.
///
/// `Enter` or `y` confirms, `e` reads replacement text until an empty line,
/// `c` or `n` cancels. End of input cancels.
#[derive(Debug)]
pub struct TerminalGate<R, W> {
    input: Mutex<R>,
    output: Mutex<W>,
}

impl TerminalGate<StdinLock<'static>, Stdout> {
    #[must_use]
    pub fn stdio() -> Self {
        let stdin: Stdin = std::io::stdin();
        Self::new(stdin.lock(), std::io::stdout())
    }
}

impl<R: BufRead, W: Write> TerminalGate<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: Mutex::new(input),
            output: Mutex::new(output),
        }
    }

    pub fn into_output(self) -> W {
        self.output
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn gate_error(error: std::io::Error) -> CollaboratorError {
    CollaboratorError::Gate(format!("terminal I/O failed: {error}"))
}

impl<R: BufRead, W: Write> ConfirmationGate for TerminalGate<R, W> {
    fn confirm(&self, kind: GateKind, payload: &str) -> Result<GateDecision, CollaboratorError> {
        let mut input = self.input.lock().unwrap_or_else(PoisonError::into_inner);
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);

        let heading = match kind {
            GateKind::Rewrite => "Rewritten query",
            GateKind::Sql => "Generated SQL",
        };
        writeln!(output, "\n{heading}:\n{payload}\n").map_err(gate_error)?;

        loop {
            write!(output, "[Enter/y] confirm, [e] edit, [c] cancel: ").map_err(gate_error)?;
            output.flush().map_err(gate_error)?;

            let mut line = String::new();
            if input.read_line(&mut line).map_err(gate_error)? == 0 {
                info!(gate = %kind, "input closed at gate; cancelling");
                return Ok(GateDecision::Cancel);
            }

            match line.trim().to_ascii_lowercase().as_str() {
                "" | "y" | "yes" => return Ok(GateDecision::Confirm),
                "c" | "n" | "no" | "cancel" => return Ok(GateDecision::Cancel),
                "e" | "edit" => {
                    writeln!(output, "Enter the replacement, finish with an empty line:")
                        .map_err(gate_error)?;
                    let edited = read_block(&mut *input)?;
                    if edited.is_empty() || edited == payload {
                        return Ok(GateDecision::Confirm);
                    }
                    return Ok(GateDecision::ConfirmEdited(edited));
                }
                other => {
                    writeln!(output, "unrecognised choice `{other}`").map_err(gate_error)?;
                }
            }
        }
    }
}

fn read_block<R: BufRead>(input: &mut R) -> Result<String, CollaboratorError> {
    let mut lines = Vec::new();
    loop {
        let mut line = String::new();
        if input.read_line(&mut line).map_err(gate_error)? == 0 {
            break;
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.trim().is_empty() {
            break;
        }
        lines.push(line.to_string());
    }
    Ok(lines.join("\n").trim().to_string())
}
