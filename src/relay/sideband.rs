// src/relay/sideband.rs

//! Sideband tagged-line protocol
//!
//! A privileged `shelly --sideband ...` child writes its normal output and
//! diagnostics to standard error. Lines that need a human decision carry a
//! reserved prefix:
//!
//! ```text
//! [Shelly][ALPM_QUESTION]<text>
//! [Shelly][ALPM_SELECT_PROVIDER]<name>
//! [Shelly][ALPM_PROVIDER_OPTION]<index>:<label>     (one per option)
//! [Shelly][ALPM_PROVIDER_END]
//! ```
//!
//! The driver answers each with exactly one line on the child's standard
//! input: `y`/`n`, a zero-based index, or an empty line for the question's
//! own default. The child blocks until it arrives.

use crate::callback::Question;
use crate::error::{Error, Result};
use std::io::{BufRead, BufReader, Stderr, Stdin, Write};
use std::sync::Mutex;
use tracing::{debug, warn};

pub const QUESTION_PREFIX: &str = "[Shelly][ALPM_QUESTION]";
pub const SELECT_PROVIDER_PREFIX: &str = "[Shelly][ALPM_SELECT_PROVIDER]";
pub const PROVIDER_OPTION_PREFIX: &str = "[Shelly][ALPM_PROVIDER_OPTION]";
pub const PROVIDER_END: &str = "[Shelly][ALPM_PROVIDER_END]";

// -----------------------------------------------------------------------------
// Child side
// -----------------------------------------------------------------------------

/// Asks questions over the sideband channel
pub struct SidebandPrompter<R, W> {
    input: Mutex<R>,
    output: Mutex<W>,
}

impl SidebandPrompter<BufReader<Stdin>, Stderr> {
    /// Prompter on the process's standard input and standard error
    pub fn stdio() -> Self {
        Self::new(BufReader::new(std::io::stdin()), std::io::stderr())
    }
}

impl<R: BufRead, W: Write> SidebandPrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input: Mutex::new(input),
            output: Mutex::new(output),
        }
    }

    /// Emit a question and block until the driver answers
    pub fn ask(&self, question: &Question) -> Result<i32> {
        {
            let mut out = self
                .output
                .lock()
                .map_err(|_| Error::Protocol("sideband output lock poisoned".to_string()))?;
            write_question(&mut *out, question)
                .map_err(|e| Error::Protocol(format!("failed to write question: {e}")))?;
        }

        let mut line = String::new();
        let read = self
            .input
            .lock()
            .map_err(|_| Error::Protocol("sideband input lock poisoned".to_string()))?
            .read_line(&mut line)
            .map_err(|e| Error::Protocol(format!("failed to read answer: {e}")))?;
        if read == 0 {
            return Err(Error::Protocol("driver closed input before answering".to_string()));
        }
        parse_answer(question, line.trim())
    }
}

fn write_question<W: Write>(out: &mut W, question: &Question) -> std::io::Result<()> {
    if question.is_selection() {
        writeln!(out, "{SELECT_PROVIDER_PREFIX}{}", one_line(&question.prompt))?;
        for (index, label) in question.providers.iter().enumerate() {
            writeln!(out, "{PROVIDER_OPTION_PREFIX}{index}:{}", one_line(label))?;
        }
        writeln!(out, "{PROVIDER_END}")?;
    } else {
        writeln!(out, "{QUESTION_PREFIX}{}", one_line(&question.prompt))?;
    }
    out.flush()
}

fn one_line(text: &str) -> String {
    text.replace(['\n', '\r'], " ")
}

/// Interpret a driver answer for `question`
///
/// An empty line keeps the default.
pub fn parse_answer(question: &Question, answer: &str) -> Result<i32> {
    if answer.is_empty() {
        return Ok(question.default_answer);
    }
    let value = if question.is_selection() {
        answer.parse::<i32>().ok()
    } else {
        match answer.to_ascii_lowercase().as_str() {
            "y" | "yes" => Some(1),
            "n" | "no" => Some(0),
            _ => None,
        }
    };
    value
        .filter(|v| question.accepts(*v))
        .ok_or_else(|| Error::Protocol(format!("invalid answer '{answer}'")))
}

// -----------------------------------------------------------------------------
// Driver side
// -----------------------------------------------------------------------------

/// Classified line from the child's standard error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SidebandLine {
    /// Untagged output, forwarded as-is
    Output(String),
    Question(String),
    SelectProvider(String),
    ProviderOption { index: usize, label: String },
    ProviderEnd,
}

/// Classify one line
pub fn parse_line(line: &str) -> Result<SidebandLine> {
    if let Some(text) = line.strip_prefix(QUESTION_PREFIX) {
        return Ok(SidebandLine::Question(text.to_string()));
    }
    if let Some(name) = line.strip_prefix(SELECT_PROVIDER_PREFIX) {
        return Ok(SidebandLine::SelectProvider(name.to_string()));
    }
    if let Some(option) = line.strip_prefix(PROVIDER_OPTION_PREFIX) {
        let (index, label) = option
            .split_once(':')
            .ok_or_else(|| Error::Protocol(format!("malformed provider option '{option}'")))?;
        let index = index
            .trim()
            .parse()
            .map_err(|_| Error::Protocol(format!("malformed provider index '{index}'")))?;
        return Ok(SidebandLine::ProviderOption {
            index,
            label: label.to_string(),
        });
    }
    if line.trim_end() == PROVIDER_END {
        return Ok(SidebandLine::ProviderEnd);
    }
    Ok(SidebandLine::Output(line.to_string()))
}

/// A decision the driver must make
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prompt {
    YesNo { text: String },
    SelectProvider { name: String, options: Vec<String> },
}

/// The driver's answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Yes,
    No,
    Index(usize),
    /// Keep the default the child's question carries
    Default,
}

impl Decision {
    /// Response line written to the child
    pub fn to_line(self) -> String {
        match self {
            Self::Yes => "y".to_string(),
            Self::No => "n".to_string(),
            Self::Index(index) => index.to_string(),
            Self::Default => String::new(),
        }
    }

    /// Non-interactive choice: whatever the native default is
    pub fn automatic(_prompt: &Prompt) -> Self {
        Self::Default
    }
}

/// Drive a sideband child until its standard error closes
///
/// Untagged lines go to `output`; each tagged prompt is answered with
/// exactly one line on `child_input`.
pub fn drive<R, W, O, F>(
    child_errors: R,
    child_input: &mut W,
    output: &mut O,
    mut decide: F,
) -> Result<()>
where
    R: BufRead,
    W: Write,
    O: Write,
    F: FnMut(&Prompt) -> Decision,
{
    let mut pending: Option<(String, Vec<String>)> = None;

    for line in child_errors.lines() {
        let line = line.map_err(|e| Error::Protocol(format!("failed to read child output: {e}")))?;

        match parse_line(&line)? {
            SidebandLine::Output(text) => {
                if pending.is_some() {
                    debug!("Output inside provider block: {}", text);
                }
                writeln!(output, "{text}")?;
            }
            SidebandLine::Question(text) => {
                let decision = decide(&Prompt::YesNo { text });
                respond(child_input, decision)?;
            }
            SidebandLine::SelectProvider(name) => {
                if pending.is_some() {
                    return Err(Error::Protocol("nested provider selection".to_string()));
                }
                pending = Some((name, Vec::new()));
            }
            SidebandLine::ProviderOption { index, label } => {
                let Some((_, options)) = pending.as_mut() else {
                    return Err(Error::Protocol("provider option outside a selection".to_string()));
                };
                if index != options.len() {
                    warn!("Provider option {} arrived out of order", index);
                }
                options.push(label);
            }
            SidebandLine::ProviderEnd => {
                let Some((name, options)) = pending.take() else {
                    return Err(Error::Protocol("provider end outside a selection".to_string()));
                };
                let count = options.len();
                let decision = decide(&Prompt::SelectProvider { name, options });
                match decision {
                    Decision::Index(index) if index < count => respond(child_input, decision)?,
                    Decision::Default => respond(child_input, decision)?,
                    other => {
                        warn!("Invalid provider decision {:?}; choosing the first", other);
                        respond(child_input, Decision::Index(0))?;
                    }
                }
            }
        }
    }

    if pending.is_some() {
        return Err(Error::Protocol(
            "child exited in the middle of a provider selection".to_string(),
        ));
    }
    Ok(())
}

fn respond<W: Write>(child_input: &mut W, decision: Decision) -> Result<()> {
    writeln!(child_input, "{}", decision.to_line())
        .and_then(|()| child_input.flush())
        .map_err(|e| Error::Protocol(format!("failed to answer child: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::QuestionKind;
    use std::io::Cursor;

    fn yes_no(default: i32) -> Question {
        Question {
            kind: QuestionKind::ImportKey,
            prompt: "Import PGP key ABCD, \"Packager\"?".into(),
            default_answer: default,
            providers: Vec::new(),
        }
    }

    fn selection() -> Question {
        Question {
            kind: QuestionKind::SelectProvider,
            prompt: "java-runtime".into(),
            default_answer: 0,
            providers: vec!["jre-openjdk 21-1".into(), "jre17-openjdk 17-1".into()],
        }
    }

    #[test]
    fn test_prompter_round_trip_yes_no() {
        let mut stderr = Vec::new();
        let answer = {
            let prompter = SidebandPrompter::new(Cursor::new("n\n"), &mut stderr);
            prompter.ask(&yes_no(1)).unwrap()
        };
        assert_eq!(answer, 0);
        assert_eq!(
            String::from_utf8(stderr).unwrap(),
            "[Shelly][ALPM_QUESTION]Import PGP key ABCD, \"Packager\"?\n"
        );
    }

    #[test]
    fn test_prompter_selection_block() {
        let mut stderr = Vec::new();
        let answer = {
            let prompter = SidebandPrompter::new(Cursor::new("1\n"), &mut stderr);
            prompter.ask(&selection()).unwrap()
        };
        assert_eq!(answer, 1);
        let text = String::from_utf8(stderr).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "[Shelly][ALPM_SELECT_PROVIDER]java-runtime",
                "[Shelly][ALPM_PROVIDER_OPTION]0:jre-openjdk 21-1",
                "[Shelly][ALPM_PROVIDER_OPTION]1:jre17-openjdk 17-1",
                "[Shelly][ALPM_PROVIDER_END]",
            ]
        );
    }

    #[test]
    fn test_prompter_eof_is_protocol_failure() {
        let prompter = SidebandPrompter::new(Cursor::new(""), Vec::new());
        assert!(matches!(prompter.ask(&yes_no(1)), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_parse_answer() {
        assert_eq!(parse_answer(&yes_no(1), "").unwrap(), 1);
        assert_eq!(parse_answer(&yes_no(0), "Y").unwrap(), 1);
        assert!(parse_answer(&yes_no(0), "maybe").is_err());
        assert!(parse_answer(&selection(), "2").is_err());
    }

    #[test]
    fn test_parse_line() {
        assert_eq!(
            parse_line("[Shelly][ALPM_PROVIDER_OPTION]3:foo: bar").unwrap(),
            SidebandLine::ProviderOption {
                index: 3,
                label: "foo: bar".into()
            }
        );
        assert_eq!(
            parse_line(":: Synchronizing package databases...").unwrap(),
            SidebandLine::Output(":: Synchronizing package databases...".into())
        );
        assert!(parse_line("[Shelly][ALPM_PROVIDER_OPTION]x").is_err());
    }

    #[test]
    fn test_drive_answers_each_prompt_once() {
        let child_errors = Cursor::new(concat!(
            "resolving dependencies...\n",
            "[Shelly][ALPM_QUESTION]Replace foo with extra/bar?\n",
            "[Shelly][ALPM_SELECT_PROVIDER]java-runtime\n",
            "[Shelly][ALPM_PROVIDER_OPTION]0:jre-openjdk\n",
            "[Shelly][ALPM_PROVIDER_OPTION]1:jre17-openjdk\n",
            "[Shelly][ALPM_PROVIDER_END]\n",
            "done\n",
        ));
        let mut child_input = Vec::new();
        let mut output = Vec::new();
        let mut prompts = Vec::new();

        drive(child_errors, &mut child_input, &mut output, |prompt| {
            prompts.push(prompt.clone());
            match prompt {
                Prompt::YesNo { .. } => Decision::No,
                Prompt::SelectProvider { .. } => Decision::Index(1),
            }
        })
        .unwrap();

        assert_eq!(String::from_utf8(child_input).unwrap(), "n\n1\n");
        assert_eq!(
            String::from_utf8(output).unwrap(),
            "resolving dependencies...\ndone\n"
        );
        assert_eq!(
            prompts[1],
            Prompt::SelectProvider {
                name: "java-runtime".into(),
                options: vec!["jre-openjdk".into(), "jre17-openjdk".into()],
            }
        );
    }

    #[test]
    fn test_automatic_decision_writes_empty_line() {
        let child_errors = Cursor::new(concat!(
            "[Shelly][ALPM_QUESTION]Remove 2 packages?\n",
            "[Shelly][ALPM_SELECT_PROVIDER]sh\n",
            "[Shelly][ALPM_PROVIDER_OPTION]0:bash\n",
            "[Shelly][ALPM_PROVIDER_END]\n",
        ));
        let mut child_input = Vec::new();
        drive(child_errors, &mut child_input, &mut Vec::new(), Decision::automatic).unwrap();
        assert_eq!(String::from_utf8(child_input).unwrap(), "\n\n");
        assert_eq!(parse_answer(&yes_no(0), "").unwrap(), 0);
    }

    #[test]
    fn test_drive_truncated_selection_fails() {
        let child_errors =
            Cursor::new("[Shelly][ALPM_SELECT_PROVIDER]sh\n[Shelly][ALPM_PROVIDER_OPTION]0:bash\n");
        let err = drive(child_errors, &mut Vec::new(), &mut Vec::new(), Decision::automatic)
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
