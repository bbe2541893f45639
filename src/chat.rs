//! Terminal chat host.
//!
//! Runs one session over stdin/stdout: asks for a file (within the upload
//! window), asks for departments, indexes, then answers questions until
//! `exit` or end of input. Answers stream to the terminal as they are
//! generated, followed by the sources suffix and one panel per citation.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Result;
use docqa_core::models::{FileKind, SourcedAnswer, UploadedFile};
use futures::StreamExt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::QaError;
use crate::flow;
use crate::query::{self, AnswerEvent};
use crate::services::Services;
use crate::session::SessionContext;

#[derive(Debug, Default, Clone)]
pub struct ChatOptions {
    /// Upload this file instead of prompting for one.
    pub file: Option<PathBuf>,
    /// Use these departments instead of prompting.
    pub departments: Option<Vec<String>>,
}

/// Run the chat on the process's stdin and stdout.
pub async fn run_chat(services: &Services, options: ChatOptions) -> Result<()> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    chat_loop(services, options, stdin, &mut stdout).await
}

/// The chat session itself, over any line source and writer.
pub async fn chat_loop<R, W>(
    services: &Services,
    options: ChatOptions,
    input: R,
    out: &mut W,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut lines = input.lines();
    let welcome = flow::welcome(&services.config);
    let policy = welcome.upload.clone();
    let mut session = SessionContext::new(services.config.upload.timeout());

    for message in &welcome.messages {
        writeln!(out, "{}", message)?;
    }

    // Upload
    let mut preset = options.file;
    loop {
        let path = match preset.take() {
            Some(path) => path,
            None => {
                write!(out, "File path ({}): ", policy.accept.join(", "))?;
                out.flush()?;
                let window = services.config.upload.timeout();
                let line = match tokio::time::timeout(window, lines.next_line()).await {
                    Ok(line) => line?,
                    Err(_) => {
                        writeln!(out, "{}", QaError::UploadTimeout(policy.timeout_secs))?;
                        return Ok(());
                    }
                };
                match line {
                    Some(line) if !line.trim().is_empty() => PathBuf::from(line.trim()),
                    Some(_) => continue,
                    None => return Ok(()),
                }
            }
        };

        let file = match read_upload(&path).await {
            Ok(file) => file,
            Err(e) => {
                writeln!(out, "Could not read {}: {}", path.display(), e)?;
                continue;
            }
        };
        match flow::receive_upload(&policy, &mut session, vec![file]) {
            Ok(receipt) => {
                for message in receipt.messages {
                    writeln!(out, "{}", message)?;
                }
                break;
            }
            Err(QaError::UploadTimeout(secs)) => {
                writeln!(out, "{}", QaError::UploadTimeout(secs))?;
                return Ok(());
            }
            Err(e) => writeln!(out, "{}", e)?,
        }
    }

    // Departments
    let selection = match options.departments {
        Some(selection) => selection,
        None => {
            writeln!(out, "Options: {}", welcome.department_options.join(", "))?;
            write!(out, "Departments (comma-separated, blank for none): ")?;
            out.flush()?;
            match lines.next_line().await? {
                Some(line) => parse_selection(&line),
                None => return Ok(()),
            }
        }
    };

    match flow::apply_settings(services, &mut session, selection.as_slice()).await {
        Ok(outcome) => {
            for message in outcome.messages {
                writeln!(out, "{}", message)?;
            }
        }
        Err(e) => {
            writeln!(out, "Error: {}", e)?;
            return Ok(());
        }
    }

    // Questions
    loop {
        write!(out, "> ")?;
        out.flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question == "exit" || question == "quit" {
            break;
        }

        if let Err(e) = ask(&session, question, out).await {
            writeln!(out, "\nError: {}", e)?;
        }
    }

    writeln!(out)?;
    Ok(())
}

async fn ask<W: Write>(session: &SessionContext, question: &str, out: &mut W) -> Result<(), QaError> {
    let mut answers = query::answer_streaming(session, question)?;
    let mut streamed = String::new();

    while let Some(event) = answers.next().await {
        match event? {
            AnswerEvent::Token(text) => {
                write!(out, "{}", text).map_err(anyhow::Error::from)?;
                out.flush().map_err(anyhow::Error::from)?;
                streamed.push_str(&text);
            }
            AnswerEvent::Done(answer) => {
                print_answer_tail(&answer, &streamed, out).map_err(anyhow::Error::from)?;
            }
        }
    }
    Ok(())
}

/// Print whatever of the final answer was not streamed, then the panels.
fn print_answer_tail<W: Write>(answer: &SourcedAnswer, streamed: &str, out: &mut W) -> std::io::Result<()> {
    let tail = answer.answer.strip_prefix(streamed).unwrap_or(&answer.answer);
    writeln!(out, "{}", tail)?;
    for citation in &answer.citations {
        writeln!(out, "--- {} ---", citation.name)?;
        writeln!(out, "{}", citation.content)?;
    }
    Ok(())
}

fn parse_selection(line: &str) -> Vec<String> {
    line.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read a local file as an upload, taking its MIME type from the extension.
async fn read_upload(path: &Path) -> Result<UploadedFile> {
    let content = tokio::fs::read(path).await?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let mime = path
        .extension()
        .and_then(|e| e.to_str())
        .and_then(FileKind::from_extension)
        .map(|kind| kind.mime())
        .unwrap_or("application/octet-stream");
    Ok(UploadedFile::new(name, mime, content))
}
