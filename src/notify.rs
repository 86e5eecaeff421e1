//! Alert mail.
//!
//! Mail goes through the local `mail` command:
//! `mail -s <subject> -r <from> -- <to...>` with the body on stdin.
//! Bodies and subjects are stripped of non-printable characters first,
//! otherwise `mail` sends the body as an attachment.

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::{debug, info};

use crate::error::AdhocError;

/// Keeps printable characters plus newlines and tabs.
pub fn strip_non_printable(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// `Server <serverid> : <timestamp>  <metric>`.
pub fn subject(serverid: &str, timestamp: &str, metric: &str) -> String {
    format!("Server {serverid} : {timestamp}  {metric}")
}

/// One outgoing alert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mail {
    pub subject: String,
    pub body: String,
}

impl Mail {
    pub fn new(subject: &str, body: &str) -> Self {
        Self {
            subject: strip_non_printable(subject).replace(['\n', '\t'], " "),
            body: strip_non_printable(body),
        }
    }
}

pub trait Mailer {
    fn send(&mut self, mail: &Mail) -> Result<(), AdhocError>;
}

/// Sends through the local mail command.
#[derive(Clone, Debug)]
pub struct MailCommand {
    program: PathBuf,
    from: String,
    to: Vec<String>,
}

impl MailCommand {
    pub fn new(from: &str, to: &[String]) -> Self {
        Self {
            program: PathBuf::from("mail"),
            from: from.to_string(),
            to: to.to_vec(),
        }
    }

    pub fn with_program(mut self, program: PathBuf) -> Self {
        self.program = program;
        self
    }

    fn command(&self, mail: &Mail) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-s")
            .arg(&mail.subject)
            .arg("-r")
            .arg(&self.from)
            .arg("--")
            .args(&self.to);
        cmd
    }
}

impl Mailer for MailCommand {
    fn send(&mut self, mail: &Mail) -> Result<(), AdhocError> {
        if self.to.is_empty() {
            return Err(AdhocError::Mail("no recipients configured".to_string()));
        }
        debug!(program = %self.program.display(), to = ?self.to, "sending mail");
        let mut child = self
            .command(mail)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AdhocError::Mail(format!("{}: {}", self.program.display(), e)))?;
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(mail.body.as_bytes())
                .map_err(|e| AdhocError::Mail(e.to_string()))?;
        }
        let output = child
            .wait_with_output()
            .map_err(|e| AdhocError::Mail(e.to_string()))?;
        if !output.status.success() {
            return Err(AdhocError::Mail(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        info!(subject = %mail.subject, "email sent successfully");
        Ok(())
    }
}

/// Prints mail instead of sending it (dry run).
pub struct PrintMailer<W: Write> {
    out: W,
}

impl<W: Write> PrintMailer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> Mailer for PrintMailer<W> {
    fn send(&mut self, mail: &Mail) -> Result<(), AdhocError> {
        writeln!(
            self.out,
            "--- mail (dry run) ---\nSubject: {}\n\n{}\n----------------------",
            mail.subject, mail.body
        )
        .map_err(|e| AdhocError::Mail(e.to_string()))
    }
}

/// Collects mail in memory.
#[derive(Debug, Default)]
pub struct MemoryMailer {
    pub sent: Vec<Mail>,
    /// Fail every send.
    pub broken: bool,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn broken() -> Self {
        Self {
            sent: Vec::new(),
            broken: true,
        }
    }
}

impl Mailer for MemoryMailer {
    fn send(&mut self, mail: &Mail) -> Result<(), AdhocError> {
        if self.broken {
            return Err(AdhocError::Mail("mail transport unavailable".to_string()));
        }
        self.sent.push(mail.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_control_characters() {
        assert_eq!(
            strip_non_printable("a\u{1b}[0mb\r\nc\td\u{7}"),
            "a[0mb\nc\td"
        );
    }

    #[test]
    fn subject_template() {
        assert_eq!(
            subject("prod-1", "2026-01-02 03:04:05", "load saturation"),
            "Server prod-1 : 2026-01-02 03:04:05  load saturation"
        );
    }

    #[test]
    fn mail_subject_is_single_line() {
        let m = Mail::new("two\nlines", "body\u{0}");
        assert_eq!(m.subject, "two lines");
        assert_eq!(m.body, "body");
    }

    #[test]
    fn print_mailer_writes_subject_and_body() {
        let mut buf = Vec::new();
        PrintMailer::new(&mut buf)
            .send(&Mail::new("subj", "hello"))
            .unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("Subject: subj"));
        assert!(text.contains("hello"));
    }

    #[test]
    fn command_without_recipients_fails() {
        let mut m = MailCommand::new("pg@localhost", &[]);
        assert!(matches!(
            m.send(&Mail::new("s", "b")),
            Err(AdhocError::Mail(_))
        ));
    }

    #[test]
    fn missing_mail_program_is_mail_error() {
        let mut m = MailCommand::new("pg@localhost", &["dba@localhost".to_string()])
            .with_program(PathBuf::from("/nonexistent/mail"));
        assert!(matches!(
            m.send(&Mail::new("s", "b")),
            Err(AdhocError::Mail(_))
        ));
    }

    #[test]
    fn command_arguments() {
        let m = MailCommand::new("pg@localhost", &["a@x".to_string(), "b@x".to_string()]);
        let cmd = m.command(&Mail::new("subj", "body"));
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args, ["-s", "subj", "-r", "pg@localhost", "--", "a@x", "b@x"]);
    }
}
