use crate::applier::Applier;
use crate::ApplierError;
use palisade_config::ConfigDocument;
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Applier that shells out to an external materializer tool.
///
/// The subtree is passed as pretty-printed JSON on stdin; a zero exit status
/// means the subtree was materialized. The child is killed at the wall-clock
/// timeout and the engine sees `ApplierError::Timeout`, which it treats like
/// any other materialization failure.
pub struct CommandApplier {
    name: String,
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandApplier {
    pub fn new(name: &str, program: &str, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            name: name.to_owned(),
            program: program.to_owned(),
            args,
            timeout,
        }
    }
}

impl Applier for CommandApplier {
    fn name(&self) -> &str {
        &self.name
    }

    fn materialize(&self, subtree: &ConfigDocument) -> Result<(), ApplierError> {
        let payload = serde_json::to_string_pretty(subtree)?;

        debug!("{}: invoking {} {:?}", self.name, self.program, self.args);
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        // Feed stdin from its own thread: a tool that never drains the pipe
        // must still hit the wall-clock deadline below, and a payload larger
        // than the pipe buffer would otherwise block this thread on write.
        let stdin = child.stdin.take();
        let writer = std::thread::spawn(move || {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(payload.as_bytes());
                // Drop closes the pipe so the tool sees EOF.
            }
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None => {
                    if Instant::now() >= deadline {
                        warn!(
                            "{}: {} exceeded {}s timeout, killing",
                            self.name,
                            self.program,
                            self.timeout.as_secs()
                        );
                        let _ = child.kill();
                        let _ = child.wait();
                        let _ = writer.join();
                        return Err(ApplierError::Timeout(self.timeout.as_secs()));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
            }
        };
        // Child is gone, so the write either finished or failed with EPIPE.
        let _ = writer.join();

        if status.success() {
            return Ok(());
        }
        let stderr = child
            .stderr
            .take()
            .and_then(|mut s| {
                let mut buf = String::new();
                std::io::Read::read_to_string(&mut s, &mut buf).ok()?;
                Some(buf)
            })
            .unwrap_or_default();
        let detail = match status.code() {
            Some(code) => format!(
                "{} exited with code {code}: {}",
                self.program,
                stderr.trim()
            ),
            None => format!("{} terminated by signal", self.program),
        };
        Err(ApplierError::Failed(detail))
    }
}
