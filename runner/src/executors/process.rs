use crate::ingest::RunOutput;
use nix::{
    errno::Errno,
    sys::signal::{killpg, Signal},
    unistd::Pid,
};
use std::{
    io::{self, Read},
    os::unix::process::CommandExt,
    process::{Child, Command, Stdio},
    sync::mpsc::{self, Receiver},
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, trace, warn};
use wait_timeout::ChildExt;

/// time granted to the pipe readers once the process group is gone
const DRAIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("Failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} timed out after {}s", .after.as_secs())]
    Timeout {
        program: String,
        after: Duration,
        // whatever was printed before the child was killed
        output: RunOutput,
    },
}

// read a pipe to its end on a dedicated thread, so a chatty child never blocks on a full pipe
fn drain<R: Read + Send + 'static>(source: Option<R>) -> Receiver<String> {
    let (sender, receiver) = mpsc::channel();

    if let Some(mut source) = source {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            if let Err(e) = source.read_to_end(&mut buffer) {
                debug!("Stopped reading child output early: {e}");
            }

            // the receiver is gone if the child timed out and the grace period passed
            let _ = sender.send(String::from_utf8_lossy(&buffer).into_owned());
        });
    }

    receiver
}

// the child leads its own process group, so this also reaches everything it started
fn kill_group(child: &Child, program: &str) {
    match killpg(Pid::from_raw(child.id() as i32), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => debug!("Failed to kill process group of {program}: {e}"),
    }
}

/// Run `command` to completion, killing it once `timeout` elapsed. Standard input is closed,
/// standard output and error are captured.
///
/// The child runs in a new process group. Once it exited or timed out, the whole group is
/// killed, so neither compiler jobs of a build nor processes a benchmark left in the
/// background outlive the step or keep its pipes open.
pub fn run_with_timeout(command: &mut Command, timeout: Duration) -> Result<RunOutput, ProcessError> {
    let program = command.get_program().to_string_lossy().into_owned();
    let start = Instant::now();

    let mut child = command
        .process_group(0)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ProcessError::Spawn {
            program: program.clone(),
            source,
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let waited = child.wait_timeout(timeout).map_err(|source| ProcessError::Wait {
        program: program.clone(),
        source,
    });

    match waited {
        Ok(Some(status)) => {
            let runtime = start.elapsed();
            kill_group(&child, &program);

            let output = RunOutput {
                runtime,
                stdout: stdout.recv_timeout(DRAIN_GRACE).unwrap_or_default(),
                stderr: stderr.recv_timeout(DRAIN_GRACE).unwrap_or_default(),
                status: status.code(),
            };

            debug!(
                "{program} finished in {} ms | status: {:?}",
                output.runtime.as_millis(),
                output.status
            );
            trace!("Output: {}", output.stdout);

            Ok(output)
        }
        Ok(None) => {
            warn!("{program} did not finish within {}s, killing it", timeout.as_secs());

            kill_group(&child, &program);
            // the child may have exited in the meantime, reaping it is all that matters
            let _ = child.wait();

            Err(ProcessError::Timeout {
                program,
                after: timeout,
                output: RunOutput {
                    runtime: start.elapsed(),
                    stdout: stdout.recv_timeout(DRAIN_GRACE).unwrap_or_default(),
                    stderr: stderr.recv_timeout(DRAIN_GRACE).unwrap_or_default(),
                    status: None,
                },
            })
        }
        Err(e) => {
            kill_group(&child, &program);
            let _ = child.wait();

            Err(e)
        }
    }
}
