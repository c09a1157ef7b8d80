//! Running the ffmpeg family of command line tools.

use std::ffi::OsStr;
use std::path::Path;

use tokio::process::Command;
use tracing::debug;

use crate::{MediaError, Result};

/// Runs `program` with `args` and returns its stdout.
///
/// A missing binary and a non-zero exit are both reported as errors, the
/// latter with the tool's stderr attached.
pub(crate) async fn run<I, S>(program: &Path, args: I) -> Result<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let tool = program.display().to_string();
    let mut command = Command::new(program);
    command.args(args).kill_on_drop(true);
    debug!(command = ?command.as_std(), "Running media tool");

    let output = match command.output().await {
        Ok(output) => output,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(MediaError::ToolMissing(tool));
        }
        Err(e) => return Err(e.into()),
    };

    if !output.status.success() {
        return Err(MediaError::ToolFailed {
            tool,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
