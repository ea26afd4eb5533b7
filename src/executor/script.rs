//! Script execution tools for `SCRIPT TEMPLATE` sections.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::ExecutionToolsError;
use crate::template::Parameters;

/// One script to run, with the parameter values it may read.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptRequest {
    /// Info string of the fenced block, e.g. `sh` or `python`.
    pub language: Option<String>,
    pub script: String,
    pub parameters: Parameters,
}

/// Runs scripts on behalf of the executor.
#[async_trait]
pub trait ScriptExecutionTools: Send + Sync {
    /// Run the script and return what it printed.
    async fn execute(&self, request: &ScriptRequest) -> Result<String, ExecutionToolsError>;
}

/// Runs scripts in a local interpreter process.
///
/// The script is written to the interpreter's stdin and every parameter is
/// exported as an environment variable of the same name. The trimmed stdout is
/// the result; a non-zero exit status is a failure carrying stderr.
pub struct ProcessScriptTools {
    timeout: Duration,
}

impl Default for ProcessScriptTools {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl ProcessScriptTools {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn interpreter(language: Option<&str>) -> Result<(&'static str, &'static [&'static str]), ExecutionToolsError> {
        match language.map(str::to_lowercase).as_deref() {
            None | Some("") | Some("sh") | Some("shell") => Ok(("sh", &["-s"])),
            Some("bash") => Ok(("bash", &["-s"])),
            Some("python") | Some("py") | Some("python3") => Ok(("python3", &["-"])),
            Some("javascript") | Some("js") | Some("node") => Ok(("node", &["-"])),
            Some(other) => Err(ExecutionToolsError::Script(format!("unsupported script language '{other}'"))),
        }
    }
}

#[async_trait]
impl ScriptExecutionTools for ProcessScriptTools {
    async fn execute(&self, request: &ScriptRequest) -> Result<String, ExecutionToolsError> {
        let (program, args) = Self::interpreter(request.language.as_deref())?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&request.parameters)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(interpreter = program, "Running script");
        let mut child = cmd
            .spawn()
            .map_err(|e| ExecutionToolsError::Script(format!("failed to spawn {program}: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.script.as_bytes())
                .await
                .map_err(|e| ExecutionToolsError::Script(format!("failed to write script: {e}")))?;
            stdin.shutdown().await.ok();
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(ExecutionToolsError::Script(format!("process error: {e}"))),
            Err(_) => {
                return Err(ExecutionToolsError::Script(format!(
                    "script timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExecutionToolsError::Script(format!(
                "{program} exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(script: &str, pairs: &[(&str, &str)]) -> ScriptRequest {
        ScriptRequest {
            language: Some("sh".into()),
            script: script.into(),
            parameters: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[tokio::test]
    async fn test_parameters_are_exported() {
        let tools = ProcessScriptTools::default();
        let output = tools
            .execute(&request("echo \"hi $name\"", &[("name", "Ada")]))
            .await
            .unwrap();
        assert_eq!(output, "hi Ada");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_an_error() {
        let tools = ProcessScriptTools::default();
        let err = tools.execute(&request("echo broken >&2; exit 3", &[])).await.unwrap_err();
        assert!(matches!(&err, ExecutionToolsError::Script(message) if message.contains("broken")));
    }

    #[tokio::test]
    async fn test_unknown_language_rejected() {
        let tools = ProcessScriptTools::default();
        let mut req = request("print 1", &[]);
        req.language = Some("cobol".into());
        assert!(tools.execute(&req).await.is_err());
    }
}
