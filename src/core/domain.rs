use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::constants::TIME_LIMIT_MSG;

#[derive(Clone, Debug)]
pub struct ExecutionJob {
    pub id: Uuid,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub code: String,
    pub language: Language,
    pub stdin: Option<String>,
}

impl ExecutionJob {
    pub fn new(code: String, language: Language, stdin: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            code,
            language,
            stdin,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Cpp,
    Java,
}

impl Language {
    pub const ALL: [Language; 3] = [Language::C, Language::Cpp, Language::Java];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Java => "java",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown language: {0}")]
pub struct UnknownLanguage(pub String);

impl FromStr for Language {
    type Err = UnknownLanguage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "c" => Ok(Language::C),
            "cpp" | "c++" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            other => Err(UnknownLanguage(other.to_string())),
        }
    }
}

impl<'de> serde::Deserialize<'de> for Language {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Succeeded,
    CompileFailed,
    RuntimeFailed,
    TimedOut,
    InternalError,
}

/// Terminal outcome of one job. `output` is the single string shown to
/// clients; `stdout` and `stderr` keep what the process actually wrote.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    pub output: String,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn succeeded(stdout: String, stderr: String, duration: Duration) -> Self {
        let output = if stdout.is_empty() {
            stderr.clone()
        } else {
            stdout.clone()
        };
        Self {
            status: ExecutionStatus::Succeeded,
            output,
            stdout,
            stderr,
            duration,
        }
    }

    pub fn failed(
        status: ExecutionStatus,
        fallback: String,
        stdout: String,
        stderr: String,
        duration: Duration,
    ) -> Self {
        let output = if stderr.is_empty() {
            fallback
        } else {
            stderr.clone()
        };
        Self {
            status,
            output,
            stdout,
            stderr,
            duration,
        }
    }

    pub fn timed_out(stdout: String, stderr: String, duration: Duration) -> Self {
        Self {
            status: ExecutionStatus::TimedOut,
            output: TIME_LIMIT_MSG.to_string(),
            stdout,
            stderr,
            duration,
        }
    }

    pub fn internal_error(msg: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: ExecutionStatus::InternalError,
            output: msg.into(),
            stdout: String::new(),
            stderr: String::new(),
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_parsing_accepts_aliases() {
        assert_eq!("c".parse::<Language>(), Ok(Language::C));
        assert_eq!("CPP".parse::<Language>(), Ok(Language::Cpp));
        assert_eq!("c++".parse::<Language>(), Ok(Language::Cpp));
        assert_eq!(" Java ".parse::<Language>(), Ok(Language::Java));
        assert_eq!(
            "python".parse::<Language>(),
            Err(UnknownLanguage("python".to_string()))
        );
    }

    #[test]
    fn test_succeeded_falls_back_to_stderr() {
        let result = ExecutionResult::succeeded(
            String::new(),
            "warning: unused".to_string(),
            Duration::ZERO,
        );
        assert_eq!(result.output, "warning: unused");

        let result = ExecutionResult::succeeded(
            "7\n".to_string(),
            "warning: unused".to_string(),
            Duration::ZERO,
        );
        assert_eq!(result.output, "7\n");
    }

    #[test]
    fn test_failed_prefers_stderr_over_fallback() {
        let result = ExecutionResult::failed(
            ExecutionStatus::RuntimeFailed,
            "exit status 1".to_string(),
            "partial".to_string(),
            "Segmentation fault".to_string(),
            Duration::ZERO,
        );
        assert_eq!(result.output, "Segmentation fault");
        assert_eq!(result.stdout, "partial");

        let result = ExecutionResult::failed(
            ExecutionStatus::RuntimeFailed,
            "exit status 1".to_string(),
            String::new(),
            String::new(),
            Duration::ZERO,
        );
        assert_eq!(result.output, "exit status 1");
    }

    #[test]
    fn test_timed_out_uses_fixed_message() {
        let result =
            ExecutionResult::timed_out("tick\n".to_string(), String::new(), Duration::ZERO);
        assert_eq!(result.status, ExecutionStatus::TimedOut);
        assert_eq!(result.output, "Error: Time Limit Exceeded (5 seconds)");
        assert_eq!(result.stdout, "tick\n");
    }
}
