use std::time::Duration;

pub const MAX_CODE_BYTES: usize = 100_000;
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

pub const EXECUTION_TIME_LIMIT: Duration = Duration::from_secs(5);
pub const JOB_TIMEOUT: Duration = Duration::from_secs(30);
pub const JOB_ATTEMPTS: u32 = 2;
pub const JOB_BACKOFF: Duration = Duration::from_secs(1);

pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
pub const RATE_LIMIT_MAX: usize = 15;
pub const RATE_LIMIT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub const MIN_WORKERS: usize = 5;

pub const INPUT_FILE_NAME: &str = "input.txt";

pub const SERVICE_NAME: &str = "Logic Ladder Pro - Local Compiler Server";

pub const TIME_LIMIT_MSG: &str = "Error: Time Limit Exceeded (5 seconds)";
pub const UNSUPPORTED_LANGUAGE_MSG: &str = "Error: Unsupported language for local execution";
pub const MISSING_FIELDS_MSG: &str = "Error: Missing required fields (code, language)";
pub const CODE_TOO_LARGE_MSG: &str = "Error: Code size exceeds maximum limit (100KB)";
pub const BODY_TOO_LARGE_MSG: &str = "Error: Request body exceeds maximum size (10MB)";
pub const OUTPUT_TRUNCATED_MSG: &str = "\n[output truncated at 1MB]";
