use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::{
    constants::{INPUT_FILE_NAME, OUTPUT_TRUNCATED_MSG, UNSUPPORTED_LANGUAGE_MSG},
    core::{
        domain::{ExecutionJob, ExecutionResult, ExecutionStatus},
        language::LanguageRegistry,
        traits::{
            language::LaunchPlan,
            processor::{JobProcessor, ProcessError},
            sandbox::{Sandbox, SandboxOutput},
        },
    },
    native::workspace::{Workspace, WorkspaceError, WorkspaceManager},
};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Build,
    Run,
}

/// Takes one job from a fresh workspace to a terminal result. The workspace
/// is removed on every path out of `process`.
#[derive(Debug)]
pub struct ExecutionPipeline {
    workspaces: WorkspaceManager,
    languages: Arc<LanguageRegistry>,
    sandbox: Arc<dyn Sandbox>,
    time_limit: Duration,
}

impl ExecutionPipeline {
    pub fn new(
        workspaces: WorkspaceManager,
        languages: Arc<LanguageRegistry>,
        sandbox: Arc<dyn Sandbox>,
        time_limit: Duration,
    ) -> Self {
        Self {
            workspaces,
            languages,
            sandbox,
            time_limit,
        }
    }

    async fn run_in_workspace(
        &self,
        workspace: &mut Workspace,
        plan: &LaunchPlan,
        job: &ExecutionJob,
        started: Instant,
    ) -> Result<ExecutionResult, WorkspaceError> {
        workspace
            .write_file(INPUT_FILE_NAME, job.stdin.as_deref().unwrap_or(""))
            .await?;
        for file in &plan.files {
            workspace.write_file(&file.name, &file.contents).await?;
        }
        tracing::debug!(
            "Workspace for job {} prepared with {} files, command: {}",
            workspace.job_id(),
            workspace.files().len(),
            plan.command_line()
        );

        // Build and run share one wall-clock budget.
        let deadline = started + self.time_limit;

        if let Some(build) = &plan.build {
            match self.invoke(build, workspace, deadline, started).await {
                Ok(out) if out.success() => {}
                outcome => return Ok(into_result(Phase::Build, outcome, started)),
            }
        }

        let outcome = self.invoke(&plan.run, workspace, deadline, started).await;
        Ok(into_result(Phase::Run, outcome, started))
    }

    async fn invoke(
        &self,
        command: &str,
        workspace: &Workspace,
        deadline: Instant,
        started: Instant,
    ) -> Result<SandboxOutput, String> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(SandboxOutput {
                killed: true,
                duration: started.elapsed(),
                ..Default::default()
            });
        }

        self.sandbox
            .run(command, workspace.path(), remaining)
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait::async_trait]
impl JobProcessor for ExecutionPipeline {
    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, language = %job.language))]
    async fn process(&self, job: &ExecutionJob) -> Result<ExecutionResult, ProcessError> {
        let started = Instant::now();

        let Some(adapter) = self.languages.get(&job.language) else {
            tracing::warn!("No adapter configured for {}", job.language);
            return Ok(ExecutionResult::internal_error(
                UNSUPPORTED_LANGUAGE_MSG,
                started.elapsed(),
            ));
        };
        let plan = adapter.plan(&job.code);

        let mut workspace =
            self.workspaces
                .create(job.id)
                .await
                .map_err(|e| ProcessError::Workspace {
                    msg: e.to_string(),
                })?;

        let outcome = self
            .run_in_workspace(&mut workspace, &plan, job, started)
            .await;
        workspace.cleanup().await;

        let result = outcome.map_err(|e| ProcessError::Workspace {
            msg: e.to_string(),
        })?;
        tracing::info!(
            status = ?result.status,
            "Job finished in {:?}",
            result.duration
        );
        Ok(result)
    }
}

fn into_result(
    phase: Phase,
    outcome: Result<SandboxOutput, String>,
    started: Instant,
) -> ExecutionResult {
    let out = match outcome {
        Ok(out) => out,
        Err(msg) => {
            tracing::error!("Sandbox failed: {}", msg);
            return ExecutionResult::internal_error(
                format!("Server Error: {}", msg),
                started.elapsed(),
            );
        }
    };
    let duration = started.elapsed();
    let truncated = out.truncated;

    let mut result = if out.killed {
        ExecutionResult::timed_out(out.stdout, out.stderr, duration)
    } else if out.success() {
        ExecutionResult::succeeded(out.stdout, out.stderr, duration)
    } else {
        let status = match phase {
            Phase::Build => ExecutionStatus::CompileFailed,
            Phase::Run => ExecutionStatus::RuntimeFailed,
        };
        let fallback = out.describe_exit();
        ExecutionResult::failed(status, fallback, out.stdout, out.stderr, duration)
    };

    if truncated && result.status != ExecutionStatus::TimedOut {
        result.output.push_str(OUTPUT_TRUNCATED_MSG);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Toolchains,
        core::{
            domain::Language,
            pool::WorkerPool,
            queue::{JobQueue, QueueError, QueueOptions},
            traits::{
                language::{LanguageAdapter, SourceFile},
                sandbox::{MockSandbox, SandboxError},
            },
        },
        native::sandbox::NativeSandbox,
    };
    use std::path::{Path, PathBuf};
    use uuid::Uuid;

    /// Treats the submitted code as a shell script, so pipeline behavior can
    /// be exercised without a compiler installed.
    #[derive(Debug)]
    struct ShellScriptAdapter;

    impl LanguageAdapter for ShellScriptAdapter {
        fn language(&self) -> Language {
            Language::C
        }

        fn plan(&self, code: &str) -> LaunchPlan {
            LaunchPlan {
                files: vec![SourceFile {
                    name: "main.sh".to_string(),
                    contents: code.to_string(),
                }],
                build: None,
                run: format!("sh main.sh < {}", INPUT_FILE_NAME),
            }
        }
    }

    fn test_root() -> PathBuf {
        std::env::temp_dir().join(format!("coderunner_pipeline_{}", Uuid::new_v4()))
    }

    fn gnu_registry() -> Arc<LanguageRegistry> {
        Arc::new(LanguageRegistry::from_toolchains(
            &Toolchains::default(),
            &[Language::C],
        ))
    }

    fn pipeline_with_mock(
        sandbox: MockSandbox,
        languages: Arc<LanguageRegistry>,
    ) -> (ExecutionPipeline, WorkspaceManager) {
        let workspaces = WorkspaceManager::new(test_root()).unwrap();
        let pipeline = ExecutionPipeline::new(
            workspaces.clone(),
            languages,
            Arc::new(sandbox),
            Duration::from_secs(5),
        );
        (pipeline, workspaces)
    }

    fn shell_pipeline(time_limit: Duration) -> (ExecutionPipeline, WorkspaceManager) {
        let workspaces = WorkspaceManager::new(test_root()).unwrap();
        let languages =
            Arc::new(LanguageRegistry::new().with_adapter(Arc::new(ShellScriptAdapter)));
        let pipeline = ExecutionPipeline::new(
            workspaces.clone(),
            languages,
            Arc::new(NativeSandbox::new("/bin/sh", 1024 * 1024)),
            time_limit,
        );
        (pipeline, workspaces)
    }

    fn output(stdout: &str, stderr: &str, exit_code: i32) -> SandboxOutput {
        SandboxOutput {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_code: Some(exit_code),
            ..Default::default()
        }
    }

    fn job(language: Language, code: &str, stdin: Option<&str>) -> ExecutionJob {
        ExecutionJob::new(code.to_string(), language, stdin.map(str::to_string))
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_successful_run_returns_stdout() {
        let mut sandbox = MockSandbox::new();
        let mut seq = mockall::Sequence::new();
        sandbox
            .expect_run()
            .withf(|cmd, _, _| cmd.starts_with("gcc main.c"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, workdir, _| {
                assert!(workdir.join("main.c").exists());
                assert_eq!(
                    std::fs::read_to_string(workdir.join("input.txt")).unwrap(),
                    "3\n4\n"
                );
                Ok(output("", "", 0))
            });
        sandbox
            .expect_run()
            .withf(|cmd, _, _| cmd == "./main < input.txt")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(output("7\n", "", 0)));

        let (pipeline, workspaces) = pipeline_with_mock(sandbox, gnu_registry());
        let job = job(Language::C, "int main() {}", Some("3\n4\n"));

        let result = pipeline.process(&job).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::Succeeded);
        assert_eq!(result.output, "7\n");
        assert!(!workspaces.path_for(job.id).exists());
    }

    #[tokio::test]
    async fn test_build_failure_skips_run() {
        let mut sandbox = MockSandbox::new();
        sandbox
            .expect_run()
            .times(1)
            .returning(|_, _, _| Ok(output("", "main.c:1: error: expected ';'", 1)));

        let (pipeline, workspaces) = pipeline_with_mock(sandbox, gnu_registry());
        let job = job(Language::C, "int main() { return 0 }", None);

        let result = pipeline.process(&job).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::CompileFailed);
        assert_eq!(result.output, "main.c:1: error: expected ';'");
        assert!(!workspaces.path_for(job.id).exists());
    }

    #[tokio::test]
    async fn test_runtime_failure_without_stderr_describes_exit() {
        let mut sandbox = MockSandbox::new();
        let mut seq = mockall::Sequence::new();
        sandbox
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(output("", "", 0)));
        sandbox
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(output("partial", "", 2)));

        let (pipeline, workspaces) = pipeline_with_mock(sandbox, gnu_registry());
        let job = job(Language::C, "int main() { return 2; }", None);

        let result = pipeline.process(&job).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::RuntimeFailed);
        assert_eq!(result.output, "Error: process exited with status 2");
        assert_eq!(result.stdout, "partial");
        assert!(!workspaces.path_for(job.id).exists());
    }

    #[tokio::test]
    async fn test_killed_run_is_time_limit_exceeded() {
        let mut sandbox = MockSandbox::new();
        let mut seq = mockall::Sequence::new();
        sandbox
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(output("", "", 0)));
        sandbox
            .expect_run()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| {
                Ok(SandboxOutput {
                    stdout: "loop".to_string(),
                    killed: true,
                    ..Default::default()
                })
            });

        let (pipeline, workspaces) = pipeline_with_mock(sandbox, gnu_registry());
        let job = job(Language::C, "int main() { while(1); }", None);

        let result = pipeline.process(&job).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::TimedOut);
        assert_eq!(result.output, "Error: Time Limit Exceeded (5 seconds)");
        assert_eq!(result.stdout, "loop");
        assert!(!workspaces.path_for(job.id).exists());
    }

    #[tokio::test]
    async fn test_sandbox_error_becomes_internal_error() {
        let mut sandbox = MockSandbox::new();
        sandbox.expect_run().times(1).returning(|_, _, _| {
            Err(SandboxError::Spawn {
                msg: "No such file or directory".to_string(),
            })
        });

        let (pipeline, workspaces) = pipeline_with_mock(sandbox, gnu_registry());
        let job = job(Language::C, "int main() {}", None);

        let result = pipeline.process(&job).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::InternalError);
        assert_eq!(
            result.output,
            "Server Error: failed to spawn process: No such file or directory"
        );
        assert!(!workspaces.path_for(job.id).exists());
    }

    #[tokio::test]
    async fn test_unsupported_language_creates_no_workspace() {
        let mut sandbox = MockSandbox::new();
        sandbox.expect_run().never();

        let (pipeline, workspaces) = pipeline_with_mock(sandbox, gnu_registry());
        let job = job(Language::Java, "public class Main {}", None);

        let result = pipeline.process(&job).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::InternalError);
        assert_eq!(
            result.output,
            "Error: Unsupported language for local execution"
        );
        assert!(is_empty_dir(workspaces.root()));
    }

    #[tokio::test]
    async fn test_workspace_failure_is_process_error() {
        let mut sandbox = MockSandbox::new();
        sandbox.expect_run().never();

        // /proc is readonly dir
        let pipeline = ExecutionPipeline::new(
            WorkspaceManager::new("/proc").unwrap(),
            gnu_registry(),
            Arc::new(sandbox),
            Duration::from_secs(5),
        );

        let result = pipeline.process(&job(Language::C, "", None)).await;
        assert!(matches!(result, Err(ProcessError::Workspace { .. })));
    }

    #[tokio::test]
    async fn test_concurrent_jobs_are_isolated() {
        let (pipeline, workspaces) = shell_pipeline(Duration::from_secs(5));
        let script = "read value; echo \"$value\" > scratch.txt; sleep 0.2; cat scratch.txt; pwd";

        let first = job(Language::C, script, Some("first\n"));
        let second = job(Language::C, script, Some("second\n"));

        let (a, b) = tokio::join!(pipeline.process(&first), pipeline.process(&second));
        let (a, b) = (a.unwrap(), b.unwrap());

        let mut a_lines = a.stdout.lines();
        let mut b_lines = b.stdout.lines();
        assert_eq!(a_lines.next(), Some("first"));
        assert_eq!(b_lines.next(), Some("second"));
        assert_ne!(a_lines.next(), b_lines.next());
        assert!(is_empty_dir(workspaces.root()));
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out_within_margin() {
        let (pipeline, workspaces) = shell_pipeline(Duration::from_millis(500));
        let job = job(Language::C, "echo started; while true; do :; done", None);

        let started = std::time::Instant::now();
        let result = pipeline.process(&job).await.unwrap();

        assert_eq!(result.status, ExecutionStatus::TimedOut);
        assert_eq!(result.stdout, "started\n");
        assert!(started.elapsed() < Duration::from_millis(1500));
        assert!(!workspaces.path_for(job.id).exists());
    }

    #[tokio::test]
    async fn test_every_outcome_leaves_no_workspace() {
        let (pipeline, workspaces) = shell_pipeline(Duration::from_millis(500));
        let scripts = [
            ("echo ok", ExecutionStatus::Succeeded),
            ("echo boom >&2; exit 1", ExecutionStatus::RuntimeFailed),
            ("sleep 5", ExecutionStatus::TimedOut),
        ];

        for (script, expected) in scripts {
            let job = job(Language::C, script, None);
            let result = pipeline.process(&job).await.unwrap();
            assert_eq!(result.status, expected, "script: {}", script);
            assert!(!workspaces.path_for(job.id).exists());
        }
        assert!(is_empty_dir(workspaces.root()));
    }

    #[tokio::test]
    async fn test_truncated_output_is_flagged() {
        let mut sandbox = MockSandbox::new();
        sandbox.expect_run().times(2).returning(|cmd, _, _| {
            if cmd.starts_with("gcc") {
                return Ok(output("", "", 0));
            }
            Ok(SandboxOutput {
                truncated: true,
                ..output("yyyy", "", 0)
            })
        });

        let (pipeline, _workspaces) = pipeline_with_mock(sandbox, gnu_registry());
        let result = pipeline
            .process(&job(Language::C, "int main() {}", None))
            .await
            .unwrap();

        assert_eq!(result.status, ExecutionStatus::Succeeded);
        assert_eq!(result.output, "yyyy\n[output truncated at 1MB]");
    }

    fn is_running(pid: i32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .is_some_and(|rest| !rest.trim_start().starts_with('Z')),
            Err(_) => false,
        }
    }

    #[tokio::test]
    async fn test_abandoned_attempt_leaves_nothing_running() {
        let (pipeline, workspaces) = shell_pipeline(Duration::from_secs(20));
        let queue = JobQueue::new(QueueOptions {
            attempts: 1,
            backoff: Duration::from_millis(10),
            job_timeout: Duration::from_millis(300),
        });
        let pool = WorkerPool::spawn(queue.clone(), Arc::new(pipeline), 1);

        let pid_file = std::env::temp_dir().join(format!("coderunner_bg_{}.pid", Uuid::new_v4()));
        let script = format!("sleep 47 & echo $! > {}; wait", pid_file.display());
        let err = queue
            .enqueue(job(Language::C, &script, None))
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Failed { attempts: 1, .. }));

        let pid: i32 = std::fs::read_to_string(&pid_file)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let mut alive = true;
        for _ in 0..40 {
            alive = is_running(pid);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive, "background process {} outlived its attempt", pid);
        assert!(is_empty_dir(workspaces.root()));

        let _ = std::fs::remove_file(&pid_file);
        queue.close();
        pool.join().await;
    }
}
