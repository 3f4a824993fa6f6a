//! The real Python kernel. Skipped when no `python3` is on PATH.

use std::sync::Arc;
use std::time::Duration;

use leakbench_core::fakes::{tool_use_response, ScriptedProvider};
use leakbench_core::model::ContentBlock;
use leakbench_core::sandbox::{NamespaceSeed, QUOTA_EXCEEDED_MESSAGE};
use leakbench_core::{
    ColumnData, EpisodeRunner, HarnessConfig, KernelLauncher, LeakToggles, PrintQuota,
    ProblemProvider, PythonLauncher, RetryPolicy, SandboxError, SandboxExecutor,
    SubmissionRegistry, SyntheticLeakProvider, Table, Termination,
};
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tokio::time::timeout;

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn seed() -> NamespaceSeed {
    let table = Table::new()
        .with_column("x", ColumnData::Float(vec![1.0, f64::NAN, 3.0]))
        .unwrap()
        .with_column("c", ColumnData::Category(vec![0, 1, 0]))
        .unwrap();
    let mut seed = NamespaceSeed::default();
    seed.tables.insert("train_df".into(), table);
    let mut variables = Map::new();
    variables.insert("present_leaks".into(), json!(["leak_a"]));
    seed.variables = variables;
    seed
}

async fn executor(quota: usize) -> (SandboxExecutor, Arc<SubmissionRegistry>) {
    let kernel = PythonLauncher::new("python3").launch(&seed()).await.unwrap();
    let registry = Arc::new(SubmissionRegistry::new());
    let exec = SandboxExecutor::new(kernel, PrintQuota::new(quota), 1000, registry.clone());
    (exec, registry)
}

#[tokio::test]
async fn namespace_persists_between_fragments() {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return;
    }
    let (mut exec, _) = executor(10).await;

    let first = exec.execute("y = 40").await.unwrap();
    assert!(first.error.is_none(), "{first:?}");
    let second = exec.execute("print(y + 2, present_leaks[0])").await.unwrap();
    assert_eq!(second.output, "42 leak_a\n");
    assert_eq!(exec.quota().used(), 2);

    exec.shutdown().await;
}

#[tokio::test]
async fn exceptions_come_back_as_text() {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return;
    }
    let (mut exec, _) = executor(10).await;

    let report = exec.execute("print('partial')\n1 / 0").await.unwrap();
    assert_eq!(report.output, "partial\n");
    assert!(report.error.unwrap().starts_with("ZeroDivisionError"));

    let after = exec.execute("print('still alive')").await.unwrap();
    assert_eq!(after.output, "still alive\n");
    exec.shutdown().await;
}

#[tokio::test]
async fn print_quota_raises_inside_python() {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return;
    }
    let (mut exec, _) = executor(3).await;

    let report = exec.execute("print(1, 2)\nprint(3, 4)").await.unwrap();
    assert_eq!(report.output, "1 2\n");
    assert!(report.error.unwrap().contains(QUOTA_EXCEEDED_MESSAGE));
    exec.shutdown().await;
}

#[tokio::test]
async fn submit_answer_reaches_the_registry() {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return;
    }
    let (mut exec, registry) = executor(10).await;

    let report = exec
        .execute("r = submit_answer({'y_pred_proba': (0.25, 0.75)})\nprint(r['submitted'])")
        .await
        .unwrap();
    assert!(report.error.is_none(), "{report:?}");
    assert_eq!(report.output, "True\n");

    let stored = registry.pop().unwrap();
    assert_eq!(stored, json!({"y_pred_proba": {"__tuple__": [0.25, 0.75]}}));

    let rejected = exec
        .execute("print(submit_answer([1, 2])['submitted'])")
        .await
        .unwrap();
    assert_eq!(rejected.output, "False\n");
    assert!(registry.is_empty());
    exec.shutdown().await;
}

#[tokio::test]
async fn sys_exit_is_an_ordinary_fragment_error() {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return;
    }
    let (mut exec, _) = executor(10).await;

    let report = exec.execute("import sys\nsys.exit(0)").await.unwrap();
    assert_eq!(report.error.as_deref(), Some("SystemExit: 0"));

    let after = exec.execute("print('still alive')").await.unwrap();
    assert_eq!(after.output, "still alive\n");
    exec.shutdown().await;
}

#[tokio::test]
async fn input_sees_an_empty_stdin() {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return;
    }
    let (mut exec, _) = executor(10).await;

    let report = timeout(Duration::from_secs(10), exec.execute("name = input()"))
        .await
        .expect("input() must not block on the host channel")
        .unwrap();
    assert!(report.error.unwrap().starts_with("EOFError"));

    let after = exec.execute("print('next')").await.unwrap();
    assert_eq!(after.output, "next\n");
    exec.shutdown().await;
}

#[tokio::test]
async fn hard_exit_is_a_kernel_failure() {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return;
    }
    let (mut exec, _) = executor(10).await;

    let err = exec.execute("import os\nos._exit(3)").await.unwrap_err();
    assert!(matches!(err, SandboxError::KernelExited), "{err:?}");
    assert!(!err.is_abort());
    exec.shutdown().await;
}

#[tokio::test]
async fn abort_signal_interrupts_a_busy_loop() {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return;
    }
    let (exec, _) = executor(10).await;
    let (tx, rx) = watch::channel(false);
    let mut exec = exec.with_abort_signal(rx);

    let interrupt = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        tx
    });

    let err = timeout(Duration::from_secs(10), exec.execute("while True:\n    pass"))
        .await
        .expect("abort must interrupt the fragment")
        .unwrap_err();
    assert!(matches!(err, SandboxError::Aborted(_)));
    interrupt.await.unwrap();
    exec.shutdown().await;
}

fn episode_config() -> HarnessConfig {
    HarnessConfig {
        n_train: 160,
        n_test: 40,
        max_steps: 5,
        verbose: false,
        retry: RetryPolicy {
            max_retries: 2,
            base_delay_ms: 1,
            max_jitter_ms: 0,
        },
        ..HarnessConfig::default()
    }
}

/// JSON tool result the model received for the first tool call of step 1.
fn first_tool_result(provider: &ScriptedProvider) -> Value {
    let requests = provider.requests();
    requests[1][2]
        .content
        .iter()
        .find_map(|block| match block {
            ContentBlock::ToolResult { content, .. } => Some(serde_json::from_str(content).unwrap()),
            _ => None,
        })
        .unwrap()
}

#[tokio::test]
async fn episode_survives_sys_exit_in_agent_code() {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return;
    }
    let config = episode_config();
    let problems = SyntheticLeakProvider::new(LeakToggles::default());
    let problem = problems.make_problem(1001, config.n_train, config.n_test).unwrap();
    let probas: Vec<f64> = problem.test_labels.iter().map(|&y| f64::from(y)).collect();

    let provider = ScriptedProvider::new(vec![
        Ok(tool_use_response(&[(
            "c1",
            "python_expression",
            json!({"expression": "import sys\nsys.exit(0)"}),
        )])),
        Ok(tool_use_response(&[(
            "s1",
            "submit_answer",
            json!({"answer": {"y_pred_proba": probas}}),
        )])),
    ]);
    let launcher = PythonLauncher::new("python3");
    let runner = EpisodeRunner::new(&config, &problems);

    let report = runner.run_agent_episode(&provider, &launcher, 1).await.unwrap();

    assert_eq!(report.termination, Some(Termination::Submitted));
    assert!(report.result.passed, "{:?}", report.result);
    assert_eq!(first_tool_result(&provider)["error"], json!("SystemExit: 0"));
}

#[tokio::test]
async fn hard_exit_fails_the_episode_instead_of_the_run() {
    if !python_available() {
        eprintln!("python3 not found; skipping");
        return;
    }
    let config = episode_config();
    let problems = SyntheticLeakProvider::new(LeakToggles::default());
    let provider = ScriptedProvider::new(vec![Ok(tool_use_response(&[(
        "c1",
        "python_expression",
        json!({"expression": "import os\nos._exit(3)"}),
    )]))]);
    let launcher = PythonLauncher::new("python3");
    let runner = EpisodeRunner::new(&config, &problems);

    let report = runner.run_agent_episode(&provider, &launcher, 2).await.unwrap();

    assert_eq!(report.termination, Some(Termination::KernelFailed));
    assert!(!report.result.passed);
    assert!(report.result.failure.unwrap().starts_with("kernel failed"));
}
