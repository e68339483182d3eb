//! Tests for the recovery-keeper-cli library module.

use super::*;
use recovery_keeper_core::{
    BackoffSchedule, EnqueueOptions, OperationError, Timestamp,
};
use serde_json::json;
use tempfile::TempDir;

const SECRET: &str = "whsec_cli_test";

fn payload() -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "evt_1",
        "type": "payment.succeeded",
        "data": { "id": "pay_1" }
    }))
    .unwrap()
}

fn write_payload(dir: &TempDir, body: &[u8]) -> PathBuf {
    let path = dir.path().join("payload.json");
    std::fs::write(&path, body).unwrap();
    path
}

fn signature_for(body: &[u8]) -> String {
    SignatureVerifier::new(Some(WebhookSecret::new(SECRET)))
        .sign(body, SignatureFormat::Sha256Prefixed)
        .unwrap()
}

async fn run_command(args: &[&str]) -> (Result<(), CliError>, String) {
    let mut argv = vec!["recovery-keeper"];
    argv.extend_from_slice(args);
    let cli = Cli::try_parse_from(argv).unwrap();
    let mut out = Vec::new();
    let result = execute(cli.command, &mut out).await;
    (result, String::from_utf8(out).unwrap())
}

/// Queue over `dir` whose jobs fall due immediately.
async fn seeded_queue(dir: &Path) -> DeadLetterQueue {
    let store = FilesystemDeadLetterStore::new(dir.to_path_buf()).await.unwrap();
    DeadLetterQueue::new(
        Arc::new(store),
        DeadLetterQueueConfig {
            backoff: BackoffSchedule {
                base_delay: Duration::ZERO,
                max_delay: Duration::ZERO,
                multiplier: 1.0,
                jitter: false,
            },
            ..DeadLetterQueueConfig::default()
        },
    )
}

async fn enqueue(queue: &DeadLetterQueue, job_type: &str, max_retries: u32) -> JobId {
    queue
        .enqueue(
            "order-1",
            job_type,
            json!({ "order": 1 }),
            &OperationError::from_message("connection reset by peer"),
            EnqueueOptions::default()
                .with_max_retries(max_retries)
                .with_company("biz_1"),
        )
        .await
        .unwrap()
}

mod parsing_tests {
    use super::*;

    #[test]
    fn test_sign_defaults_to_sha256_format() {
        let cli = Cli::try_parse_from(["recovery-keeper", "sign", "--secret", "s", "body.json"]).unwrap();

        match cli.command {
            Commands::Sign { format, file, .. } => {
                assert_eq!(format, SignatureFormatArg::Sha256);
                assert_eq!(file, PathBuf::from("body.json"));
            }
            _ => panic!("Expected Sign command"),
        }
    }

    #[test]
    fn test_verify_accepts_environment_aliases() {
        let cli = Cli::try_parse_from([
            "recovery-keeper",
            "verify",
            "--secret",
            "s",
            "--signature",
            "sha256=00",
            "--environment",
            "prod",
            "body.json",
        ])
        .unwrap();

        match cli.command {
            Commands::Verify { environment, .. } => assert_eq!(environment, Environment::Production),
            _ => panic!("Expected Verify command"),
        }
    }

    #[test]
    fn test_dlq_list_parses_status() {
        let cli = Cli::try_parse_from([
            "recovery-keeper",
            "dlq",
            "list",
            "--store",
            "/tmp/dlq",
            "--status",
            "failed",
        ])
        .unwrap();

        match cli.command {
            Commands::Dlq {
                action: DlqCommands::List { status, limit, .. },
            } => {
                assert_eq!(status, Some(DeadLetterStatus::Failed));
                assert_eq!(limit, 20);
            }
            _ => panic!("Expected dlq list command"),
        }
    }

    #[test]
    fn test_unknown_status_rejected() {
        let result = Cli::try_parse_from([
            "recovery-keeper",
            "dlq",
            "list",
            "--store",
            "/tmp/dlq",
            "--status",
            "lost",
        ]);

        assert!(result.is_err());
    }
}

mod sign_verify_tests {
    use super::*;

    #[tokio::test]
    async fn test_sign_prints_header() {
        let dir = TempDir::new().unwrap();
        let body = payload();
        let file = write_payload(&dir, &body);

        let (result, output) =
            run_command(&["sign", "--secret", SECRET, file.to_str().unwrap()]).await;

        result.unwrap();
        assert_eq!(output.trim(), signature_for(&body));
    }

    #[tokio::test]
    async fn test_sign_versioned_format() {
        let dir = TempDir::new().unwrap();
        let file = write_payload(&dir, &payload());

        let (result, output) = run_command(&[
            "sign",
            "--secret",
            SECRET,
            "--format",
            "v1",
            file.to_str().unwrap(),
        ])
        .await;

        result.unwrap();
        assert!(output.starts_with("v1,"));
    }

    #[tokio::test]
    async fn test_empty_secret_rejected() {
        let dir = TempDir::new().unwrap();
        let file = write_payload(&dir, &payload());

        let (result, _) = run_command(&["sign", "--secret", "", file.to_str().unwrap()]).await;

        let error = result.unwrap_err();
        assert_eq!(error.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_verify_valid_payload() {
        let dir = TempDir::new().unwrap();
        let body = payload();
        let file = write_payload(&dir, &body);
        let signature = signature_for(&body);

        let (result, output) = run_command(&[
            "verify",
            "--secret",
            SECRET,
            "--signature",
            &signature,
            file.to_str().unwrap(),
        ])
        .await;

        result.unwrap();
        let verdict: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(verdict["valid"], true);
        assert_eq!(verdict["eventType"], "payment.succeeded");
    }

    #[tokio::test]
    async fn test_verify_wrong_signature_fails() {
        let dir = TempDir::new().unwrap();
        let file = write_payload(&dir, &payload());
        let signature = signature_for(b"something else");

        let (result, output) = run_command(&[
            "verify",
            "--secret",
            SECRET,
            "--signature",
            &signature,
            file.to_str().unwrap(),
        ])
        .await;

        let verdict: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(verdict["signatureValid"], false);
        match result {
            Err(CliError::VerificationFailed { reason }) => assert_eq!(reason, "signature"),
            other => panic!("expected VerificationFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_production_requires_timestamp() {
        let dir = TempDir::new().unwrap();
        let body = payload();
        let file = write_payload(&dir, &body);
        let signature = signature_for(&body);

        let (result, _) = run_command(&[
            "verify",
            "--secret",
            SECRET,
            "--signature",
            &signature,
            "--environment",
            "production",
            file.to_str().unwrap(),
        ])
        .await;

        match result {
            Err(CliError::VerificationFailed { reason }) => assert_eq!(reason, "timestamp"),
            other => panic!("expected VerificationFailed, got {:?}", other),
        }

        let timestamp = Timestamp::now().unix_seconds().to_string();
        let (result, _) = run_command(&[
            "verify",
            "--secret",
            SECRET,
            "--signature",
            &signature,
            "--environment",
            "production",
            "--timestamp",
            &timestamp,
            file.to_str().unwrap(),
        ])
        .await;
        result.unwrap();
    }

    #[tokio::test]
    async fn test_missing_payload_file_is_io_error() {
        let (result, _) = run_command(&[
            "sign",
            "--secret",
            SECRET,
            "/nonexistent/recovery-keeper/payload.json",
        ])
        .await;

        assert!(matches!(result, Err(CliError::Io(_))));
    }
}

mod dlq_tests {
    use super::*;

    #[tokio::test]
    async fn test_stats_as_json() {
        let dir = TempDir::new().unwrap();
        let queue = seeded_queue(dir.path()).await;
        enqueue(&queue, "platform_api.refund", 3).await;
        enqueue(&queue, "webhook.payment.failed", 3).await;

        let (result, output) = run_command(&[
            "dlq",
            "stats",
            "--store",
            dir.path().to_str().unwrap(),
            "--format",
            "json",
        ])
        .await;

        result.unwrap();
        let stats: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(stats["total"], 2);
        assert_eq!(stats["pending"], 2);
    }

    #[tokio::test]
    async fn test_list_filters_by_type() {
        let dir = TempDir::new().unwrap();
        let queue = seeded_queue(dir.path()).await;
        enqueue(&queue, "platform_api.refund", 3).await;
        let webhook_job = enqueue(&queue, "webhook.payment.failed", 3).await;

        let (result, output) = run_command(&[
            "dlq",
            "list",
            "--store",
            dir.path().to_str().unwrap(),
            "--job-type",
            "webhook.payment.failed",
        ])
        .await;

        result.unwrap();
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with(&webhook_job.to_string()));
        assert!(lines[0].contains("network"));
    }

    #[tokio::test]
    async fn test_list_empty_store() {
        let dir = TempDir::new().unwrap();

        let (result, output) =
            run_command(&["dlq", "list", "--store", dir.path().to_str().unwrap()]).await;

        result.unwrap();
        assert_eq!(output.trim(), "No jobs found");
    }

    #[tokio::test]
    async fn test_requeue_failed_job() {
        let dir = TempDir::new().unwrap();
        let queue = seeded_queue(dir.path()).await;
        let job_id = enqueue(&queue, "platform_api.refund", 0).await;
        // No strategy handles the job, so the sweep fails it.
        queue.process_jobs(10).await.unwrap();
        assert_eq!(
            queue.get_job(&job_id).await.unwrap().unwrap().status,
            DeadLetterStatus::Failed
        );

        let (result, output) = run_command(&[
            "dlq",
            "requeue",
            "--store",
            dir.path().to_str().unwrap(),
            &job_id.to_string(),
        ])
        .await;

        result.unwrap();
        assert!(output.starts_with(&format!("Requeued {}", job_id)));
        let job = queue.get_job(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, DeadLetterStatus::Pending);
        assert_eq!(job.retry_count, 0);
    }

    #[tokio::test]
    async fn test_requeue_pending_job_rejected() {
        let dir = TempDir::new().unwrap();
        let queue = seeded_queue(dir.path()).await;
        let job_id = enqueue(&queue, "platform_api.refund", 3).await;

        let (result, _) = run_command(&[
            "dlq",
            "requeue",
            "--store",
            dir.path().to_str().unwrap(),
            &job_id.to_string(),
        ])
        .await;

        let error = result.unwrap_err();
        assert!(matches!(
            error,
            CliError::DeadLetter(DeadLetterError::InvalidState { .. })
        ));
        assert_eq!(error.exit_code(), 5);
    }

    #[tokio::test]
    async fn test_show_unknown_job() {
        let dir = TempDir::new().unwrap();

        let (result, _) = run_command(&[
            "dlq",
            "show",
            "--store",
            dir.path().to_str().unwrap(),
            &JobId::new().to_string(),
        ])
        .await;

        assert_eq!(result.unwrap_err().exit_code(), 4);
    }

    #[tokio::test]
    async fn test_malformed_job_id_rejected() {
        let dir = TempDir::new().unwrap();

        let (result, _) = run_command(&[
            "dlq",
            "show",
            "--store",
            dir.path().to_str().unwrap(),
            "not-a-ulid",
        ])
        .await;

        assert!(matches!(result, Err(CliError::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn test_missing_store_directory_rejected() {
        let (result, _) = run_command(&[
            "dlq",
            "stats",
            "--store",
            "/nonexistent/recovery-keeper/dlq",
        ])
        .await;

        assert!(matches!(result, Err(CliError::InvalidArgument { .. })));
    }
}

mod format_tests {
    use super::*;

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(-5), "0s");
        assert_eq!(format_age(42), "42s");
        assert_eq!(format_age(125), "2m");
        assert_eq!(format_age(3 * 3600 + 120), "3h 2m");
        assert_eq!(format_age(2 * 86_400 + 5 * 3600), "2d 5h");
    }
}
