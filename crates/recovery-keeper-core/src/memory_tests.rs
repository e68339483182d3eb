use super::*;
use crate::test_support::{RecordingTelemetry, TelemetryEvent};

const GIB: u64 = 1024 * 1024 * 1024;

fn guard(used: u64, mode: MemoryGuardMode) -> MemoryPressureGuard {
    MemoryPressureGuard::new(
        Arc::new(FixedMemoryProbe::new(used, 10 * GIB)),
        MemoryPressureConfig {
            threshold_ratio: 0.8,
            mode,
        },
    )
}


mod probe_tests {
    use super::*;

    #[test]
    fn test_parse_kib_reads_proc_format() {
        let status = "Name:\tservice\nVmPeak:\t  300000 kB\nVmRSS:\t  123456 kB\n";
        assert_eq!(
            ProcMemoryProbe::parse_kib(status, "VmRSS"),
            Some(123456 * 1024)
        );
        assert_eq!(ProcMemoryProbe::parse_kib(status, "VmSwap"), None);
        assert_eq!(ProcMemoryProbe::parse_kib("VmRSS: lots kB", "VmRSS"), None);
    }

    #[test]
    fn test_usage_ratio() {
        assert_eq!(MemorySample { used_bytes: 5, total_bytes: 10 }.usage_ratio(), 0.5);
        assert_eq!(MemorySample { used_bytes: 5, total_bytes: 0 }.usage_ratio(), 0.0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_proc_probe_reports_on_linux() {
        let sample = ProcMemoryProbe.sample().await.expect("linux exposes /proc");
        assert!(sample.used_bytes > 0);
        assert!(sample.total_bytes >= sample.used_bytes);
    }
}

mod guard_tests {
    use super::*;

    #[tokio::test]
    async fn test_below_threshold_passes_quietly() {
        let check = tokio_test::assert_ok!(guard(GIB, MemoryGuardMode::Enforce).check().await);
        assert!(!check.under_pressure);
        assert_eq!(check.sample.unwrap().used_bytes, GIB);
    }

    #[tokio::test]
    async fn test_advisory_mode_records_and_proceeds() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let guard = guard(9 * GIB, MemoryGuardMode::Advisory).with_telemetry(telemetry.clone());

        let check = guard.check().await.unwrap();

        assert!(check.under_pressure);
        assert_eq!(telemetry.events(), vec![TelemetryEvent::MemoryPressure]);
    }

    #[tokio::test]
    async fn test_enforce_mode_rejects_non_retryably() {
        let error = guard(9 * GIB, MemoryGuardMode::Enforce)
            .check()
            .await
            .unwrap_err();

        assert_eq!(
            error,
            OperationError::MemoryPressure {
                used_bytes: 9 * GIB,
                limit_bytes: 8 * GIB,
            }
        );
        assert!(!error.is_retryable());
    }

    #[tokio::test]
    async fn test_missing_sample_never_blocks() {
        let mut probe = MockMemoryProbe::new();
        probe.expect_sample().times(1).returning(|| None);
        let guard = MemoryPressureGuard::new(
            Arc::new(probe),
            MemoryPressureConfig {
                threshold_ratio: 0.01,
                mode: MemoryGuardMode::Enforce,
            },
        );
        let check = tokio_test::assert_ok!(guard.check().await);
        assert!(check.sample.is_none());
        assert!(!check.under_pressure);
    }
}

#[tokio::test]
async fn test_probe_sampled_once_per_check() {
    let mut probe = MockMemoryProbe::new();
    probe.expect_sample().times(2).returning(|| {
        Some(MemorySample {
            used_bytes: 2 * GIB,
            total_bytes: 10 * GIB,
        })
    });
    let guard = MemoryPressureGuard::new(Arc::new(probe), MemoryPressureConfig::default());

    tokio_test::assert_ok!(guard.check().await);
    let check = guard.assess().await;

    assert!(!check.under_pressure);
    assert!(check.rejection.is_none());
}

#[tokio::test]
async fn test_assess_keeps_sample_when_rejecting() {
    let check = guard(9 * GIB, MemoryGuardMode::Enforce).assess().await;
    assert!(check.under_pressure);
    assert_eq!(check.sample.unwrap().total_bytes, 10 * GIB);
    assert!(matches!(
        check.rejection,
        Some(OperationError::MemoryPressure { .. })
    ));
}
