//! Tests for the operation error taxonomy.

use super::*;

mod classification_tests {
    use super::*;

    #[test]
    fn test_network_messages_are_retryable() {
        let error = OperationError::from_message("Network timeout");
        assert!(error.is_retryable());
        assert_eq!(error.category(), FailureCategory::Network);

        let error = OperationError::from_message("read ECONNRESET");
        assert!(error.is_retryable());
    }

    #[test]
    fn test_server_error_messages_are_retryable() {
        for message in ["HTTP 503 Service Unavailable", "502 Bad Gateway", "request timed out"] {
            assert!(
                OperationError::from_message(message).is_retryable(),
                "expected '{}' to be retryable",
                message
            );
        }
    }

    #[test]
    fn test_validation_messages_are_not_retryable() {
        for message in ["Validation failed: email", "404 Not Found", "Unauthorized"] {
            let error = OperationError::from_message(message);
            assert!(!error.is_retryable(), "expected '{}' to fail fast", message);
        }
    }

    #[test]
    fn test_validation_markers_win_over_retryable_markers() {
        let error = OperationError::from_message("Validation failed before network call");
        assert!(!error.is_retryable());
        assert_eq!(error.category(), FailureCategory::Validation);
    }

    #[test]
    fn test_status_codes_match_whole_tokens_only() {
        let error = OperationError::from_message("Request timed out after 4000ms");
        assert!(error.is_retryable());
        assert_eq!(error.category(), FailureCategory::Timeout);

        let error = OperationError::from_message("retry budget of 5030 exhausted");
        assert_eq!(error.category(), FailureCategory::Unknown);

        let error = OperationError::from_message("upstream returned 401");
        assert!(!error.is_retryable());
        assert_eq!(error.category(), FailureCategory::ClientError);

        let error = OperationError::from_message("status=429");
        assert!(error.is_retryable());
        assert_eq!(error.category(), FailureCategory::RateLimited);
    }

    #[test]
    fn test_transport_failure_wins_over_invalid() {
        let error = OperationError::from_message("connection reset: invalid frame");
        assert!(error.is_retryable());
        assert_eq!(error.category(), FailureCategory::Network);

        let error = OperationError::from_message("invalid membership id");
        assert!(!error.is_retryable());
        assert_eq!(error.category(), FailureCategory::Validation);

        let error = OperationError::from_message("token invalidated upstream");
        assert_eq!(error.category(), FailureCategory::Unknown);
    }

    #[test]
    fn test_unrecognised_messages_are_unknown_and_not_retryable() {
        let error = OperationError::from_message("something odd happened");
        assert!(!error.is_retryable());
        assert_eq!(error.category(), FailureCategory::Unknown);
        assert!(error.counts_toward_circuit());
    }

    #[test]
    fn test_status_classification() {
        assert!(OperationError::from_status(500, "boom").is_retryable());
        assert!(OperationError::from_status(503, "down").is_retryable());
        assert!(OperationError::from_status(429, "slow down").is_retryable());
        assert!(OperationError::from_status(408, "timeout").is_retryable());

        let bad_request = OperationError::from_status(400, "bad");
        assert!(!bad_request.is_retryable());
        assert_eq!(bad_request.category(), FailureCategory::Validation);

        let not_found = OperationError::from_status(404, "missing");
        assert!(!not_found.is_retryable());
        assert_eq!(not_found.category(), FailureCategory::ClientError);
    }
}

mod circuit_accounting_tests {
    use super::*;

    #[test]
    fn test_retryable_and_timeout_count_toward_circuit() {
        assert!(OperationError::retryable(FailureCategory::Network, "x").counts_toward_circuit());
        assert!(OperationError::Timeout { timeout_ms: 10 }.counts_toward_circuit());
    }

    #[test]
    fn test_business_failures_carry_no_circuit_penalty() {
        assert!(!OperationError::non_retryable(FailureCategory::Business, "declined")
            .counts_toward_circuit());
        assert!(!OperationError::validation("bad").counts_toward_circuit());
    }

    #[test]
    fn test_circuit_open_is_distinguishable() {
        let error = OperationError::CircuitOpen {
            service: "whop_api".to_string(),
        };

        assert!(error.is_circuit_open());
        assert!(!error.is_retryable());
        assert!(!error.counts_toward_circuit());
        assert!(error.to_string().contains("OPEN"));
        assert!(!OperationError::from_message("Network timeout").is_circuit_open());
    }

    #[test]
    fn test_timeout_is_retryable_with_timeout_category() {
        let error = OperationError::Timeout { timeout_ms: 250 };
        assert!(error.is_retryable());
        assert_eq!(error.category(), FailureCategory::Timeout);
        assert_eq!(error.to_string(), "Operation timed out after 250ms");
    }
}
