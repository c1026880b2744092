//! # Result Reconciler
//!
//! Converts a [`RawResult`] into either the caller's typed response or one
//! [`DispatchError`]. Classification is total and order-sensitive:
//!
//! 1. Transport failures and explicit error results become
//!    [`DispatchError::RemoteExecution`] carrying the remote message verbatim.
//! 2. A success envelope whose embedded status is `FAILURE` also becomes
//!    `RemoteExecution`, even though it arrived as a success.
//! 3. A success envelope of the wrong response type, or one whose payload does
//!    not decode into the expected type, becomes
//!    [`DispatchError::UnexpectedResponseType`].
//! 4. Anything else is the typed value.
//!
//! Synthetic expiry results are turned into [`DispatchError::Timeout`] by the
//! dispatch channel before they reach this module.

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{DispatchError, Result};
use crate::models::{ExecutionStatus, RawResult, TaskResponse};

/// A typed response a caller can ask the channel for
///
/// ```rust
/// use delegate_dispatch::execution::reconciler::{DelegateResponse, ResultReconciler};
/// use delegate_dispatch::models::RawResult;
/// use serde::Deserialize;
/// use serde_json::json;
///
/// #[derive(Debug, Deserialize)]
/// struct GitFetchResponse {
///     commit: String,
/// }
///
/// impl DelegateResponse for GitFetchResponse {
///     const RESPONSE_TYPE: &'static str = "GitFetchResponse";
/// }
///
/// let raw = RawResult::success("GitFetchResponse", json!({"commit": "a1b2c3"}));
/// let response: GitFetchResponse = ResultReconciler::reconcile(raw).unwrap();
/// assert_eq!(response.commit, "a1b2c3");
/// ```
pub trait DelegateResponse: DeserializeOwned {
    /// Discriminator the delegate puts in [`TaskResponse::response_type`]
    const RESPONSE_TYPE: &'static str;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ResultReconciler;

impl ResultReconciler {
    /// Classify `raw` and decode the payload into `T`
    pub fn reconcile<T: DelegateResponse>(raw: RawResult) -> Result<T> {
        let response = Self::reconcile_envelope(raw)?;

        if response.response_type != T::RESPONSE_TYPE {
            warn!(
                expected = T::RESPONSE_TYPE,
                actual = %response.response_type,
                "Delegate returned an unexpected response type"
            );
            return Err(DispatchError::UnexpectedResponseType {
                expected: T::RESPONSE_TYPE.to_string(),
                actual: response.response_type,
            });
        }

        serde_json::from_value::<T>(response.payload).map_err(|e| {
            warn!(
                response_type = T::RESPONSE_TYPE,
                error = %e,
                "Delegate payload did not decode into the expected response"
            );
            DispatchError::UnexpectedResponseType {
                expected: T::RESPONSE_TYPE.to_string(),
                actual: format!("{} with undecodable payload: {e}", response.response_type),
            }
        })
    }

    /// Apply the failure rules and hand back the envelope untouched
    ///
    /// Used by callers that inspect the response type themselves.
    pub fn reconcile_envelope(raw: RawResult) -> Result<TaskResponse> {
        match raw {
            RawResult::TransportFailure(failure) => {
                debug!(kind = %failure.kind, "Reconciled transport failure");
                Err(DispatchError::remote_execution(failure.message))
            }
            RawResult::Error(error) => Err(DispatchError::remote_execution(error.message)),
            RawResult::Success(response) if response.execution_status == ExecutionStatus::Failure => {
                let message = response.error_message.unwrap_or_else(|| {
                    format!("{} reported execution status FAILURE", response.response_type)
                });
                Err(DispatchError::remote_execution(message))
            }
            RawResult::Success(response) => Ok(response),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TransportFailureKind;
    use proptest::prelude::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct GitFetchResponse {
        commit: String,
    }

    impl DelegateResponse for GitFetchResponse {
        const RESPONSE_TYPE: &'static str = "GitFetchResponse";
    }

    #[test]
    fn test_success_decodes_typed_value() {
        let raw = RawResult::success("GitFetchResponse", json!({"commit": "abc"}));
        assert_eq!(
            ResultReconciler::reconcile::<GitFetchResponse>(raw),
            Ok(GitFetchResponse {
                commit: "abc".to_string()
            })
        );
    }

    #[test]
    fn test_error_results_keep_remote_message() {
        let raw = RawResult::error("helm binary not found");
        assert_eq!(
            ResultReconciler::reconcile::<GitFetchResponse>(raw),
            Err(DispatchError::remote_execution("helm binary not found"))
        );

        let raw = RawResult::transport_failure(TransportFailureKind::Unreachable, "socket closed");
        assert_eq!(
            ResultReconciler::reconcile::<GitFetchResponse>(raw),
            Err(DispatchError::remote_execution("socket closed"))
        );
    }

    #[test]
    fn test_embedded_failure_status_wins_over_success_variant() {
        let raw = RawResult::Success(
            TaskResponse::new("GitFetchResponse", json!({"commit": "abc"})).failed("disk full"),
        );
        assert_eq!(
            ResultReconciler::reconcile::<GitFetchResponse>(raw),
            Err(DispatchError::remote_execution("disk full"))
        );

        let raw = RawResult::Success(
            TaskResponse::new("GitFetchResponse", json!({})).with_status(ExecutionStatus::Failure),
        );
        match ResultReconciler::reconcile::<GitFetchResponse>(raw) {
            Err(DispatchError::RemoteExecution { message }) => {
                assert!(message.contains("FAILURE"))
            }
            other => panic!("expected remote execution error, got {other:?}"),
        }
    }

    #[test]
    fn test_wrong_type_or_shape_is_unexpected() {
        let raw = RawResult::success("HelmInstallResponse", json!({"commit": "abc"}));
        assert_eq!(
            ResultReconciler::reconcile::<GitFetchResponse>(raw),
            Err(DispatchError::UnexpectedResponseType {
                expected: "GitFetchResponse".to_string(),
                actual: "HelmInstallResponse".to_string(),
            })
        );

        let raw = RawResult::success("GitFetchResponse", json!({"sha": 7}));
        assert!(matches!(
            ResultReconciler::reconcile::<GitFetchResponse>(raw),
            Err(DispatchError::UnexpectedResponseType { .. })
        ));
    }

    fn arb_raw_result() -> impl Strategy<Value = RawResult> {
        let status = prop_oneof![
            Just(ExecutionStatus::Success),
            Just(ExecutionStatus::Failure),
            Just(ExecutionStatus::Running),
            Just(ExecutionStatus::Skipped),
        ];
        let response_type = prop_oneof![
            Just("GitFetchResponse".to_string()),
            "[A-Za-z]{1,12}".prop_map(String::from),
        ];
        let payload = prop_oneof![
            "[a-z0-9]{0,8}".prop_map(|commit| json!({ "commit": commit })),
            any::<i64>().prop_map(|n| json!(n)),
            Just(serde_json::Value::Null),
        ];

        prop_oneof![
            (response_type, status, payload, proptest::option::of(".{0,16}")).prop_map(
                |(response_type, status, payload, error_message)| {
                    let mut response = TaskResponse::new(response_type, payload).with_status(status);
                    response.error_message = error_message;
                    RawResult::Success(response)
                }
            ),
            ".{0,24}".prop_map(|message| RawResult::error(message)),
            ".{0,24}".prop_map(|message| RawResult::transport_failure(
                TransportFailureKind::WorkerProcessError,
                message
            )),
        ]
    }

    proptest! {
        #[test]
        fn prop_classification_is_total_and_ordered(raw in arb_raw_result()) {
            let outcome = ResultReconciler::reconcile::<GitFetchResponse>(raw.clone());

            match raw {
                RawResult::Error(error) => {
                    prop_assert_eq!(outcome, Err(DispatchError::remote_execution(error.message)));
                }
                RawResult::TransportFailure(failure) => {
                    prop_assert_eq!(outcome, Err(DispatchError::remote_execution(failure.message)));
                }
                RawResult::Success(response) if response.execution_status == ExecutionStatus::Failure => {
                    let is_remote = matches!(outcome, Err(DispatchError::RemoteExecution { .. }));
                    prop_assert!(is_remote);
                }
                RawResult::Success(response) if response.response_type != "GitFetchResponse" => {
                    let is_unexpected = matches!(outcome, Err(DispatchError::UnexpectedResponseType { .. }));
                    prop_assert!(is_unexpected);
                }
                RawResult::Success(_) => {
                    let is_typed_or_unexpected = matches!(
                        outcome,
                        Ok(_) | Err(DispatchError::UnexpectedResponseType { .. })
                    );
                    prop_assert!(is_typed_or_unexpected);
                }
            }
        }
    }
}
