use serde::Serialize;

use farmhand_core::ServiceName;

use crate::protocol::DaemonControl;

/// Reason recorded when the daemon gave no usable reply to a start request.
pub const NO_RESPONSE: &str = "no response";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ServiceStartOutcome {
    Started,
    AlreadyRunning,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceStartResult {
    pub service: ServiceName,
    pub outcome: ServiceStartOutcome,
}

impl ServiceStartResult {
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, ServiceStartOutcome::Failed(_))
    }
}

/// Start `services` one at a time, in order.
///
/// A service that is already running is never sent a start request, and a
/// failed start does not stop the remaining services from being tried.
pub async fn start_all<C: DaemonControl>(
    control: &mut C,
    services: &[ServiceName],
) -> Vec<ServiceStartResult> {
    let mut results = Vec::with_capacity(services.len());
    for service in services {
        let outcome = start_one(control, service).await;
        match &outcome {
            ServiceStartOutcome::Started => tracing::info!(%service, "service started"),
            ServiceStartOutcome::AlreadyRunning => {
                tracing::info!(%service, "service already running")
            }
            ServiceStartOutcome::Failed(reason) => {
                tracing::error!(%service, %reason, "service failed to start")
            }
        }
        results.push(ServiceStartResult {
            service: service.clone(),
            outcome,
        });
    }
    results
}

async fn start_one<C: DaemonControl>(control: &mut C, service: &ServiceName) -> ServiceStartOutcome {
    match control.is_running(service).await {
        Ok(true) => return ServiceStartOutcome::AlreadyRunning,
        Ok(false) => {}
        // The start request below reports the failure if the daemon is really gone.
        Err(err) => tracing::debug!(%service, error = %err, "is_running query failed"),
    }
    match control.start_service(service).await {
        Ok(Some(reply)) if reply.success => ServiceStartOutcome::Started,
        Ok(Some(reply)) => {
            ServiceStartOutcome::Failed(reply.error.unwrap_or_else(|| NO_RESPONSE.to_string()))
        }
        Ok(None) => ServiceStartOutcome::Failed(NO_RESPONSE.to_string()),
        Err(err) => {
            tracing::debug!(%service, error = %err, "start_service transport failure");
            ServiceStartOutcome::Failed(NO_RESPONSE.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDaemon;

    fn names(names: &[&str]) -> Vec<ServiceName> {
        names.iter().map(|n| ServiceName::from(*n)).collect()
    }

    fn outcomes(results: &[ServiceStartResult]) -> Vec<ServiceStartOutcome> {
        results.iter().map(|r| r.outcome.clone()).collect()
    }

    #[tokio::test]
    async fn running_service_is_never_started_twice() {
        let daemon = FakeDaemon::new().with_running(&["a"]);
        let results = start_all(&mut daemon.control(), &names(&["a", "a", "b"])).await;
        assert_eq!(
            outcomes(&results),
            [
                ServiceStartOutcome::AlreadyRunning,
                ServiceStartOutcome::AlreadyRunning,
                ServiceStartOutcome::Started,
            ]
        );
        assert_eq!(daemon.count_calls("start_service"), 1);
        assert_eq!(daemon.count_calls("start_service b"), 1);
    }

    #[tokio::test]
    async fn failures_do_not_abort_the_group() {
        let daemon = FakeDaemon::new();
        {
            let mut state = daemon.state();
            state
                .start_failures
                .insert("chia_farmer".into(), Some("keys missing".into()));
            state.start_failures.insert("chia_wallet".into(), None);
        }
        let results = start_all(
            &mut daemon.control(),
            &names(&["chia_farmer", "chia_wallet", "chia_harvester"]),
        )
        .await;
        assert_eq!(
            outcomes(&results),
            [
                ServiceStartOutcome::Failed("keys missing".into()),
                ServiceStartOutcome::Failed(NO_RESPONSE.into()),
                ServiceStartOutcome::Started,
            ]
        );
        assert!(results[0].is_failure());
        assert!(!results[2].is_failure());
    }

    #[tokio::test]
    async fn requests_follow_input_order() {
        let daemon = FakeDaemon::new();
        start_all(&mut daemon.control(), &names(&["b", "a"])).await;
        assert_eq!(
            daemon.calls(),
            ["is_running b", "start_service b", "is_running a", "start_service a"]
        );
    }

    #[test]
    fn outcome_serializes_with_reason() {
        let json = serde_json::to_value(ServiceStartOutcome::Failed("boom".into())).unwrap();
        assert_eq!(json, serde_json::json!({"status": "failed", "reason": "boom"}));
        let json = serde_json::to_value(ServiceStartOutcome::Started).unwrap();
        assert_eq!(json, serde_json::json!({"status": "started"}));
    }
}
