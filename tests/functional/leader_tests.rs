//! Leader election through the real run loop and a shared Lease.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use gitopscluster_operator::manager::{
    LEADER_ELECTION_ID, LEADER_ELECTION_NAMESPACE, LeaderElectionError, ManagerError,
};
use gitopscluster_operator::{Environment, Settings, Startup, StartupError};

use crate::startup_tests::{LEASES, lease_holder, test_settings};
use crate::{FakeApiServer, wait_for};

const IDENTITY: &str = "gitopscluster-operator-1";

/// A lease long expired by any clock.
const LONG_AGO: &str = "2000-01-01T00:00:00Z";

fn now() -> String {
    jiff::Timestamp::now()
        .round(jiff::Unit::Second)
        .unwrap()
        .to_string()
}

fn lease(holder: &str, renew_time: &str, duration_secs: u64) -> Value {
    json!({
        "apiVersion": "coordination.k8s.io/v1",
        "kind": "Lease",
        "metadata": {
            "name": LEADER_ELECTION_ID,
            "namespace": LEADER_ELECTION_NAMESPACE,
        },
        "spec": {
            "holderIdentity": holder,
            "leaseDurationSeconds": duration_secs,
            "acquireTime": renew_time,
            "renewTime": renew_time,
            "leaseTransitions": 0,
        },
    })
}

fn put_lease(server: &FakeApiServer, lease: Value) {
    server.insert(LEASES, Some(LEADER_ELECTION_NAMESPACE), lease);
}

fn spawn_replica(
    server: &FakeApiServer,
    settings: Settings,
    signal: &CancellationToken,
) -> JoinHandle<Result<(), StartupError>> {
    tokio::spawn(
        Startup::new(server.kube_config(), Environment::InCluster, settings)
            .with_identity(IDENTITY)
            .with_shutdown_signal(signal.clone().cancelled_owned())
            .run(),
    )
}

async fn finish(run: JoinHandle<Result<(), StartupError>>) -> Result<(), StartupError> {
    tokio::time::timeout(Duration::from_secs(15), run)
        .await
        .expect("run loop did not stop in time")
        .unwrap()
}

#[tokio::test]
async fn test_waits_while_another_instance_leads() {
    let server = FakeApiServer::start().await;
    put_lease(&server, lease("other", &now(), 3600));
    let signal = CancellationToken::new();
    let run = spawn_replica(&server, test_settings(), &signal);

    wait_for("lease lookup", || server.saw_request(LEADER_ELECTION_ID)).await;
    // Longer than one retry period: at least a second attempt has been refused.
    tokio::time::sleep(test_settings().retry_period + Duration::from_secs(1)).await;
    assert_eq!(lease_holder(&server).as_deref(), Some("other"));
    assert!(!server.saw_request("/gitopsclusters"));
    assert!(!run.is_finished());

    // The other holder stops renewing.
    put_lease(&server, lease("other", LONG_AGO, 15));
    wait_for("leadership", || lease_holder(&server).as_deref() == Some(IDENTITY)).await;
    wait_for("controller watch", || server.saw_request("/gitopsclusters")).await;

    signal.cancel();
    finish(run).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_while_waiting_is_clean() {
    let server = FakeApiServer::start().await;
    put_lease(&server, lease("other", &now(), 3600));
    let signal = CancellationToken::new();
    let run = spawn_replica(&server, test_settings(), &signal);

    wait_for("lease lookup", || server.saw_request(LEADER_ELECTION_ID)).await;
    signal.cancel();
    finish(run).await.unwrap();

    assert!(!server.saw_request("/gitopsclusters"));
    // Never led, so the other holder's lease is untouched.
    assert_eq!(lease_holder(&server).as_deref(), Some("other"));
}

#[tokio::test]
async fn test_lease_released_on_clean_shutdown() {
    let server = FakeApiServer::start().await;
    let signal = CancellationToken::new();
    let run = spawn_replica(&server, test_settings(), &signal);

    wait_for("leadership", || lease_holder(&server).as_deref() == Some(IDENTITY)).await;
    signal.cancel();
    finish(run).await.unwrap();

    let lease = server
        .object(LEASES, Some(LEADER_ELECTION_NAMESPACE), LEADER_ELECTION_ID)
        .unwrap();
    assert_ne!(lease["spec"]["holderIdentity"], json!(IDENTITY));
    assert_eq!(lease["spec"]["leaseDurationSeconds"], json!(1));
}

#[tokio::test]
async fn test_taken_lease_is_abnormal_exit() {
    let server = FakeApiServer::start().await;
    let signal = CancellationToken::new();
    let run = spawn_replica(&server, test_settings(), &signal);

    wait_for("leadership", || lease_holder(&server).as_deref() == Some(IDENTITY)).await;
    wait_for("controller watch", || server.saw_request("/gitopsclusters")).await;

    put_lease(&server, lease("other", &now(), 3600));
    let err = finish(run).await.unwrap_err();

    assert!(
        matches!(
            err,
            StartupError::RunLoop(ManagerError::LeaderElection(LeaderElectionError::Taken { .. }))
        ),
        "unexpected error: {err:?}"
    );
    assert_eq!(err.exit_code(), 1);
    // A replica that lost the lease does not release it.
    assert_eq!(lease_holder(&server).as_deref(), Some("other"));
}

#[tokio::test]
async fn test_renew_deadline_exceeded_is_abnormal_exit() {
    let server = FakeApiServer::start().await;
    let settings = Settings {
        lease_duration: Duration::from_secs(6),
        renew_deadline: Duration::from_secs(4),
        retry_period: Duration::from_secs(1),
        ..test_settings()
    };
    let signal = CancellationToken::new();
    let run = spawn_replica(&server, settings, &signal);

    wait_for("leadership", || lease_holder(&server).as_deref() == Some(IDENTITY)).await;
    server.fail_requests("/leases");
    let err = finish(run).await.unwrap_err();
    server.recover();

    assert!(
        matches!(
            err,
            StartupError::RunLoop(ManagerError::LeaderElection(
                LeaderElectionError::RenewDeadlineExceeded { deadline, .. }
            )) if deadline == Duration::from_secs(4)
        ),
        "unexpected error: {err:?}"
    );
    assert_eq!(err.exit_code(), 1);
}
