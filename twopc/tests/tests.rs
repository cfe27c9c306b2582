use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sensordb::record::SensorReading;
use sensordb::server::{Replica, ReplicaConfig, RunningReplica};
use twopc::{CommitError, Coordinator, ReplicaClient};

async fn spawn_replica(config: ReplicaConfig) -> RunningReplica {
    let _ = env_logger::builder().is_test(true).try_init();
    let addr = SocketAddr::from(([127, 0, 0, 1], 0));
    Replica::listen(addr, config)
        .await
        .expect("replica should bind a loopback port")
}

async fn connect(replica: &RunningReplica) -> ReplicaClient {
    ReplicaClient::connect(&replica.local_addr().to_string())
        .await
        .expect("client should reach a running replica")
}

fn addrs(a: &RunningReplica, b: &RunningReplica) -> Vec<String> {
    vec![a.local_addr().to_string(), b.local_addr().to_string()]
}

fn reading(sensor_id: &str, value: f64) -> SensorReading {
    SensorReading {
        sensor_id: sensor_id.to_string(),
        timestamp: SystemTime::now(),
        value,
        unit: "°C".to_string(),
    }
}

fn sorted(mut readings: Vec<SensorReading>) -> Vec<SensorReading> {
    readings.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    readings
}

#[tokio::test(flavor = "multi_thread")]
async fn commit_lands_on_both_replicas() {
    let a = spawn_replica(ReplicaConfig::default()).await;
    let b = spawn_replica(ReplicaConfig::default()).await;
    let coordinator = Coordinator::connect(&addrs(&a, &b)).await.unwrap();

    // 2025-01-01T00:00:00.000000000Z
    let record = SensorReading {
        sensor_id: "t1".to_string(),
        timestamp: UNIX_EPOCH + Duration::from_secs(1_735_689_600),
        value: 23.5,
        unit: "°C".to_string(),
    };
    coordinator.commit_record(record.clone()).await.unwrap();

    // Visible through the coordinator's read path...
    let got = coordinator.get_by_sensor("t1").await.unwrap();
    assert_eq!(got, vec![record.clone()]);

    // ...and on each replica individually.
    for replica in [&a, &b].iter() {
        let client = connect(replica).await;
        let got = client.read_by_sensor("t1").await.unwrap();
        assert_eq!(got, vec![record.clone()]);
    }

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn refused_prepare_leaves_no_replica_dirty() {
    let a = spawn_replica(ReplicaConfig::default()).await;
    let b = spawn_replica(ReplicaConfig::default()).await;
    let coordinator = Coordinator::connect(&addrs(&a, &b)).await.unwrap();

    // Tear the second replica down; its prepare fails as a transport error,
    // which counts as a NO vote.
    b.shutdown().await;

    let err = coordinator
        .commit_record(reading("x", 99.9))
        .await
        .unwrap_err();
    assert!(matches!(err, CommitError::Aborted { .. }));

    // The healthy replica prepared and was then aborted; nothing is visible.
    let client = connect(&a).await;
    assert!(client.read_by_sensor("x").await.unwrap().is_empty());

    a.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn pool_construction_is_all_or_nothing() {
    let a = spawn_replica(ReplicaConfig::default()).await;

    // Second address unreachable: construction fails as a whole.
    let unreachable = vec![a.local_addr().to_string(), "127.0.0.1:1".to_string()];
    assert!(Coordinator::connect(&unreachable).await.is_err());

    // Fewer than two replicas is refused outright.
    assert!(Coordinator::connect(&[a.local_addr().to_string()])
        .await
        .is_err());

    a.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn duplicate_transaction_id_is_refused() {
    let a = spawn_replica(ReplicaConfig::default()).await;
    let client = connect(&a).await;

    let txid = "txn_deadbeefdeadbeefdeadbeefdeadbeef";
    let first = client.prepare(txid, reading("dup", 1.0)).await.unwrap();
    assert!(first.success);
    assert_eq!(first.transaction_id, txid);

    let second = client.prepare(txid, reading("dup", 2.0)).await.unwrap();
    assert!(!second.success);
    assert!(second.message.contains("already prepared"));

    // Prepare never touches the log, so neither reading is visible.
    assert!(client.read_all().await.unwrap().is_empty());

    a.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn expired_transaction_cannot_commit() {
    let config = ReplicaConfig {
        txn_timeout: Duration::from_millis(100),
        sweep_period: Duration::from_millis(20),
        ..ReplicaConfig::default()
    };
    let a = spawn_replica(config).await;
    let client = connect(&a).await;

    let resp = client
        .prepare("txn_expires", reading("exp", 7.0))
        .await
        .unwrap();
    assert!(resp.success);

    // Wait out the expiry plus a sweep period.
    tokio::time::sleep(Duration::from_millis(300)).await;

    let err = client.commit("txn_expires").await.unwrap_err();
    assert!(err.to_string().contains("not prepared"));
    assert!(client.read_all().await.unwrap().is_empty());

    a.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_commits_replicate_identically() {
    let a = spawn_replica(ReplicaConfig::default()).await;
    let b = spawn_replica(ReplicaConfig::default()).await;
    let coordinator = Arc::new(Coordinator::connect(&addrs(&a, &b)).await.unwrap());

    let mut rounds = Vec::new();
    for i in 0..10 {
        let coordinator = coordinator.clone();
        rounds.push(tokio::spawn(async move {
            coordinator
                .commit_record(reading(&format!("c-{}", i), f64::from(i)))
                .await
        }));
    }
    for round in rounds {
        round
            .await
            .expect("commit rounds should not panic")
            .expect("concurrent commits should all succeed");
    }

    let log_a = sorted(connect(&a).await.read_all().await.unwrap());
    let log_b = sorted(connect(&b).await.read_all().await.unwrap());
    assert_eq!(log_a.len(), 10);
    assert_eq!(log_a, log_b);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn replicas_agree_after_sequential_batch() {
    let a = spawn_replica(ReplicaConfig::default()).await;
    let b = spawn_replica(ReplicaConfig::default()).await;
    let coordinator = Coordinator::connect(&addrs(&a, &b)).await.unwrap();

    for (i, sensor_id) in ["k-1", "k-2", "k-3"].iter().enumerate() {
        coordinator
            .commit_record(reading(sensor_id, (i + 1) as f64 * 1.5))
            .await
            .unwrap();
    }

    let all = coordinator.get_all().await.unwrap();
    assert_eq!(
        all.iter().filter(|r| r.sensor_id.starts_with("k-")).count(),
        3
    );

    let filter = |readings: Vec<SensorReading>| {
        sorted(
            readings
                .into_iter()
                .filter(|r| r.sensor_id.starts_with("k-"))
                .collect(),
        )
    };
    let log_a = filter(connect(&a).await.read_all().await.unwrap());
    let log_b = filter(connect(&b).await.read_all().await.unwrap());
    assert_eq!(log_a.len(), 3);
    assert_eq!(log_a, log_b);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn maintenance_update_and_delete_touch_one_replica_only() {
    let a = spawn_replica(ReplicaConfig::default()).await;
    let b = spawn_replica(ReplicaConfig::default()).await;
    let coordinator = Coordinator::connect(&addrs(&a, &b)).await.unwrap();

    let record = reading("m-1", 5.0);
    coordinator.commit_record(record.clone()).await.unwrap();

    let client_a = connect(&a).await;
    let client_b = connect(&b).await;

    // Delete on one replica diverges it from the other; that is the
    // documented contract of the maintenance operations.
    let removed = client_a.delete_by_sensor("m-1").await.unwrap();
    assert!(removed.success);
    assert!(client_a.read_by_sensor("m-1").await.unwrap().is_empty());
    assert_eq!(client_b.read_by_sensor("m-1").await.unwrap().len(), 1);

    // Update matches on (sensor_id, timestamp) and rewrites in place.
    let mut patched = record.clone();
    patched.value = 9.9;
    patched.unit = "K".to_string();
    assert!(client_b.update(patched.clone()).await.unwrap().success);
    assert_eq!(
        client_b.read_by_sensor("m-1").await.unwrap(),
        vec![patched.clone()]
    );
    // The deleting replica has no matching entry left.
    assert!(!client_a.update(patched).await.unwrap().success);

    a.shutdown().await;
    b.shutdown().await;
}
