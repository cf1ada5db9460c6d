//! End-to-end tests of the node event loop.

use std::sync::Arc;
use std::time::Duration;

use sluice_app::maintenance;
use sluice_app::node::{self, Node, NodeHandle};
use sluice_app::{AppConfig, AppError, LocalHistory};
use sluice_common::{Hash256, SafetyViolation, CURRENT_LEDGER_PROTOCOL_VERSION};
use sluice_herder::encode_value;
use sluice_ledger::header::genesis_header;
use sluice_ledger::test_support::make_value;
use sluice_ledger::{
    ArchivedHeaders, CloseRequest, LedgerManager, LedgerManagerConfig, LedgerManagerState,
    LedgerStore, MemoryStore, NoopCloseHooks, TxBundle,
};
use sluice_scp::{SlotDriver, TimerId};
use stellar_xdr::curr::{LedgerHeader, Value};
use tokio::sync::{oneshot, watch};

fn config_with_frequency(frequency: u32) -> AppConfig {
    let mut config = AppConfig::default();
    config.ledger.checkpoint_frequency = frequency;
    config
}

fn boundary_header(seq: u32) -> LedgerHeader {
    let mut header = genesis_header(CURRENT_LEDGER_PROTOCOL_VERSION);
    header.ledger_seq = seq;
    header
}

/// Closes `count` empty ledgers on top of `start` and returns what the
/// network externalized.
fn network_history(config: &AppConfig, start: LedgerHeader, count: u32) -> Vec<CloseRequest> {
    let network = LedgerManager::new(
        LedgerManagerConfig::new(config.network_id()),
        Arc::new(MemoryStore::new()),
    );
    network.adopt_catchup_boundary(start).unwrap();
    let mut requests = Vec::new();
    for _ in 0..count {
        let seq = network.last_closed_ledger_seq() + 1;
        let bundle = Arc::new(TxBundle::empty(network.last_closed_ledger_hash().unwrap()).unwrap());
        let value = make_value(bundle.contents_hash(), u64::from(seq) * 5, vec![]);
        let request = CloseRequest::new(seq, bundle, value).unwrap();
        network.close_ledger(&request).unwrap();
        requests.push(request);
    }
    requests
}

fn deliver_tx_set(handle: &NodeHandle, request: &CloseRequest) {
    let bundle = request.tx_bundle();
    handle
        .deliver_tx_set(bundle.contents_hash(), bundle.to_xdr_set().unwrap())
        .unwrap();
}

fn externalize(handle: &NodeHandle, request: &CloseRequest) {
    handle
        .externalize(
            u64::from(request.ledger_seq()),
            encode_value(request.value()).unwrap(),
        )
        .unwrap();
}

fn deliver(handle: &NodeHandle, request: &CloseRequest) {
    deliver_tx_set(handle, request);
    externalize(handle, request);
}

async fn wait_for_lcl(lcl: &mut watch::Receiver<u32>, seq: u32) {
    tokio::time::timeout(Duration::from_secs(5), lcl.wait_for(|s| *s >= seq))
        .await
        .expect("timed out waiting for ledger")
        .expect("node stopped");
}

fn genesis_node(config: &AppConfig, archive: Arc<ArchivedHeaders>) -> Node {
    let manager = node::open_ledger(config, Arc::new(NoopCloseHooks)).unwrap();
    assert_eq!(manager.last_closed_ledger_seq(), 1);
    Node::from_config(config, manager, archive)
}

#[tokio::test]
async fn test_externalized_values_close_ledgers() {
    let config = AppConfig::default();
    let node = genesis_node(&config, Arc::new(ArchivedHeaders::new()));
    let handle = node.handle();
    let mut lcl = handle.last_closed();
    let task = tokio::spawn(node.run());

    let history = network_history(&config, boundary_header(1), 3);
    for request in &history {
        deliver(&handle, request);
    }
    wait_for_lcl(&mut lcl, 4).await;

    // A repeated decision for a closed slot changes nothing.
    deliver(&handle, &history[1]);
    handle.shutdown().unwrap();
    assert_eq!(task.await.unwrap().unwrap(), 4);
}

#[tokio::test]
async fn test_decision_waits_for_its_tx_set() {
    let config = AppConfig::default();
    let node = genesis_node(&config, Arc::new(ArchivedHeaders::new()));
    let driver = Arc::clone(node.driver());
    let handle = node.handle();
    let mut lcl = handle.last_closed();
    let task = tokio::spawn(node.run());

    let history = network_history(&config, boundary_header(1), 1);
    externalize(&handle, &history[0]);

    // Wrong hash: discarded, the decision stays parked.
    let other = TxBundle::empty(Hash256::hash(b"elsewhere")).unwrap();
    handle
        .deliver_tx_set(history[0].tx_bundle().contents_hash(), other.to_xdr_set().unwrap())
        .unwrap();

    deliver_tx_set(&handle, &history[0]);
    wait_for_lcl(&mut lcl, 2).await;
    assert!(driver.pending_externalized_slots().is_empty());

    handle.shutdown().unwrap();
    assert_eq!(task.await.unwrap().unwrap(), 2);
}

#[tokio::test]
async fn test_fork_stops_the_node() {
    let config = AppConfig::default();
    let node = genesis_node(&config, Arc::new(ArchivedHeaders::new()));
    let manager = Arc::clone(node.state_machine().manager());
    let handle = node.handle();
    let task = tokio::spawn(node.run());

    let fork = Arc::new(TxBundle::empty(Hash256::hash(b"fork")).unwrap());
    let value = make_value(fork.contents_hash(), 5, vec![]);
    let request = CloseRequest::new(2, fork, value).unwrap();
    deliver(&handle, &request);
    // Never handled: the loop stops on the violation.
    deliver(&handle, &network_history(&config, boundary_header(1), 1)[0]);

    let err = task.await.unwrap().unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(
        err,
        AppError::Fatal(SafetyViolation::PreviousHashMismatch { ledger_seq: 2, .. })
    ));
    assert_eq!(manager.last_closed_ledger_seq(), 1);
}

#[tokio::test]
async fn test_undecodable_externalize_is_fatal() {
    let config = AppConfig::default();
    let node = genesis_node(&config, Arc::new(ArchivedHeaders::new()));
    let handle = node.handle();
    let task = tokio::spawn(node.run());

    handle
        .externalize(2, Value(vec![1, 2, 3].try_into().unwrap()))
        .unwrap();
    let err = task.await.unwrap().unwrap_err();
    assert!(matches!(
        err,
        AppError::Fatal(SafetyViolation::UndecodableExternalize { slot: 2 })
    ));
}

#[tokio::test]
async fn test_catchup_through_event_loop() {
    let config = config_with_frequency(8);
    let archive = Arc::new(ArchivedHeaders::new());
    let boundary = boundary_header(11);
    archive.publish(boundary.clone());
    let history = network_history(&config, boundary, 8); // 12..=19

    let node = genesis_node(&config, archive);
    let manager = Arc::clone(node.state_machine().manager());
    let handle = node.handle();
    let mut lcl = handle.last_closed();
    let task = tokio::spawn(node.run());

    // 12 is out of sync; 15 is the trigger ledger for frequency 8.
    for request in history.iter().take(6) {
        deliver(&handle, request);
    }
    wait_for_lcl(&mut lcl, 17).await;

    deliver(&handle, &history[6]);
    wait_for_lcl(&mut lcl, 18).await;
    assert_eq!(
        manager.last_closed_ledger_hash(),
        Some(history[7].previous_ledger_hash())
    );

    handle.shutdown().unwrap();
    assert_eq!(task.await.unwrap().unwrap(), 18);
}

#[tokio::test]
async fn test_failed_catchup_keeps_running() {
    let config = config_with_frequency(8);
    let history = network_history(&config, boundary_header(11), 6);
    // Nothing published: every round fails.
    let node = genesis_node(&config, Arc::new(ArchivedHeaders::new()));
    let manager = Arc::clone(node.state_machine().manager());
    let handle = node.handle();
    let task = tokio::spawn(node.run());

    for request in &history {
        deliver(&handle, request);
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.shutdown().unwrap();

    assert_eq!(task.await.unwrap().unwrap(), 1);
    assert_eq!(manager.last_closed_ledger_seq(), 1);
}

#[tokio::test]
async fn test_timers_fire_on_the_loop() {
    let config = AppConfig::default();
    let node = genesis_node(&config, Arc::new(ArchivedHeaders::new()));
    let (fired_tx, fired_rx) = oneshot::channel();
    node.driver().setup_timer(
        2,
        TimerId::Nomination,
        Duration::from_millis(10),
        Box::new(move || {
            let _ = fired_tx.send(());
        }),
    );
    let handle = node.handle();
    let task = tokio::spawn(node.run());

    tokio::time::timeout(Duration::from_secs(5), fired_rx)
        .await
        .expect("timer did not fire")
        .unwrap();
    handle.shutdown().unwrap();
    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_manual_catchup_adopts_boundary() {
    let config = config_with_frequency(8);
    let archive = Arc::new(ArchivedHeaders::new());
    archive.publish(boundary_header(40));
    let node = genesis_node(&config, archive);
    let handle = node.handle();
    let mut lcl = handle.last_closed();
    let task = tokio::spawn(node.run());

    handle
        .send(sluice_app::NodeEvent::ManualCatchup { to_ledger: 40 })
        .unwrap();
    let history = network_history(&config, boundary_header(40), 1);
    // Wait for the boundary before sending the next ledger.
    tokio::time::sleep(Duration::from_millis(50)).await;
    deliver(&handle, &history[0]);
    wait_for_lcl(&mut lcl, 41).await;

    handle.shutdown().unwrap();
    assert_eq!(task.await.unwrap().unwrap(), 41);
}

#[tokio::test]
async fn test_closes_feed_history_maintenance() {
    let config = config_with_frequency(8);
    let history_service = Arc::new(LocalHistory::new(64));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (hooks, maintainer) = maintenance::channel(history_service.clone(), 8, shutdown_rx);
    let manager = node::open_ledger(&config, Arc::new(hooks)).unwrap();
    let store = Arc::clone(manager.store());
    let maintainer = tokio::spawn(maintainer.with_store(Arc::clone(&store), 4).run());

    let node = Node::from_config(&config, manager, Arc::new(ArchivedHeaders::new()));
    let handle = node.handle();
    let mut lcl = handle.last_closed();
    let task = tokio::spawn(node.run());

    let history = network_history(&config, boundary_header(1), 15);
    for request in &history {
        deliver(&handle, request);
    }
    wait_for_lcl(&mut lcl, 16).await;
    handle.shutdown().unwrap();
    task.await.unwrap().unwrap();

    shutdown_tx.send(true).unwrap();
    let stats = maintainer.await.unwrap();
    assert_eq!(stats.checkpoints_queued, 2);
    assert_eq!(history_service.published(), vec![7, 15]);

    // Transaction sets older than ledger 12 were pruned from the database.
    assert_eq!(stats.tx_sets_collected, 10);
    let stored = |i: usize| {
        store
            .load_tx_bundle(&history[i].tx_bundle().contents_hash())
            .unwrap()
            .is_some()
    };
    assert!(!stored(0));
    assert!(!stored(9));
    assert!(stored(10));
    assert!(stored(14));
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.ledger.database_path = Some(dir.path().join("db").join("sluice.db"));

    let node = genesis_node(&config, Arc::new(ArchivedHeaders::new()));
    let handle = node.handle();
    let mut lcl = handle.last_closed();
    let task = tokio::spawn(node.run());
    for request in &network_history(&config, boundary_header(1), 2) {
        deliver(&handle, request);
    }
    wait_for_lcl(&mut lcl, 3).await;
    handle.shutdown().unwrap();
    task.await.unwrap().unwrap();

    let manager = node::open_ledger(&config, Arc::new(NoopCloseHooks)).unwrap();
    assert_eq!(manager.last_closed_ledger_seq(), 3);

    let node = Node::from_config(&config, manager, Arc::new(ArchivedHeaders::new()));
    assert_eq!(node.state_machine().state(), LedgerManagerState::Booting);
}
