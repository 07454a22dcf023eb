//! End-to-end chain scenarios: a real control plane, real process
//! endpoints on loopback, and a node supervisor driving them the way the
//! operator shell would.

use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};

use chainstore_client::ProcessClient;
use chainstore_control::ControlService;
use chainstore_node::NodeSupervisor;
use chainstore_server::{Server, ServerConfig};
use chainstore_types::{Address, Tag};

struct Cluster {
    control_server: Server,
    supervisor: NodeSupervisor,
}

/// Picks a base port with a free range above it for derived process
/// endpoints.
fn free_base_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn start_cluster(process_count: usize) -> Cluster {
    let control_service = ControlService::new();
    let control_server = control_service
        .serve(
            ServerConfig::new("127.0.0.1:0")
                .with_name("ctl")
                .with_workers(10),
        )
        .unwrap();
    let control_address = control_server.local_address().clone();

    let base = free_base_port();
    let mut supervisor = NodeSupervisor::new(
        "Node1",
        Address::new(format!("127.0.0.1:{base}")),
        control_address,
    );
    supervisor.local_store_ps(process_count).unwrap();

    Cluster {
        control_server,
        supervisor,
    }
}

#[test]
fn minimal_chain() {
    let cluster = start_cluster(2);

    let chain = cluster.supervisor.create_chain().unwrap();
    assert_eq!(chain.len(), 2);

    let names: Vec<&str> = chain.iter().map(|e| e.name.as_str()).collect();
    assert!(names.contains(&"Node1-ps0"));
    assert!(names.contains(&"Node1-ps1"));

    let listing = cluster.supervisor.list_chain().unwrap();
    assert_eq!(
        listing,
        format!("{} (Head) -> {} (Tail)", names[0], names[1])
    );

    cluster.control_server.stop();
}

#[test]
fn write_then_read_same_key() {
    let cluster = start_cluster(3);
    let chain = cluster.supervisor.create_chain().unwrap();

    cluster.supervisor.write("x", 3.0, 0).unwrap();

    // Any process answers, clean, with the committed value.
    for process in cluster.supervisor.processes() {
        assert_eq!(process.client().read("x").unwrap(), (3.0, true));
    }

    // The head reports the key clean once the write has returned.
    let head_name = chain[0].name.as_str();
    let status = cluster.supervisor.data_status(head_name).unwrap();
    assert_eq!(status["x"], Tag::Clean);

    cluster.control_server.stop();
}

#[test]
fn reads_during_slow_write_never_see_uncommitted_state() {
    let cluster = start_cluster(3);
    cluster.supervisor.create_chain().unwrap();

    let head = chainstore_client::ControlClient::new(
        cluster.control_server.local_address().clone(),
    )
    .get_head()
    .unwrap();
    let head_client = ProcessClient::new(head.address);

    // One second of delay per hop holds the key dirty at the head while
    // the tail has already committed.
    let writer = {
        let client = head_client.clone();
        thread::spawn(move || client.write("y", 7.0, 1))
    };

    // Poll the head throughout the write. While the key is dirty the head
    // relays the tail's answer, so every found read must carry the
    // committed value, never a partial one.
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut saw_value = false;
    while Instant::now() < deadline {
        let (value, found) = head_client.read("y").unwrap();
        if found {
            assert_eq!(value, 7.0);
            saw_value = true;
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }

    writer.join().unwrap().unwrap();
    assert!(saw_value, "the committed value never became visible");
    assert_eq!(head_client.read("y").unwrap(), (7.0, true));

    cluster.control_server.stop();
}

#[test]
fn detach_write_restore_within_bound() {
    let cluster = start_cluster(3);
    let original_chain = cluster.supervisor.create_chain().unwrap();
    let control =
        chainstore_client::ControlClient::new(cluster.control_server.local_address().clone());

    let original_head = original_chain[0].clone();
    cluster.supervisor.remove_head().unwrap();
    assert_eq!(control.get_head().unwrap(), original_chain[1]);

    // Three writes the detached head never sees.
    cluster.supervisor.write("a", 1.0, 0).unwrap();
    cluster.supervisor.write("b", 2.0, 0).unwrap();
    cluster.supervisor.write("c", 3.0, 0).unwrap();

    cluster.supervisor.restore_head().unwrap();

    // The chain is whole again, original head in front.
    assert_eq!(control.get_head().unwrap(), original_head);
    let listing = cluster.supervisor.list_chain().unwrap();
    assert!(listing.starts_with(&format!("{} (Head)", original_head.name)));

    // Reconciliation replayed every missed write, clean.
    let status = cluster
        .supervisor
        .data_status(original_head.name.as_str())
        .unwrap();
    for key in ["a", "b", "c"] {
        assert_eq!(status[key], Tag::Clean, "{key} missing or dirty");
    }
    let head_client = ProcessClient::new(original_head.address);
    for (key, value) in [("a", 1.0), ("b", 2.0), ("c", 3.0)] {
        assert_eq!(head_client.read(key).unwrap(), (value, true));
    }

    // And the restored head accepts writes again.
    cluster.supervisor.write("d", 4.0, 0).unwrap();
    assert_eq!(head_client.read("d").unwrap(), (4.0, true));

    cluster.control_server.stop();
}

#[test]
fn detach_with_writes_beyond_bound_drops_the_head() {
    let cluster = start_cluster(3);
    let original_chain = cluster.supervisor.create_chain().unwrap();
    let control =
        chainstore_client::ControlClient::new(cluster.control_server.local_address().clone());

    let original_head = original_chain[0].clone();
    cluster.supervisor.remove_head().unwrap();

    // Six writes: one more than the write log can replay.
    for i in 0..6 {
        cluster
            .supervisor
            .write(&format!("k{i}"), f64::from(i), 0)
            .unwrap();
    }

    // Restoration is refused softly; the operator sees no error.
    cluster.supervisor.restore_head().unwrap();

    // The dropped head never reappears: the chain still fronts the
    // promoted process, and a second restore finds nothing detached.
    assert_eq!(control.get_head().unwrap(), original_chain[1]);
    let listing = cluster.supervisor.list_chain().unwrap();
    assert_eq!(
        listing,
        format!(
            "{} (Head) -> {} (Tail)",
            original_chain[1].name, original_chain[2].name
        )
    );
    assert!(cluster.supervisor.restore_head().is_err());

    // The dropped process's endpoint was cleared and is gone.
    let dropped = ProcessClient::new(original_head.address)
        .with_timeout(Duration::from_millis(300));
    assert!(dropped.data_status().is_err());

    cluster.control_server.stop();
}

#[test]
fn clear_is_idempotent_and_allows_a_fresh_start() {
    let mut cluster = start_cluster(2);
    cluster.supervisor.create_chain().unwrap();
    cluster.supervisor.write("x", 1.0, 0).unwrap();

    cluster.supervisor.clear().unwrap();
    cluster.supervisor.clear().unwrap();

    // A fresh roster on the same ports.
    cluster.supervisor.local_store_ps(2).unwrap();
    let chain = cluster.supervisor.create_chain().unwrap();
    assert_eq!(chain.len(), 2);

    // The old data is gone.
    assert_eq!(cluster.supervisor.read("x").unwrap().1, false);

    cluster.control_server.stop();
}

#[test]
fn counters_agree_when_quiescent() {
    let cluster = start_cluster(3);
    cluster.supervisor.create_chain().unwrap();

    for i in 0..4 {
        cluster
            .supervisor
            .write(&format!("k{i}"), f64::from(i), 0)
            .unwrap();
    }

    // Every process committed exactly the writes that returned success.
    for process in cluster.supervisor.processes() {
        assert_eq!(
            process.client().get_deviation(process.name.clone()).unwrap(),
            4,
            "{} disagrees",
            process.name
        );
    }

    cluster.control_server.stop();
}
