//! End-to-end runs of the node runtime on paused tokio time.

use lowmesh_core::ShortAddr;
use lowmesh_node::{run_scenario, NodeConfig, NodeEvent, ScenarioReport};
use lowmesh_nwk::NwkEvent;

const CHAIN: &str = r#"
[nwk]
rng_seed = 11

[[nodes]]
name = "zc"
role = "coordinator"
ext_addr = "00124b0000000001"
pan_id = 0x1a62
channel = 15

[[nodes]]
name = "r1"
role = "router"
ext_addr = "00124b0000000002"
channels = [15]
start_at_ms = 100

[[nodes]]
name = "r2"
role = "router"
ext_addr = "00124b0000000003"
channels = [15]
start_at_ms = 2000

[[nodes]]
name = "ed"
role = "end_device"
ext_addr = "00124b0000000004"
channels = [15]
start_at_ms = 4000

[[links]]
a = "zc"
b = "r1"

[[links]]
a = "r1"
b = "r2"

[[links]]
a = "r2"
b = "ed"
"#;

fn entered(report: &ScenarioReport, node: &str) -> Vec<NwkEvent> {
    report
        .events_of(node)
        .map(|e| e.event.clone())
        .filter(|e| matches!(e, NwkEvent::NetworkEntered { .. }))
        .collect()
}

fn data_at<'a>(report: &'a ScenarioReport, node: &'a str) -> impl Iterator<Item = (ShortAddr, &'a [u8])> + 'a {
    report.events_of(node).filter_map(|e: &NodeEvent| match &e.event {
        NwkEvent::DataIndication { source, payload } => Some((*source, payload.as_slice())),
        _ => None,
    })
}

#[tokio::test(start_paused = true)]
async fn chain_joins_through_routers() {
    lowmesh_node::logging::init_for_tests();
    let mut config = NodeConfig::parse(CHAIN).unwrap();
    config.scenario.duration_ms = 15_000;
    let report = run_scenario(&config).await.unwrap();

    for name in ["zc", "r1", "r2", "ed"] {
        assert!(report.status_of(name).unwrap().joined, "{name} not joined");
    }
    let r1 = report.status_of("r1").unwrap().short;
    let r2 = report.status_of("r2").unwrap().short;

    assert!(matches!(
        entered(&report, "r1").as_slice(),
        [NwkEvent::NetworkEntered { parent: ShortAddr::COORDINATOR, rejoined: false, .. }]
    ));
    assert!(matches!(
        entered(&report, "r2").as_slice(),
        [NwkEvent::NetworkEntered { parent, .. }] if *parent == r1
    ));
    assert!(matches!(
        entered(&report, "ed").as_slice(),
        [NwkEvent::NetworkEntered { parent, .. }] if *parent == r2
    ));
    assert!(
        report
            .events_of("zc")
            .any(|e| matches!(e.event, NwkEvent::ChildJoined { short, .. } if short == r1))
    );

    let shorts = [ShortAddr::COORDINATOR, r1, r2, report.status_of("ed").unwrap().short];
    for (i, a) in shorts.iter().enumerate() {
        assert!(shorts[i + 1..].iter().all(|b| b != a), "duplicate address {a}");
    }
}

#[tokio::test(start_paused = true)]
async fn unreachable_router_gives_up() {
    lowmesh_node::logging::init_for_tests();
    let config = NodeConfig::parse(
        r#"
[[nodes]]
name = "zc"
role = "coordinator"
ext_addr = "01"

[[nodes]]
name = "lonely"
role = "router"
ext_addr = "02"
channels = [15]
join_attempts = 2

[scenario]
duration_ms = 5000
"#,
    )
    .unwrap();
    let report = run_scenario(&config).await.unwrap();

    assert!(!report.status_of("lonely").unwrap().joined);
    let failures: Vec<_> = report
        .events_of("lonely")
        .filter(|e| matches!(e.event, NwkEvent::JoinFailed { rejoin: false }))
        .collect();
    assert_eq!(failures.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn route_discovery_and_data_over_two_hops() {
    lowmesh_node::logging::init_for_tests();
    let mut config = NodeConfig::parse(CHAIN).unwrap();
    config.scenario.duration_ms = 20_000;
    config.scenario.routes.push(lowmesh_node::config::RouteStep {
        at_ms: 10_000,
        from: "r2".into(),
        to: "zc".into(),
    });
    config.scenario.data.push(lowmesh_node::config::DataStep {
        at_ms: 15_000,
        from: "r2".into(),
        to: "zc".into(),
        payload: "hello".into(),
    });
    let report = run_scenario(&config).await.unwrap();
    let r1 = report.status_of("r1").unwrap().short;
    let r2 = report.status_of("r2").unwrap().short;

    assert!(report.events_of("r2").any(|e| matches!(
        e.event,
        NwkEvent::RouteDiscovered { destination: ShortAddr::COORDINATOR, next_hop, cost: 2 } if next_hop == r1
    )));
    let received: Vec<_> = data_at(&report, "zc").collect();
    assert_eq!(received, vec![(r2, &b"hello"[..])]);
}

#[tokio::test(start_paused = true)]
async fn concentrator_learns_source_route_back() {
    lowmesh_node::logging::init_for_tests();
    let mut config = NodeConfig::parse(CHAIN).unwrap();
    config.nodes[0].concentrator = Some("with_route_cache".into());
    config.nodes[0].concentrator_interval_ms = 10_000;
    config.scenario.duration_ms = 25_000;
    config.scenario.data.push(lowmesh_node::config::DataStep {
        at_ms: 15_000,
        from: "r2".into(),
        to: "zc".into(),
        payload: "up".into(),
    });
    config.scenario.data.push(lowmesh_node::config::DataStep {
        at_ms: 20_000,
        from: "zc".into(),
        to: "r2".into(),
        payload: "down".into(),
    });
    let report = run_scenario(&config).await.unwrap();
    let r1 = report.status_of("r1").unwrap().short;
    let r2 = report.status_of("r2").unwrap().short;

    assert!(report.events_of("zc").any(|e| matches!(
        &e.event,
        NwkEvent::RouteRecordDelivered { source, relays, truncated: false }
            if *source == r2 && relays == &vec![r1]
    )));
    assert_eq!(data_at(&report, "zc").collect::<Vec<_>>(), vec![(r2, &b"up"[..])]);
    assert_eq!(
        data_at(&report, "r2").collect::<Vec<_>>(),
        vec![(ShortAddr::COORDINATOR, &b"down"[..])]
    );
}

#[tokio::test(start_paused = true)]
async fn router_leaves_and_rejoins_with_same_address() {
    lowmesh_node::logging::init_for_tests();
    let mut config = NodeConfig::parse(CHAIN).unwrap();
    config.scenario.duration_ms = 25_000;
    config.scenario.leaves.push(lowmesh_node::config::LeaveStep {
        at_ms: 12_000,
        node: "r2".into(),
        target: None,
        rejoin: true,
        remove_children: false,
        silent: false,
    });
    let report = run_scenario(&config).await.unwrap();
    let r1 = report.status_of("r1").unwrap().short;
    let r2 = report.status_of("r2").unwrap();
    assert!(r2.joined);

    let r2_events: Vec<_> = report.events_of("r2").map(|e| e.event.clone()).collect();
    let left = r2_events
        .iter()
        .position(|e| matches!(e, NwkEvent::LeaveComplete { is_self: true, rejoin: true, .. }))
        .expect("r2 left");
    assert!(matches!(
        &r2_events[left + 1..],
        [.., NwkEvent::NetworkEntered { rejoined: true, parent, short, .. }]
            if *parent == r1 && *short == r2.short
    ));
    assert!(report.events_of("ed").any(|e| e.event == NwkEvent::ParentLost));
}
