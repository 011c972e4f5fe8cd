//! End-to-end tests driving the public API over the in-memory engine.

use pretty_assertions::assert_eq;

use range::api::RangeApi;
use range::config::RangeConfig;
use range::error::{CResult, Error};
use range::graph::PRIMARY;
use range::mq::{MqRegistry, RequestQueueListener};
use range::record::NodeType;
use range::value::Value;

fn api() -> RangeApi<range::store::memory::Memory> {
    RangeApi::open_memory(RangeConfig::default()).unwrap()
}

/// The inventory used throughout: env `e1` with `testcluster1` holding
/// thing0..thing6 and `testcluster2` holding thing3..thing9.
fn seeded() -> CResult<RangeApi<range::store::memory::Memory>> {
    let api = api();
    api.create_env("e1")?;
    api.add_cluster_to_env("e1", "testcluster1")?;
    api.add_cluster_to_env("e1", "testcluster2")?;
    for i in 0..=6 {
        api.add_host_to_cluster("e1", "testcluster1", &format!("thing{}", i))?;
    }
    for i in 3..=9 {
        api.add_host_to_cluster("e1", "testcluster2", &format!("thing{}", i))?;
    }
    Ok(api)
}

#[test]
fn sequence_expansion() -> CResult<()> {
    let api = api();
    let result = api.expand_range_expression("", "asdf1..1000", None)?;
    assert_eq!(result.len(), 1000);
    assert_eq!(result[0], "asdf0001");
    assert_eq!(result[499], "asdf0500");
    assert_eq!(result[999], "asdf1000");
    Ok(())
}

#[test]
fn brace_expansion_unions_clusters() -> CResult<()> {
    let api = seeded()?;
    let result = api.expand_range_expression("e1", "%testcluster{1,2}", None)?;
    let expect: Vec<String> = (0..=9).map(|i| format!("thing{}", i)).collect();
    assert_eq!(result, expect);
    Ok(())
}

#[test]
fn difference_with_regex_filters_matches() -> CResult<()> {
    let api = seeded()?;
    let result = api.expand_range_expression("e1", "%testcluster1 - /[345]$/", None)?;
    assert_eq!(result, vec!["thing0", "thing1", "thing2", "thing6"]);
    Ok(())
}

#[test]
fn intersection_with_regex_keeps_matches() -> CResult<()> {
    let api = seeded()?;
    let result = api.expand_range_expression("e1", "%testcluster1 & /[12]$/", None)?;
    assert_eq!(result, vec!["thing1", "thing2"]);
    Ok(())
}

#[test]
fn admin_operator_finds_nearest_tagged_parent() -> CResult<()> {
    // thing5's only parent is testcluster1, which carries no ADMIN_NODE but
    // sits under testcluster2, which does.
    let api = api();
    api.create_env("e1")?;
    api.add_cluster_to_env("e1", "testcluster2")?;
    api.add_cluster_to_cluster("e1", "testcluster2", "testcluster1")?;
    api.add_host_to_cluster("e1", "testcluster1", "thing5")?;
    api.add_node_key_value("e1", "testcluster2", "ADMIN_NODE", "foobar")?;

    let result = api.expand_range_expression("e1", "^thing5", None)?;
    assert_eq!(result, vec!["foobar"]);
    Ok(())
}

#[test]
fn key_expansion_reads_tags() -> CResult<()> {
    let api = seeded()?;
    api.add_node_key_value("e1", "testcluster1", "OWNER", "alice")?;
    api.add_node_key_value("e1", "testcluster1", "OWNER", "bob")?;

    let values = api.expand_range_expression("e1", "testcluster1:OWNER", None)?;
    assert_eq!(values, vec!["alice", "bob"]);

    let keys = api.expand_range_expression("e1", "testcluster1:KEYS", None)?;
    assert_eq!(keys, vec!["OWNER"]);
    Ok(())
}

#[test]
fn set_algebra_over_expansions() -> CResult<()> {
    let api = seeded()?;
    // Hosts in both clusters.
    let both = api.expand_range_expression("e1", "%testcluster1 & %testcluster2", None)?;
    assert_eq!(both, vec!["thing3", "thing4", "thing5", "thing6"]);
    // Hosts only in testcluster1.
    let only1 = api.expand_range_expression("e1", "%testcluster1 - %testcluster2", None)?;
    assert_eq!(only1, vec!["thing0", "thing1", "thing2"]);
    // Parenthesized union with a literal.
    let mixed = api.expand_range_expression("e1", "(thing1, 'extra host')", None)?;
    assert_eq!(mixed, vec!["extra host", "thing1"]);
    Ok(())
}

#[test]
fn builtin_functions_expand() -> CResult<()> {
    let api = seeded()?;

    let hosts = api.expand_range_expression("e1", "expand_hosts(testcluster2)", None)?;
    let mut sorted = hosts.clone();
    sorted.sort();
    sorted.dedup();
    let expect: Vec<String> = (3..=9).map(|i| format!("thing{}", i)).collect();
    assert_eq!(sorted, expect);

    let clusters = api.expand_range_expression("e1", "clusters(thing5)", None)?;
    let mut clusters = clusters;
    clusters.sort();
    assert_eq!(clusters, vec!["testcluster1", "testcluster2"]);

    let all = api.expand_range_expression("e1", "all_clusters()", None)?;
    assert_eq!(all, vec!["e1#testcluster1", "e1#testcluster2"]);

    // The JSON-producing expand() yields one document per argument element.
    let docs = api.expand_range_expression("e1", "expand(testcluster1)", None)?;
    assert_eq!(docs.len(), 1);
    assert!(docs[0].contains("\"type\":\"CLUSTER\""));
    Ok(())
}

#[test]
fn cross_environment_host_is_rejected() -> CResult<()> {
    let api = seeded()?;
    api.create_env("envB")?;
    api.add_cluster_to_env("envB", "clusterB")?;

    let before = api.get_clusters("e1", "thing1", None)?;
    let err = api.add_host_to_cluster("envB", "clusterB", "thing1").unwrap_err();
    assert!(matches!(err, Error::InvalidEnvironment(_)));

    // The host's edges are unchanged.
    assert_eq!(api.get_clusters("e1", "thing1", None)?, before);
    Ok(())
}

#[test]
fn version_isolation() -> CResult<()> {
    let api = api();
    api.create_env("e")?;
    api.add_cluster_to_env("e", "c1")?;
    api.add_cluster_to_env("e", "c2")?;
    let version = api.range_version()?;

    api.remove_cluster_from_env("e", "c1")?;

    assert_eq!(api.all_clusters("e", Some(version))?, vec!["c1", "c2"]);
    assert_eq!(api.all_clusters("e", None)?, vec!["c2"]);
    Ok(())
}

#[test]
fn expressions_at_old_versions_are_stable() -> CResult<()> {
    let api = seeded()?;
    let version = api.range_version()?;
    let before = api.expand_range_expression("e1", "%testcluster1", Some(version))?;

    api.remove_host_from_cluster("e1", "testcluster1", "thing0")?;
    api.add_host_to_cluster("e1", "testcluster1", "thing99")?;

    let after = api.expand_range_expression("e1", "%testcluster1", Some(version))?;
    assert_eq!(before, after);

    let latest = api.expand_range_expression("e1", "%testcluster1", None)?;
    assert!(!latest.contains(&"thing0".to_string()));
    assert!(latest.contains(&"thing99".to_string()));
    Ok(())
}

#[test]
fn add_then_remove_restores_structure_with_two_changelog_entries() -> CResult<()> {
    let api = seeded()?;
    let clusters_before = api.all_clusters("e1", None)?;
    let version_before = {
        let snapshot = api.backend().snapshot(None)?;
        snapshot.graph_version(PRIMARY)?
    };

    api.add_cluster_to_env("e1", "transient")?;
    api.remove_cluster_from_env("e1", "transient")?;

    assert_eq!(api.all_clusters("e1", None)?, clusters_before);
    let snapshot = api.backend().snapshot(None)?;
    assert_eq!(snapshot.graph_version(PRIMARY)?, version_before + 2);
    Ok(())
}

#[test]
fn duplicate_tag_value_is_rejected_without_version_bump() -> CResult<()> {
    let api = seeded()?;
    api.add_node_key_value("e1", "testcluster1", "OWNER", "alice")?;

    let version = {
        let snapshot = api.backend().snapshot(None)?;
        snapshot.get_node(PRIMARY, "e1#testcluster1")?.unwrap().version()
    };

    let err = api.add_node_key_value("e1", "testcluster1", "OWNER", "alice").unwrap_err();
    assert!(matches!(err, Error::NodeExists(_)));

    let snapshot = api.backend().snapshot(None)?;
    assert_eq!(snapshot.get_node(PRIMARY, "e1#testcluster1")?.unwrap().version(), version);
    Ok(())
}

#[test]
fn tag_lifecycle() -> CResult<()> {
    let api = seeded()?;
    api.add_node_key_value("e1", "testcluster1", "OWNER", "alice")?;
    api.add_node_key_value("e1", "testcluster1", "OWNER", "bob")?;
    let version = api.range_version()?;

    api.remove_node_key_value("e1", "testcluster1", "OWNER", "alice")?;
    assert_eq!(api.fetch_key("e1", "testcluster1", "OWNER", None)?, vec!["bob"]);
    // Old values remain readable at the old version.
    assert_eq!(
        api.fetch_key("e1", "testcluster1", "OWNER", Some(version))?,
        vec!["alice", "bob"]
    );

    // Removing a value that is not there reports the key.
    let err =
        api.remove_node_key_value("e1", "testcluster1", "OWNER", "carol").unwrap_err();
    assert!(matches!(err, Error::KeyNotFound(_)));

    api.remove_key_from_node("e1", "testcluster1", "OWNER")?;
    assert!(api.get_keys("e1", "testcluster1", None)?.is_empty());
    assert!(matches!(
        api.fetch_key("e1", "testcluster1", "OWNER", None),
        Err(Error::KeyNotFound(_))
    ));
    // But not at the version that still had it.
    assert_eq!(
        api.fetch_key("e1", "testcluster1", "OWNER", Some(version))?,
        vec!["alice", "bob"]
    );
    Ok(())
}

#[test]
fn expand_builds_nested_tree() -> CResult<()> {
    let api = seeded()?;
    api.add_node_key_value("e1", "testcluster1", "OWNER", "alice")?;
    api.add_node_env_dependency("e1", "testcluster1", "testcluster2")?;

    let tree = api.expand_env("e1", None, usize::MAX)?;
    let Value::Object(root) = &tree else { panic!("expected object") };
    assert_eq!(root.get("type"), Some(&Value::String("ENVIRONMENT".to_string())));
    assert_eq!(root.get("name"), Some(&Value::String("e1".to_string())));

    let Some(Value::Object(children)) = root.get("children") else {
        panic!("expected children object")
    };
    // testcluster1 appears under whichever parent the walk reached first;
    // testcluster2 is a direct child of the environment.
    assert!(children.get("e1#testcluster2").is_some());

    let json = tree.to_json();
    assert!(json.contains("\"OWNER\":[\"alice\"]"));
    assert!(json.contains("\"dependencies\":[\"e1#testcluster2\"]"));

    // Depth 1 stops below the environment's direct children.
    let shallow = api.expand_env("e1", None, 1)?;
    let Value::Object(shallow_root) = &shallow else { panic!("expected object") };
    let Some(Value::Object(shallow_children)) = shallow_root.get("children") else {
        panic!("expected children object")
    };
    for (_, child) in shallow_children.iter() {
        let Value::Object(child) = child else { panic!("expected object") };
        let Some(Value::Object(grandchildren)) = child.get("children") else {
            panic!("expected children object")
        };
        assert!(grandchildren.is_empty());
    }
    Ok(())
}

#[test]
fn expand_cluster_checks_type() -> CResult<()> {
    let api = seeded()?;
    assert!(matches!(
        api.expand_cluster("e1", "thing1", None, usize::MAX),
        Err(Error::NodeNotFound(_))
    ));
    let err = api.expand_env("e1#testcluster1", None, usize::MAX).unwrap_err();
    assert!(matches!(err, Error::IncorrectNodeType(_)));
    Ok(())
}

#[test]
fn simple_expand_variants() -> CResult<()> {
    let api = seeded()?;
    let direct = api.simple_expand_env("e1", None)?;
    assert_eq!(direct, vec!["testcluster1", "testcluster2"]);

    let hosts = api.simple_expand_cluster("e1", "testcluster1", None)?;
    assert_eq!(hosts.len(), 7);

    assert!(matches!(
        api.simple_expand_cluster("e1", "thing1", None),
        Err(Error::NodeNotFound(_))
    ));
    Ok(())
}

#[test]
fn parent_key_searches() -> CResult<()> {
    let api = seeded()?;
    api.add_node_key_value("e1", "testcluster2", "CONTACT", "oncall")?;

    let bfs = api.bfs_search_parents_for_first_key("e1", "thing5", "CONTACT", None)?;
    let (found_in, values) = bfs.expect("bfs should find the key");
    assert_eq!(found_in, "e1#testcluster2");
    assert_eq!(values, vec!["oncall"]);

    let dfs = api.dfs_search_parents_for_first_key("e1", "thing5", "CONTACT", None)?;
    assert_eq!(dfs.expect("dfs should find the key").0, "e1#testcluster2");

    assert!(api
        .bfs_search_parents_for_first_key("e1", "thing5", "MISSING", None)?
        .is_none());
    Ok(())
}

#[test]
fn nearest_common_ancestor_meets_in_the_middle() -> CResult<()> {
    let api = seeded()?;
    // A deeper branch under testcluster1: thing0 and deep1 meet there.
    api.add_cluster_to_cluster("e1", "testcluster1", "sub")?;
    api.add_host_to_cluster("e1", "sub", "deep1")?;

    let ancestor = api.nearest_common_ancestor("e1", "thing0", "deep1", None)?;
    assert_eq!(ancestor.as_deref(), Some("e1#testcluster1"));

    // A node with no ancestors in common with anything.
    api.add_host("floating")?;
    assert_eq!(api.nearest_common_ancestor("e1", "thing0", "floating", None)?, None);
    Ok(())
}

#[test]
fn topological_sort_orders_dependencies() -> CResult<()> {
    let api = api();
    api.create_env("e")?;
    api.add_cluster_to_env("e", "c1")?;
    api.add_cluster_to_env("e", "c2")?;
    api.add_cluster_to_env("e", "c3")?;
    api.add_node_env_dependency("e", "c1", "c2")?;
    api.add_node_env_dependency("e", "c2", "c3")?;

    let sorted = api.environment_topological_sort("e", None)?;
    assert_eq!(sorted.len(), 3);
    let pos = |name: &str| sorted.iter().position(|n| n == name).unwrap();
    assert!(pos("e#c1") < pos("e#c2"));
    assert!(pos("e#c2") < pos("e#c3"));

    api.add_node_env_dependency("e", "c3", "c1")?;
    assert!(matches!(
        api.environment_topological_sort("e", None),
        Err(Error::GraphCycle(_))
    ));
    Ok(())
}

#[test]
fn orphan_detection() -> CResult<()> {
    let api = seeded()?;
    assert!(api.find_orphaned_nodes(None)?.is_empty());

    // Detaching both clusters orphans them and every host under them.
    api.remove_cluster_from_env("e1", "testcluster2")?;
    api.remove_cluster_from_env("e1", "testcluster1")?;

    let orphans = api.find_orphaned_nodes(None)?;
    let names: Vec<&str> = orphans.iter().map(|(_, name)| name.as_str()).collect();
    assert!(names.contains(&"e1#testcluster1"));
    assert!(names.contains(&"e1#testcluster2"));
    assert!(names.contains(&"thing0"));
    assert!(orphans
        .iter()
        .any(|(t, name)| *t == NodeType::Cluster && name == "e1#testcluster1"));
    Ok(())
}

#[test]
fn all_hosts_and_environments() -> CResult<()> {
    let api = seeded()?;
    api.create_env("e2")?;
    assert_eq!(api.all_environments(None)?, vec!["e1", "e2"]);
    assert_eq!(api.all_hosts(None)?.len(), 10);
    Ok(())
}

#[test]
fn host_membership_lifecycle() -> CResult<()> {
    let api = seeded()?;

    // A free-standing host can later join a cluster in any environment.
    api.add_host("lonely1")?;
    assert!(matches!(api.add_host("lonely1"), Err(Error::NodeExists(_))));
    api.add_host_to_cluster("e1", "testcluster1", "lonely1")?;
    assert_eq!(
        api.get_clusters("e1", "lonely1", None)?,
        vec!["testcluster1"]
    );

    // Removing it from another environment's name fails.
    api.create_env("e2")?;
    assert!(matches!(
        api.remove_host("e2", "lonely1"),
        Err(Error::InvalidEnvironment(_))
    ));
    api.remove_host("e1", "lonely1")?;
    assert!(!api.all_hosts(None)?.contains(&"lonely1".to_string()));
    Ok(())
}

#[test]
fn dependency_lifecycle() -> CResult<()> {
    let api = seeded()?;
    api.create_env("e2")?;
    api.add_cluster_to_env("e2", "remote")?;

    api.add_node_ext_dependency("e1", "testcluster1", "e2", "remote")?;
    assert!(matches!(
        api.add_node_ext_dependency("e1", "testcluster1", "e2", "remote"),
        Err(Error::NodeExists(_))
    ));

    // Environments cannot carry dependencies.
    assert!(matches!(
        api.add_node_env_dependency("e1", "", "testcluster1"),
        Err(Error::IncorrectNodeType(_))
    ));

    api.remove_node_ext_dependency("e1", "testcluster1", "e2", "remote")?;
    assert!(matches!(
        api.remove_node_ext_dependency("e1", "testcluster1", "e2", "remote"),
        Err(Error::EdgeNotFound(_))
    ));
    Ok(())
}

#[test]
fn node_checksums_validate() -> CResult<()> {
    let api = seeded()?;
    let snapshot = api.backend().snapshot(None)?;
    for node in snapshot.nodes(PRIMARY)? {
        assert!(node.is_valid(), "{} fails its checksum", node.name());
    }
    Ok(())
}

#[test]
fn forwarded_writes_apply_on_the_daemon() -> CResult<()> {
    let registry = MqRegistry::new();
    let mut config = RangeConfig::default();
    config.stored_mq_name = "fwd_test".to_string();
    config.stored_request_timeout = 500;
    config.reader_ack_timeout = 5_000;

    // The daemon applies locally; the client forwards everything.
    let daemon = RangeApi::open_memory(config.clone())?;
    let listener = RequestQueueListener::new(&registry, &config);

    config.use_stored = true;
    let client = RangeApi::with_forwarding(
        config.clone(),
        range::store::memory::Memory::new(),
        &registry,
    )?;

    let server = std::thread::spawn(move || -> CResult<RangeApi<range::store::memory::Memory>> {
        // Serve the three successful writes and the failing one.
        let mut served = 0;
        while served < 4 {
            if daemon.serve_one(&listener)? {
                served += 1;
            }
        }
        Ok(daemon)
    });

    client.create_env("prod")?;
    client.add_cluster_to_env("prod", "web")?;
    client.add_host_to_cluster("prod", "web", "web001")?;

    // A precondition failure on the daemon comes back as the typed error.
    let err = client.remove_env("missing").unwrap_err();
    assert!(matches!(err, Error::NodeNotFound(_)));

    let daemon = server.join().expect("daemon thread panicked")?;
    assert_eq!(daemon.all_environments(None)?, vec!["prod"]);
    assert_eq!(daemon.expand_range_expression("prod", "%web", None)?, vec!["web001"]);
    Ok(())
}
