//! Cluster configuration scenarios over real HTTP.
//!
//! Each test runs a locator and its members in-process on ephemeral
//! ports, and drives them through the same client the daemon uses.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use cfgsync_api::{LocatorClient, build_router, member_router};
use cfgsync_core::{ApplyReport, CommandStatus, ConfigurationRecord, RegionDescriptor};
use cfgsync_coordinator::{ConfigCoordinator, SessionState};
use cfgsync_member::MemberAgent;
use cfgsync_store::ConfigStore;
use tempfile::TempDir;

async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

struct Locator {
    coordinator: Arc<ConfigCoordinator>,
    client: LocatorClient,
    root: PathBuf,
}

async fn start_locator(dir: &Path) -> Locator {
    let root = dir.join("cluster_config");
    let coordinator = Arc::new(ConfigCoordinator::new(ConfigStore::open(&root).unwrap()));
    let addr = serve(build_router(coordinator.clone())).await;
    Locator {
        coordinator,
        client: LocatorClient::new(&format!("http://{addr}")).unwrap(),
        root,
    }
}

/// cluster/group1/group2 with distinct log sizes, one region and one jar each.
fn seed(locator: &Locator) {
    let store = locator.coordinator.store();
    for (name, size) in [("cluster", "5000"), ("group1", "6000"), ("group2", "7000")] {
        let mut record = ConfigurationRecord::new(name);
        record.set_property("log-file-size-limit", size);
        let region = if name == "cluster" {
            "regionForCluster".to_string()
        } else {
            format!("regionFor{}", name.replacen('g', "G", 1))
        };
        record.add_region(RegionDescriptor::new(&region, "REPLICATE"));
        store.put(&record).unwrap();
        locator
            .coordinator
            .registry()
            .deploy(name, format!("{name} classes").as_bytes(), &format!("{name}.jar"))
            .unwrap();
    }
}

struct Member {
    agent: Arc<MemberAgent>,
    member_id: String,
    work_dir: TempDir,
}

async fn start_member(locator: &Locator, groups: &str) -> Member {
    let work_dir = tempfile::tempdir().unwrap();
    let agent = Arc::new(MemberAgent::open(work_dir.path(), groups).unwrap());
    let addr = serve(member_router(agent.clone())).await;

    let (member_id, report) = locator
        .client
        .join_and_apply(&agent, &format!("http://{addr}"))
        .await
        .unwrap();
    assert!(report.is_success(), "{:?}", report.failures);
    Member {
        agent,
        member_id,
        work_dir,
    }
}

fn installed(member: &Member, record: &str, file: &str) -> PathBuf {
    member.work_dir.path().join(record).join(format!("cfgsync#{file}"))
}

#[tokio::test]
async fn member_without_groups_gets_cluster_configuration_only() {
    let dir = tempfile::tempdir().unwrap();
    let locator = start_locator(dir.path()).await;
    seed(&locator);

    let member = start_member(&locator, "").await;

    let regions: Vec<String> = member.agent.regions().into_iter().map(|r| r.name).collect();
    assert_eq!(regions, vec!["regionForCluster"]);
    assert_eq!(member.agent.property("log-file-size-limit").as_deref(), Some("5000"));
    assert!(installed(&member, "cluster", "cluster.jar#1").is_file());
    assert_eq!(member.agent.loaded_artifacts().len(), 1);
}

#[tokio::test]
async fn member_with_one_group() {
    let dir = tempfile::tempdir().unwrap();
    let locator = start_locator(dir.path()).await;
    seed(&locator);

    let member = start_member(&locator, "group1").await;

    assert_eq!(member.agent.regions().len(), 2);
    assert!(member.agent.region("regionForGroup1").is_some());
    assert!(member.agent.region("regionForGroup2").is_none());
    assert_eq!(member.agent.property("log-file-size-limit").as_deref(), Some("6000"));
    assert!(installed(&member, "group1", "group1.jar#1").is_file());
    assert!(member.agent.find_loaded("group2.jar").is_none());
}

#[tokio::test]
async fn member_with_multiple_groups_gets_union_and_last_group_wins() {
    let dir = tempfile::tempdir().unwrap();
    let locator = start_locator(dir.path()).await;
    seed(&locator);

    let member = start_member(&locator, "group1,group2").await;

    let mut regions: Vec<String> = member.agent.regions().into_iter().map(|r| r.name).collect();
    regions.sort();
    assert_eq!(regions, vec!["regionForCluster", "regionForGroup1", "regionForGroup2"]);
    assert_eq!(member.agent.loaded_artifacts().len(), 3);
    for (record, file) in [
        ("cluster", "cluster.jar#1"),
        ("group1", "group1.jar#1"),
        ("group2", "group2.jar#1"),
    ] {
        assert!(installed(&member, record, file).is_file(), "{file} missing");
    }
    assert_eq!(member.agent.property("log-file-size-limit").as_deref(), Some("7000"));

    let sessions = locator.client.members().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, member.member_id);
    assert_eq!(sessions[0].state, SessionState::Acked);
}

#[tokio::test]
async fn deploy_reaches_members_of_the_target_group() {
    let dir = tempfile::tempdir().unwrap();
    let locator = start_locator(dir.path()).await;
    seed(&locator);
    let in_group = start_member(&locator, "group1").await;
    let outside = start_member(&locator, "group2").await;

    let result = locator
        .client
        .deploy(Some("group1"), "group1.jar", b"group1 classes v2".to_vec())
        .await
        .unwrap();
    assert_eq!(result.status, CommandStatus::Ok, "{}", result.message);
    assert_eq!(result.data.unwrap()["affected_member_count"], 1);

    assert_eq!(in_group.agent.find_loaded("group1.jar").unwrap().version, 2);
    assert!(installed(&in_group, "group1", "group1.jar#2").is_file());
    assert!(!installed(&in_group, "group1", "group1.jar#1").exists());
    assert!(outside.agent.find_loaded("group1.jar").is_none());
    assert!(locator.root.join("group1/group1.jar#2").is_file());

    let result = locator
        .client
        .deploy(None, "cluster.jar", b"cluster classes v2".to_vec())
        .await
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(result.data.unwrap()["affected_member_count"], 2);
    assert_eq!(outside.agent.find_loaded("cluster.jar").unwrap().version, 2);
}

#[tokio::test]
async fn deploy_with_no_members_is_an_error_but_persists() {
    let dir = tempfile::tempdir().unwrap();
    let locator = start_locator(dir.path()).await;

    let result = locator
        .client
        .deploy(None, "cluster.jar", b"cluster classes".to_vec())
        .await
        .unwrap();
    assert_eq!(result.status, CommandStatus::Error);
    assert!(locator.root.join("cluster/cluster.jar#1").is_file());

    let member = start_member(&locator, "").await;
    assert!(installed(&member, "cluster", "cluster.jar#1").is_file());
}

#[tokio::test]
async fn import_is_rejected_while_a_member_is_running() {
    let dir = tempfile::tempdir().unwrap();
    let locator = start_locator(dir.path()).await;
    seed(&locator);
    let archive = locator.client.export().await.unwrap();
    let _member = start_member(&locator, "group1").await;

    let before = locator.coordinator.store().get("group1");
    let result = locator.client.import(archive).await.unwrap();

    assert_eq!(result.status, CommandStatus::Error);
    assert_eq!(locator.coordinator.store().get("group1"), before);
    let siblings: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(siblings.len(), 1);
}

#[tokio::test]
async fn import_succeeds_after_a_member_crashed_without_leaving() {
    let dir = tempfile::tempdir().unwrap();
    let locator = start_locator(dir.path()).await;
    seed(&locator);
    let archive = locator.client.export().await.unwrap();

    // Nothing listens on the advertised endpoint any more.
    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let joined = locator.client.join("group1", &format!("http://{dead}")).await.unwrap();
    locator
        .client
        .ack(&joined.member_id, &ApplyReport::default())
        .await
        .unwrap();
    assert_eq!(locator.coordinator.active_member_count(), 1);

    let result = locator.client.import(archive).await.unwrap();
    assert!(result.is_ok(), "{}", result.message);

    let members = locator.client.members().await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].state, SessionState::Failed);
}

#[tokio::test]
async fn leave_clears_a_stale_session_before_import() {
    let dir = tempfile::tempdir().unwrap();
    let locator = start_locator(dir.path()).await;
    seed(&locator);
    let archive = locator.client.export().await.unwrap();
    let member = start_member(&locator, "group1").await;

    assert_eq!(locator.client.import(archive.clone()).await.unwrap().status, CommandStatus::Error);
    assert!(locator.client.leave(&member.member_id).await.unwrap().is_ok());
    assert!(!locator.client.leave(&member.member_id).await.unwrap().is_ok());

    let result = locator.client.import(archive).await.unwrap();
    assert!(result.is_ok(), "{}", result.message);
}

#[tokio::test]
async fn export_then_import_into_fresh_locator_keeps_backup() {
    let src_dir = tempfile::tempdir().unwrap();
    let source = start_locator(src_dir.path()).await;
    seed(&source);
    let archive = source.client.export().await.unwrap();

    let dst_dir = tempfile::tempdir().unwrap();
    let target = start_locator(dst_dir.path()).await;
    let mut previous = ConfigurationRecord::new("group9");
    previous.set_property("log-file-size-limit", "9000");
    target.coordinator.store().put(&previous).unwrap();

    let result = target.client.import(archive).await.unwrap();
    assert!(result.is_ok(), "{}", result.message);

    assert_eq!(
        target.coordinator.store().list_names(),
        vec!["cluster", "group1", "group2"]
    );
    for rel in ["cluster/cluster.jar#1", "group1/group1.xml", "group2/group2.properties"] {
        assert_eq!(
            std::fs::read(target.root.join(rel)).unwrap(),
            std::fs::read(source.root.join(rel)).unwrap(),
            "{rel} differs"
        );
    }

    let backups: Vec<PathBuf> = std::fs::read_dir(dst_dir.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| *p != target.root)
        .collect();
    assert_eq!(backups.len(), 1);
    let backup_name = backups[0].file_name().unwrap().to_str().unwrap().to_string();
    assert!(backup_name.starts_with("cluster_config"), "{backup_name}");
    assert!(backups[0].join("group9/group9.properties").is_file());

    let member = start_member(&target, "group2").await;
    assert_eq!(member.agent.property("log-file-size-limit").as_deref(), Some("7000"));
}

#[tokio::test]
async fn restarted_member_is_repaired_by_rejoin() {
    let dir = tempfile::tempdir().unwrap();
    let locator = start_locator(dir.path()).await;
    seed(&locator);
    let member = start_member(&locator, "group1").await;
    locator.client.leave(&member.member_id).await.unwrap();

    // A deploy while the member is away only reaches the store.
    let result = locator
        .client
        .deploy(Some("group1"), "group1.jar", b"group1 classes v2".to_vec())
        .await
        .unwrap();
    assert_eq!(result.status, CommandStatus::Error);

    let agent = Arc::new(MemberAgent::open(member.work_dir.path(), "group1").unwrap());
    assert!(!installed(&member, "group1", "group1.jar#1").exists());
    let addr = serve(member_router(agent.clone())).await;
    locator
        .client
        .join_and_apply(&agent, &format!("http://{addr}"))
        .await
        .unwrap();

    assert_eq!(agent.find_loaded("group1.jar").unwrap().version, 2);
    assert!(installed(&member, "group1", "group1.jar#2").is_file());
}
