//! Orchestrator integration tests over the scripted channel

mod common;

use common::*;

use wharf::errors::EngineError;
use wharf::models::deployment::{Deployment, OpStatus, RoleKind, RoleState, Severity};
use wharf::orchestrator::DeploySpec;
use wharf::store::{DeploymentStore, GrantStore};

#[tokio::test]
async fn quota_rejection_happens_before_any_remote_side_effect() {
    let h = harness();

    // No grants at all means zero fresh-deploy quota
    let result = h
        .orchestrator
        .deploy("user-1", DeploySpec::frontend("https://github.com/acme/shop"))
        .await;

    assert!(matches!(result, Err(EngineError::QuotaExceeded(_))));
    assert!(h.channel.commands().is_empty());
    assert!(h.builder.calls().is_empty());
}

#[tokio::test]
async fn second_frontend_rejected_when_quota_is_used_up() {
    let h = harness();
    h.grants.insert(grant("user-1", 1, 1, 30)).await.unwrap();

    let mut existing = Deployment::new("user-1", "first123");
    existing.roles.insert(
        RoleKind::Frontend,
        RoleState::new(
            "https://github.com/acme/one".to_string(),
            4000,
            "first123-frontend".to_string(),
        ),
    );
    existing.transition(OpStatus::Deployed).unwrap();
    h.deployments.insert(existing).await.unwrap();

    let result = h
        .orchestrator
        .deploy("user-1", DeploySpec::frontend("https://github.com/acme/two"))
        .await;

    assert!(matches!(result, Err(EngineError::QuotaExceeded(_))));
    // Rejected before port allocation ever touched the host
    assert!(h.channel.commands().is_empty());
}

#[tokio::test]
async fn deploy_records_actual_port_and_points_proxy_at_it() {
    let h = harness();
    h.grants.insert(grant("user-1", 1, 0, 30)).await.unwrap();

    h.channel.on("ss -tlnH", ok(""));
    h.channel.on(
        "pm2 jlist",
        ok(&jlist(vec![jlist_entry(
            "demo1234-frontend",
            "online",
            Some(4312),
        )])),
    );
    // The process self-selected 5173 though 4000 was allocated
    h.channel.on(
        "ss -tlnpH",
        ok("LISTEN 0 511 0.0.0.0:5173 0.0.0.0:* users:((\"node\",pid=4312,fd=23))"),
    );
    h.channel.on("sport = :4000", ok(""));
    h.channel
        .on("sport = :5173", ok("LISTEN 0 511 0.0.0.0:5173 0.0.0.0:*"));

    let outcome = h
        .orchestrator
        .deploy(
            "user-1",
            DeploySpec::frontend("https://github.com/acme/shop").with_subdomain("demo1234"),
        )
        .await
        .unwrap();

    assert_eq!(outcome.deployment.status, OpStatus::Deployed);
    let role = &outcome.deployment.roles[&RoleKind::Frontend];
    assert_eq!(role.allocated_port, 4000);
    assert_eq!(role.actual_port, Some(5173));
    assert!(role.port_confirmed);
    assert_eq!(role.url.as_deref(), Some("http://demo1234.apps.wharf.sh"));

    // The vhost proxies to the port the process actually bound
    assert!(h.channel.writes().iter().any(|(command, contents)| {
        command.contains("demo1234.apps.wharf.sh")
            && contents.contains("proxy_pass http://127.0.0.1:5173;")
    }));

    // And the mismatch is documented in the journal
    let entries = h.journal.entries(&outcome.deployment.id).await.unwrap();
    assert!(entries
        .iter()
        .any(|e| e.severity == Severity::Warning && e.message.contains("instead of allocated")));
}

#[tokio::test]
async fn inconclusive_detection_still_deploys_with_a_warning() {
    let h = harness();
    h.grants.insert(grant("user-1", 1, 0, 30)).await.unwrap();

    h.channel.on("ss -tlnH", ok(""));
    // No pid, no log banner, no PORT env: the whole cascade comes back
    // empty on both passes
    h.channel.on(
        "pm2 jlist",
        ok(&jlist(vec![jlist_entry("calm5678-frontend", "online", None)])),
    );
    h.channel.on("pm2 logs", ok("compiled successfully\n"));
    h.channel.on("sport = :4000", ok(""));

    let outcome = h
        .orchestrator
        .deploy(
            "user-1",
            DeploySpec::frontend("https://github.com/acme/shop").with_subdomain("calm5678"),
        )
        .await
        .unwrap();

    // Supervisor-online is the accepted weaker signal
    assert_eq!(outcome.deployment.status, OpStatus::Deployed);
    let role = &outcome.deployment.roles[&RoleKind::Frontend];
    assert_eq!(role.actual_port, None);
    assert!(!role.port_confirmed);
    assert_eq!(role.effective_port(), 4000);

    let entries = h.journal.entries(&outcome.deployment.id).await.unwrap();
    assert!(entries
        .iter()
        .any(|e| e.severity == Severity::Warning && e.message.contains("port not confirmed")));
}

#[tokio::test]
async fn offline_process_fails_the_role_with_supervisor_logs_attached() {
    let h = harness();
    h.grants.insert(grant("user-1", 1, 0, 30)).await.unwrap();

    h.channel.on("ss -tlnH", ok(""));
    h.channel.on("sport = :4000", ok(""));
    h.channel.on(
        "pm2 jlist",
        ok(&jlist(vec![jlist_entry("sad12345-frontend", "errored", None)])),
    );
    h.channel.on("pm2 logs", ok("Error: listen EADDRINUSE\n"));

    let outcome = h
        .orchestrator
        .deploy(
            "user-1",
            DeploySpec::frontend("https://github.com/acme/shop").with_subdomain("sad12345"),
        )
        .await
        .unwrap();

    assert_eq!(outcome.deployment.status, OpStatus::Failed);
    assert!(!outcome.roles[0].success);
    assert!(outcome.roles[0].detail.contains("EADDRINUSE"));
}

#[tokio::test]
async fn one_failing_role_does_not_abort_or_roll_back_its_sibling() {
    let h = harness();
    h.grants.insert(grant("user-1", 1, 1, 30)).await.unwrap();

    h.channel.on("ss -tlnH", ok(""));
    h.channel.on("sport = :", ok(""));
    h.channel.on("pm2 logs", ok(""));
    h.channel.on(
        "pm2 jlist",
        ok(&jlist(vec![jlist_entry("pair1234-frontend", "online", None)])),
    );
    h.builder.fail_process("pair1234-backend", "no lockfile found");

    let spec = DeploySpec::frontend("https://github.com/acme/web")
        .with_backend("https://github.com/acme/api")
        .with_subdomain("pair1234");
    let outcome = h.orchestrator.deploy("user-1", spec).await.unwrap();

    assert_eq!(outcome.deployment.status, OpStatus::Failed);
    assert_eq!(outcome.roles.len(), 2);

    let frontend = outcome
        .roles
        .iter()
        .find(|r| r.role == RoleKind::Frontend)
        .unwrap();
    let backend = outcome
        .roles
        .iter()
        .find(|r| r.role == RoleKind::Backend)
        .unwrap();

    // The frontend finished provisioning and stays provisioned
    assert!(frontend.success);
    assert!(outcome.deployment.roles[&RoleKind::Frontend].provisioned);
    assert!(!backend.success);
    assert!(backend.detail.contains("no lockfile"));
    assert_eq!(
        outcome.deployment.roles[&RoleKind::Backend].last_error.as_deref(),
        Some(backend.detail.as_str())
    );

    // Both roles were attempted
    assert_eq!(h.builder.calls().len(), 2);
}

#[tokio::test]
async fn retry_role_recovers_a_failed_deployment() {
    let h = harness();
    h.grants.insert(grant("user-1", 1, 1, 30)).await.unwrap();

    h.channel.on("ss -tlnH", ok(""));
    h.channel.on("sport = :", ok(""));
    h.channel.on("pm2 logs", ok(""));
    h.channel.on(
        "pm2 jlist",
        ok(&jlist(vec![
            jlist_entry("duo45678-frontend", "online", None),
            jlist_entry("duo45678-backend", "online", None),
        ])),
    );
    h.builder.fail_process("duo45678-backend", "build exploded");

    let spec = DeploySpec::frontend("https://github.com/acme/web")
        .with_backend("https://github.com/acme/api")
        .with_subdomain("duo45678");
    let outcome = h.orchestrator.deploy("user-1", spec).await.unwrap();
    assert_eq!(outcome.deployment.status, OpStatus::Failed);
    let id = outcome.deployment.id.clone();

    // The collaborator recovers; only the failed role is redone
    h.builder.clear_failure("duo45678-backend");
    let calls_before = h.builder.calls().len();

    let result = h.orchestrator.retry_role(&id, RoleKind::Backend).await.unwrap();
    assert!(result.success);
    assert_eq!(h.builder.calls().len(), calls_before + 1);

    let refreshed = h.deployments.get(&id).await.unwrap().unwrap();
    assert_eq!(refreshed.status, OpStatus::Deployed);
    assert!(refreshed.fully_provisioned());
}

#[tokio::test]
async fn stop_and_restart_are_all_or_nothing_for_status() {
    let h = harness();
    h.grants.insert(grant("user-1", 1, 1, 30)).await.unwrap();

    h.channel.on("ss -tlnH", ok(""));
    h.channel.on("sport = :", ok(""));
    h.channel.on("pm2 logs", ok(""));
    h.channel.on(
        "pm2 jlist",
        ok(&jlist(vec![
            jlist_entry("duo12345-frontend", "online", None),
            jlist_entry("duo12345-backend", "online", None),
        ])),
    );

    let spec = DeploySpec::frontend("https://github.com/acme/web")
        .with_backend("https://github.com/acme/api")
        .with_subdomain("duo12345");
    let outcome = h.orchestrator.deploy("user-1", spec).await.unwrap();
    assert_eq!(outcome.deployment.status, OpStatus::Deployed);
    let id = outcome.deployment.id.clone();

    // Backend refuses to stop: status must not move
    h.channel.on("pm2 stop 'duo12345-backend'", fail("nope"));
    let partial = h.orchestrator.stop(&id).await.unwrap();
    assert!(!partial.success);
    assert!(partial.roles.iter().any(|r| r.role == RoleKind::Frontend && r.success));
    assert!(partial.roles.iter().any(|r| r.role == RoleKind::Backend && !r.success));
    let d = h.deployments.get(&id).await.unwrap().unwrap();
    assert_eq!(d.status, OpStatus::Deployed);

    // Once both roles stop, the status flips
    h.channel.on("pm2 stop 'duo12345-backend'", ok(""));
    let full = h.orchestrator.stop(&id).await.unwrap();
    assert!(full.success);
    let d = h.deployments.get(&id).await.unwrap().unwrap();
    assert_eq!(d.status, OpStatus::Stopped);

    // Same rule for restart
    h.channel.on("pm2 restart 'duo12345-frontend'", fail("nope"));
    let partial = h.orchestrator.restart(&id).await.unwrap();
    assert!(!partial.success);
    let d = h.deployments.get(&id).await.unwrap().unwrap();
    assert_eq!(d.status, OpStatus::Stopped);

    h.channel.on("pm2 restart 'duo12345-frontend'", ok(""));
    let full = h.orchestrator.restart(&id).await.unwrap();
    assert!(full.success);
    let d = h.deployments.get(&id).await.unwrap().unwrap();
    assert_eq!(d.status, OpStatus::Deployed);
}

#[tokio::test]
async fn delete_cascades_and_releases_the_subdomain() {
    let h = harness();
    h.grants.insert(grant("user-1", 1, 0, 30)).await.unwrap();

    h.channel.on("ss -tlnH", ok(""));
    h.channel.on("sport = :", ok(""));
    h.channel.on("pm2 logs", ok(""));
    h.channel.on(
        "pm2 jlist",
        ok(&jlist(vec![jlist_entry("gone1234-frontend", "online", None)])),
    );

    let outcome = h
        .orchestrator
        .deploy(
            "user-1",
            DeploySpec::frontend("https://github.com/acme/shop").with_subdomain("gone1234"),
        )
        .await
        .unwrap();
    let id = outcome.deployment.id.clone();

    let deleted = h.orchestrator.delete(&id).await.unwrap();
    assert!(deleted.success);

    // Record, logs, vhost, process: all gone as one unit
    assert!(h.deployments.get(&id).await.unwrap().is_none());
    assert!(h.journal.entries(&id).await.unwrap().is_empty());
    let commands = h.channel.commands();
    assert!(commands.iter().any(|c| c.contains("pm2 delete 'gone1234-frontend'")));
    assert!(commands.iter().any(|c| c.contains("rm -rf '/srv/apps/gone1234-frontend'")));
    assert!(commands
        .iter()
        .any(|c| c.contains("rm -f") && c.contains("gone1234.apps.wharf.sh")));

    // The subdomain is free again
    let again = h
        .orchestrator
        .deploy(
            "user-1",
            DeploySpec::frontend("https://github.com/acme/shop").with_subdomain("gone1234"),
        )
        .await
        .unwrap();
    assert_eq!(again.deployment.subdomain, "gone1234");
}
