//! Subscription lifecycle monitor integration tests

mod common;

use common::*;

use chrono::{Duration, Utc};
use wharf::models::deployment::{Deployment, OpStatus, RoleKind, RoleState};
use wharf::models::grant::GrantStatus;
use wharf::monitor::WarningItem;
use wharf::store::DeploymentStore;
use wharf::store::GrantStore;

/// Insert a deployed record directly, skipping orchestration
async fn seeded_deployment(h: &Harness, user_id: &str, subdomain: &str) -> String {
    let mut deployment = Deployment::new(user_id, subdomain);
    deployment.roles.insert(
        RoleKind::Frontend,
        RoleState::new(
            "https://github.com/acme/shop".to_string(),
            4000,
            format!("{}-frontend", subdomain),
        ),
    );
    deployment.transition(OpStatus::Deployed).unwrap();
    let id = deployment.id.clone();
    h.deployments.insert(deployment).await.unwrap();
    id
}

#[tokio::test]
async fn expired_grant_suspends_deployments_and_surfaces_warnings() {
    let h = harness();
    h.grants.insert(grant("user-1", 1, 1, -1)).await.unwrap();
    let id = seeded_deployment(&h, "user-1", "alpha123").await;

    h.monitor.sweep().await;

    // The lapsed grant was flipped to expired
    let grants = h.grants.grants_for_user("user-1").await.unwrap();
    assert_eq!(grants[0].status, GrantStatus::Expired);

    // The deployment was stopped and suspended with the grace deadline
    let d = h.deployments.get(&id).await.unwrap().unwrap();
    assert_eq!(d.status, OpStatus::Stopped);
    assert!(d.is_suspended());
    let deadline = d.delete_deadline().unwrap();
    let remaining = deadline - Utc::now();
    assert!(remaining <= Duration::days(7));
    assert!(remaining > Duration::days(6));

    assert!(h
        .channel
        .commands()
        .iter()
        .any(|c| c.contains("pm2 stop 'alpha123-frontend'")));

    // Warnings: one expiry notice plus one pending-deletion notice
    let warnings = h.monitor.get_warnings("user-1").await.unwrap();
    assert!(warnings.has_warnings);
    assert!(warnings.items.iter().any(|item| matches!(
        item,
        WarningItem::SubscriptionExpired {
            affected_deployments: 1
        }
    )));
    assert!(warnings.items.iter().any(|item| matches!(
        item,
        WarningItem::PendingDeletion {
            days_until_deletion: 7,
            ..
        }
    )));
}

#[tokio::test]
async fn enforce_limits_never_resets_an_existing_deadline() {
    let h = harness();
    h.grants.insert(grant("user-1", 1, 1, -1)).await.unwrap();
    let id = seeded_deployment(&h, "user-1", "beta1234").await;

    h.monitor.enforce_limits("user-1").await.unwrap();
    let first_deadline = h
        .deployments
        .get(&id)
        .await
        .unwrap()
        .unwrap()
        .delete_deadline()
        .unwrap();

    h.monitor.enforce_limits("user-1").await.unwrap();
    let second_deadline = h
        .deployments
        .get(&id)
        .await
        .unwrap()
        .unwrap()
        .delete_deadline()
        .unwrap();

    assert_eq!(first_deadline, second_deadline);
}

#[tokio::test]
async fn reap_deletes_past_deadlines_and_spares_future_ones() {
    let h = harness();

    let mut past = Deployment::new("user-1", "doomed12");
    past.transition(OpStatus::Deployed).unwrap();
    past.transition(OpStatus::Stopped).unwrap();
    past.suspend(Utc::now() - Duration::minutes(1));
    let past_id = past.id.clone();
    h.deployments.insert(past).await.unwrap();

    let mut future = Deployment::new("user-1", "spared12");
    future.transition(OpStatus::Deployed).unwrap();
    future.transition(OpStatus::Stopped).unwrap();
    future.suspend(Utc::now() + Duration::days(3));
    let future_id = future.id.clone();
    h.deployments.insert(future).await.unwrap();

    h.monitor.reap().await;

    assert!(h.deployments.get(&past_id).await.unwrap().is_none());
    assert!(h.deployments.get(&future_id).await.unwrap().is_some());
}

#[tokio::test]
async fn free_user_keeps_the_retained_allowance() {
    let h = harness();

    // Two deployments, no grants ever: the newest one is retained
    let older_id = seeded_deployment(&h, "user-1", "older123").await;
    let mut older = h.deployments.get(&older_id).await.unwrap().unwrap();
    older.created_at = Utc::now() - Duration::hours(2);
    h.deployments.update(older).await.unwrap();
    let newer_id = seeded_deployment(&h, "user-1", "newer123").await;

    h.monitor.enforce_limits("user-1").await.unwrap();

    let older = h.deployments.get(&older_id).await.unwrap().unwrap();
    let newer = h.deployments.get(&newer_id).await.unwrap().unwrap();
    assert!(older.is_suspended());
    assert!(!newer.is_suspended());
}

#[tokio::test]
async fn lapsed_subscriber_keeps_nothing() {
    let h = harness();
    h.grants.insert(grant("user-1", 2, 2, -1)).await.unwrap();

    let a = seeded_deployment(&h, "user-1", "paida123").await;
    let b = seeded_deployment(&h, "user-1", "paidb123").await;

    h.monitor.enforce_limits("user-1").await.unwrap();

    assert!(h.deployments.get(&a).await.unwrap().unwrap().is_suspended());
    assert!(h.deployments.get(&b).await.unwrap().unwrap().is_suspended());
}

#[tokio::test]
async fn deployments_mid_orchestration_are_skipped() {
    let h = harness();

    // Freshly created records are still `Deploying`
    let mut in_flight = Deployment::new("user-1", "wip12345");
    in_flight.roles.insert(
        RoleKind::Frontend,
        RoleState::new(
            "https://github.com/acme/shop".to_string(),
            4000,
            "wip12345-frontend".to_string(),
        ),
    );
    let id = in_flight.id.clone();
    h.deployments.insert(in_flight).await.unwrap();

    // Even with no entitlement, an in-flight deployment is left alone
    // for this pass
    let _ = seeded_deployment(&h, "user-1", "done1234").await;
    h.monitor.enforce_limits("user-1").await.unwrap();

    let d = h.deployments.get(&id).await.unwrap().unwrap();
    assert!(!d.is_suspended());
    assert_eq!(d.status, OpStatus::Deploying);
}

#[tokio::test]
async fn only_the_newest_usable_grant_survives_the_sweep() {
    let h = harness();
    let older = grant("user-1", 1, 1, 30);
    let mut newer = grant("user-1", 2, 2, 30);
    newer.created_at = older.created_at + Duration::minutes(5);
    let newer_id = newer.id.clone();
    h.grants.insert(older).await.unwrap();
    h.grants.insert(newer).await.unwrap();

    h.monitor.expire_grants("user-1").await.unwrap();

    let grants = h.grants.grants_for_user("user-1").await.unwrap();
    let usable: Vec<_> = grants
        .iter()
        .filter(|g| g.status == GrantStatus::Active)
        .collect();
    assert_eq!(usable.len(), 1);
    assert_eq!(usable[0].id, newer_id);
    assert!(grants
        .iter()
        .any(|g| g.status == GrantStatus::Canceled));
}

#[tokio::test]
async fn entitled_users_are_left_untouched() {
    let h = harness();
    h.grants.insert(grant("user-1", 1, 1, 30)).await.unwrap();
    let id = seeded_deployment(&h, "user-1", "happy123").await;

    h.monitor.sweep().await;

    let d = h.deployments.get(&id).await.unwrap().unwrap();
    assert_eq!(d.status, OpStatus::Deployed);
    assert!(!d.is_suspended());
    let warnings = h.monitor.get_warnings("user-1").await.unwrap();
    assert!(!warnings.has_warnings);
}
