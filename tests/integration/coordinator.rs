//! HealthCheckCoordinator across mixed services
//!
//! These tests verify that:
//! - Every requested service gets exactly one verdict, in input order
//! - Unknown services and hostile servers never abort the batch
//! - Verdicts stream to the observer in order

use std::time::Duration;

use instancehub::probes::{
    HealthCheckCoordinator, HealthStatus, ProbeRegistry, RedisProbe, ServiceTarget,
};
use pretty_assertions::assert_eq;

use crate::helpers::{FakeRedis, RedisBehavior, closed_port};

#[tokio::test]
async fn test_check_all_known_and_unknown() {
    let coordinator = HealthCheckCoordinator::default().with_timeout(Duration::from_secs(1));

    let report = coordinator.check_all(["redis", "unknownsvc"], "127.0.0.1").await;

    let names: Vec<_> = report.iter().map(|(name, _)| name).collect();
    assert_eq!(names, vec!["redis", "unknownsvc"]);

    let unknown = report.get("unknownsvc").unwrap();
    assert_eq!(unknown.status, HealthStatus::Unhealthy);
    assert_eq!(unknown.detail, "Unknown service or port not specified");
}

#[tokio::test]
async fn test_mixed_batch_against_fakes() {
    let redis = FakeRedis::healthy("6.2.14").await;
    let closed = closed_port().await;

    let mut registry = ProbeRegistry::default();
    registry.register("redis", RedisProbe::new(None, 0));
    let coordinator = HealthCheckCoordinator::new(registry)
        .with_timeout(Duration::from_secs(2))
        .with_parallelism(2);

    let mut seen = vec![];
    let report = coordinator
        .check_targets_with(
            vec![
                ServiceTarget::new("mysql", "127.0.0.1").with_port(closed),
                ServiceTarget::new("redis", "127.0.0.1").with_port(redis.port),
                ServiceTarget::new("unknownsvc", "127.0.0.1"),
            ],
            |name, verdict| seen.push((name.to_string(), verdict.status)),
        )
        .await;

    assert_eq!(
        seen,
        vec![
            ("mysql".to_string(), HealthStatus::Unhealthy),
            ("redis".to_string(), HealthStatus::Healthy),
            ("unknownsvc".to_string(), HealthStatus::Unhealthy),
        ]
    );
    assert_eq!(report.get("redis").unwrap().detail, "Redis 6.2.14 responding");
    assert!(!report.all_healthy());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["redis"]["status"], "healthy");
    assert_eq!(json["mysql"]["detail"], format!("Port {closed} is not accessible"));
}

#[tokio::test]
async fn test_hostile_redis_reply_keeps_the_batch() {
    let hostile =
        FakeRedis::start(RedisBehavior::PingReply("*4611686018427387904\r\n".to_string())).await;

    let coordinator = HealthCheckCoordinator::default().with_timeout(Duration::from_secs(2));
    let report = coordinator
        .check_targets(vec![
            ServiceTarget::new("redis", "127.0.0.1").with_port(hostile.port),
            ServiceTarget::new("unknownsvc", "127.0.0.1"),
        ])
        .await;

    assert_eq!(report.len(), 2);
    assert_eq!(report.get("redis").unwrap().status, HealthStatus::Unhealthy);
    assert_eq!(
        report.get("unknownsvc").unwrap().detail,
        "Unknown service or port not specified"
    );
}
