//! Service probes against in-process servers
//!
//! These tests verify that:
//! - A Redis server answering PING is healthy and reports its version
//! - A PING failure is unhealthy and carries the server's error
//! - A PING answered with anything but PONG, or not at all, is unhealthy
//! - Oversized replies are rejected instead of being allocated
//! - A closed port is unhealthy for every service type
//! - Protocol steps are bounded by the probe timeout

use std::time::Duration;

use assert_matches::assert_matches;
use instancehub::probes::{
    HealthStatus, KeyTtl, ProbeRegistry, RedisClient, RedisOptions, RedisProbe, ServiceProbe,
    ServiceTarget, TcpProbe, UnavailableClientProbe,
};

use crate::helpers::{FakeRedis, RedisBehavior, closed_port, open_port};

const TIMEOUT: Duration = Duration::from_secs(2);

fn local(service: &str, port: u16) -> ServiceTarget {
    ServiceTarget::new(service, "127.0.0.1").with_port(port)
}

#[tokio::test]
async fn test_redis_healthy_reports_version() {
    let server = FakeRedis::healthy("7.2.4").await;

    let verdict = RedisProbe::default()
        .check(&local("redis", server.port), TIMEOUT)
        .await;

    assert_eq!(verdict.status, HealthStatus::Healthy);
    assert!(verdict.protocol_verified);
    assert_eq!(verdict.detail, "Redis 7.2.4 responding");
}

#[tokio::test]
async fn test_redis_ping_failure_carries_raw_error() {
    let server = FakeRedis::start(RedisBehavior::PingError(
        "NOAUTH Authentication required.".to_string(),
    ))
    .await;

    let verdict = RedisProbe::default()
        .check(&local("redis", server.port), TIMEOUT)
        .await;

    assert_eq!(verdict.status, HealthStatus::Unhealthy);
    assert!(
        verdict.detail.contains("NOAUTH Authentication required."),
        "detail was {:?}",
        verdict.detail
    );
}

#[tokio::test]
async fn test_redis_non_pong_reply_is_unhealthy() {
    let server = FakeRedis::start(RedisBehavior::PingReply("+OK\r\n".to_string())).await;

    let verdict = RedisProbe::default()
        .check(&local("redis", server.port), TIMEOUT)
        .await;

    assert_eq!(verdict.status, HealthStatus::Unhealthy);
    assert_eq!(verdict.detail, "Redis not responding to ping");
}

#[tokio::test]
async fn test_redis_connection_closed_is_unhealthy() {
    let server = FakeRedis::start(RedisBehavior::CloseOnConnect).await;

    let verdict = RedisProbe::default()
        .check(&local("redis", server.port), TIMEOUT)
        .await;

    assert_eq!(verdict.status, HealthStatus::Unhealthy);
    assert!(verdict.detail.starts_with("Redis error"), "{}", verdict.detail);
}

#[tokio::test]
async fn test_redis_oversized_reply_is_unhealthy() {
    for header in ["*4611686018427387904\r\n", "$9223372036854775807\r\n"] {
        let server = FakeRedis::start(RedisBehavior::PingReply(header.to_string())).await;

        let verdict = RedisProbe::default()
            .check(&local("redis", server.port), TIMEOUT)
            .await;

        assert_eq!(verdict.status, HealthStatus::Unhealthy, "{header:?}");
        assert!(verdict.detail.contains("exceeds the limit"), "{}", verdict.detail);
    }
}

#[tokio::test]
async fn test_redis_silent_server_times_out() {
    let server = FakeRedis::start(RedisBehavior::Silent).await;

    let started = tokio::time::Instant::now();
    let verdict = RedisProbe::default()
        .check(&local("redis", server.port), Duration::from_millis(300))
        .await;

    assert_eq!(verdict.status, HealthStatus::Unhealthy);
    assert!(verdict.detail.contains("timed out"));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_closed_port_unhealthy_for_every_service() {
    let port = closed_port().await;
    let registry = ProbeRegistry::default();

    for service in ["redis", "postgresql", "mysql", "mongodb", "elasticsearch"] {
        let verdict = registry
            .probe_for(service)
            .check(&local(service, port), TIMEOUT)
            .await;

        assert_eq!(verdict.status, HealthStatus::Unhealthy, "{service}");
        assert_eq!(verdict.detail, format!("Port {port} is not accessible"));
    }
}

#[tokio::test]
async fn test_registered_stubs_degrade_on_open_port() {
    let (_listener, port) = open_port().await;
    let registry = ProbeRegistry::default();

    for service in ["postgresql", "postgres", "mysql", "mongodb"] {
        let verdict = registry
            .probe_for(service)
            .check(&local(service, port), TIMEOUT)
            .await;

        assert!(verdict.is_healthy(), "{service}");
        assert!(!verdict.protocol_verified, "{service}");
        assert!(verdict.detail.contains("protocol check skipped"));
    }

    let generic = TcpProbe.check(&local("memcached", port), TIMEOUT).await;
    assert!(generic.protocol_verified);

    let stub = UnavailableClientProbe::new("MongoDB driver");
    assert_eq!(stub.client(), "MongoDB driver");
}

#[tokio::test]
async fn test_redis_client_inspection() {
    let server = FakeRedis::healthy("7.0.0").await;
    server.insert("session:1", "alice", Some(30));
    server.insert("session:2", "bob", None);
    server.insert("other", "x", None);

    let mut client = RedisClient::connect(&RedisOptions::new("127.0.0.1", server.port))
        .await
        .unwrap();

    assert!(client.ping().await.unwrap());
    assert_eq!(client.server_version().await.unwrap(), "7.0.0");
    assert_eq!(client.total_keys(0).await.unwrap(), 3);

    let keys = client.keys("session:*", 10).await.unwrap();
    assert_eq!(keys, vec!["session:1", "session:2"]);
    assert_eq!(client.keys("*", 1).await.unwrap().len(), 1);

    assert_eq!(client.key_type("session:1").await.unwrap(), "string");
    assert_matches!(
        client.ttl("session:1").await.unwrap(),
        KeyTtl::Expires(ttl) if ttl.as_secs() == 30
    );
    assert_eq!(client.ttl("session:2").await.unwrap(), KeyTtl::NoExpiry);
    assert_eq!(client.ttl("missing").await.unwrap(), KeyTtl::NotFound);
}

#[tokio::test]
async fn test_redis_client_writes() {
    let server = FakeRedis::healthy("7.0.0").await;
    let mut client = RedisClient::connect(&RedisOptions::new("127.0.0.1", server.port))
        .await
        .unwrap();

    client.set("greeting", "hello", None).await.unwrap();
    client
        .set("token", "abc", Some(Duration::from_secs(60)))
        .await
        .unwrap();

    assert_eq!(client.get("greeting").await.unwrap().as_deref(), Some("hello"));
    assert_eq!(
        client.ttl("token").await.unwrap(),
        KeyTtl::Expires(Duration::from_secs(60))
    );

    assert!(client.delete("greeting").await.unwrap());
    assert!(!client.delete("greeting").await.unwrap());
    assert_eq!(client.get("greeting").await.unwrap(), None);
}
