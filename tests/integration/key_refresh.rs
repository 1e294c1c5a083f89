//! Integration tests for key fetching, refresh, and token verification over HTTP.

// std
use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};
// crates.io
use issuer_cache::{
	CacheState, Error, IssuerConfig, IssuerDomain, IssuerManager, Result, RetryPolicy,
};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use wiremock::{
	Mock, MockServer, Request, ResponseTemplate,
	matchers::{method, path},
};

const HMAC_SECRET: &[u8] = b"issuer-cache-test-secret-0123456789abcdefghij";
const HMAC_K: &str = "aXNzdWVyLWNhY2hlLXRlc3Qtc2VjcmV0LTAxMjM0NTY3ODlhYmNkZWZnaGlq";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
	iss: String,
	sub: String,
	exp: i64,
}

fn jwks(kid: &str) -> serde_json::Value {
	serde_json::json!({ "keys": [{ "kty": "oct", "kid": kid, "alg": "HS256", "k": HMAC_K }] })
}

async fn mount_discovery(server: &MockServer, issuer: String) {
	Mock::given(method("GET"))
		.and(path("/.well-known/openid-configuration"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"issuer": issuer,
			"jwks_uri": format!("{}/jwks", server.uri()),
		})))
		.mount(server)
		.await;
}

fn config(server: &MockServer) -> IssuerConfig {
	IssuerConfig::new(server.uri())
		.with_retry_policy(RetryPolicy { max_retries: 0, ..RetryPolicy::default() })
}

fn token(kid: &str, iss: &str) -> String {
	let mut header = Header::new(Algorithm::HS256);

	header.kid = Some(kid.into());

	let claims = Claims {
		iss: iss.into(),
		sub: "user-1".into(),
		exp: chrono::Utc::now().timestamp() + 600,
	};

	jsonwebtoken::encode(&header, &claims, &EncodingKey::from_secret(HMAC_SECRET)).expect("token")
}

#[tokio::test]
async fn caches_keys_after_initial_fetch() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/.well-known/openid-configuration"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"issuer": format!("{}/", server.uri()),
			"jwks_uri": format!("{}/jwks", server.uri()),
		})))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/jwks"))
		.respond_with(ResponseTemplate::new(200).set_body_json(jwks("primary")))
		.expect(1)
		.mount(&server)
		.await;

	let manager = IssuerManager::build(&config(&server))?;
	let cache = manager.resolve(&IssuerDomain::new(server.uri()))?;
	let first = cache.get_verification_capability().await?;
	let second = cache.get_verification_capability().await?;

	assert_eq!(first.len(), 1);
	assert!(first.ptr_eq(&second));
	assert_eq!(cache.state().await, CacheState::Fresh);

	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn refresh_after_ttl_replaces_keys() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let served = Arc::new(AtomicUsize::new(0));
	let counter = served.clone();

	mount_discovery(&server, server.uri()).await;
	Mock::given(method("GET"))
		.and(path("/jwks"))
		.respond_with(move |_: &Request| {
			let kid = if counter.fetch_add(1, Ordering::SeqCst) == 0 { "v1" } else { "v2" };

			ResponseTemplate::new(200).set_body_json(jwks(kid))
		})
		.mount(&server)
		.await;

	let manager =
		IssuerManager::build(&config(&server).with_cache_ttl(Duration::from_millis(300)))?;
	let cache = manager.default_issuer().expect("default issuer");
	let first = cache.get_verification_capability().await?;

	assert_eq!(first.key_ids().collect::<Vec<_>>(), ["v1"]);

	tokio::time::sleep(Duration::from_millis(400)).await;

	assert_eq!(cache.state().await, CacheState::Stale);

	let stale = cache.get_verification_capability().await?;

	assert!(stale.ptr_eq(&first), "stale keys are served while revalidating");

	let refreshed = cache.refresh().await?;

	assert_eq!(refreshed.key_ids().collect::<Vec<_>>(), ["v2"]);
	assert_eq!(
		cache.get_verification_capability().await?.key_ids().collect::<Vec<_>>(),
		["v2"]
	);
	assert!(served.load(Ordering::SeqCst) >= 2);

	Ok(())
}

#[tokio::test]
async fn verifies_tokens_of_the_resolved_issuer() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	mount_discovery(&server, server.uri()).await;
	Mock::given(method("GET"))
		.and(path("/jwks"))
		.respond_with(ResponseTemplate::new(200).set_body_json(jwks("signing")))
		.mount(&server)
		.await;

	let manager = IssuerManager::build(&config(&server))?;
	let cache = manager.resolve(&IssuerDomain::new(server.uri()))?;
	let data = cache.verify::<Claims>(&token("signing", &server.uri()), &[]).await?;

	assert_eq!(data.claims.sub, "user-1");
	assert!(matches!(
		cache.verify::<Claims>(&token("signing", "https://other.example.com"), &[]).await,
		Err(Error::Jsonwebtoken(_))
	));
	assert!(matches!(
		cache.verify::<Claims>(&token("rotated", &server.uri()), &[]).await,
		Err(Error::KeyNotFound { kid: Some(_) })
	));

	Ok(())
}

#[tokio::test]
async fn discovery_issuer_mismatch_leaves_cache_failed() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	mount_discovery(&server, "https://impostor.example.com".into()).await;

	let manager = IssuerManager::build(&config(&server))?;
	let cache = manager.default_issuer().expect("default issuer");
	let err = cache.get_verification_capability().await.expect_err("mismatched issuer");

	match err {
		Error::VerificationUnavailable { source, .. } =>
			assert!(matches!(*source, Error::Discovery { .. }), "unexpected source {source}"),
		other => panic!("expected VerificationUnavailable, got {other:?}"),
	}

	assert_eq!(cache.state().await, CacheState::Failed);

	Ok(())
}

#[tokio::test]
async fn upstream_errors_surface_as_unavailable() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;

	mount_discovery(&server, server.uri()).await;
	Mock::given(method("GET"))
		.and(path("/jwks"))
		.respond_with(ResponseTemplate::new(500).set_body_string("boom"))
		.expect(1)
		.mount(&server)
		.await;

	let manager = IssuerManager::build(&config(&server))?;
	let cache = manager.default_issuer().expect("default issuer");

	for _ in 0..3 {
		let err = cache.get_verification_capability().await.expect_err("upstream failure");

		match err {
			Error::VerificationUnavailable { source, .. } =>
				assert!(source.is_fetch_error(), "unexpected source {source}"),
			other => panic!("expected VerificationUnavailable, got {other:?}"),
		}
	}

	// Repeated lookups inside the failure cooldown do not hit the issuer again.
	server.verify().await;

	Ok(())
}

#[tokio::test]
async fn oversized_documents_are_rejected() -> Result<()> {
	let server = MockServer::start().await;

	mount_discovery(&server, server.uri()).await;

	let mut config = config(&server);

	config.max_response_bytes = 16;

	let manager = IssuerManager::build(&config)?;
	let err = manager
		.default_issuer()
		.expect("default issuer")
		.refresh()
		.await
		.expect_err("size guard");

	match err {
		Error::Refresh { source, .. } => assert!(
			matches!(*source, Error::Validation { field: "max_response_bytes", .. }),
			"unexpected source {source}"
		),
		other => panic!("expected Refresh, got {other:?}"),
	}

	Ok(())
}

#[tokio::test]
async fn oversized_error_bodies_are_truncated() -> Result<()> {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/.well-known/openid-configuration"))
		.respond_with(ResponseTemplate::new(500).set_body_string("e".repeat(4 * 1024 * 1024)))
		.mount(&server)
		.await;

	let mut config = config(&server);

	config.max_response_bytes = 16;

	let manager = IssuerManager::build(&config)?;

	assert_eq!(manager.warm().await, 0);

	let statuses = manager.statuses().await;
	let last_error = statuses[0].last_error.as_deref().expect("recorded failure");

	assert!(last_error.contains("500"), "unexpected error {last_error}");
	assert!(last_error.len() < 1024, "error body kept {} bytes", last_error.len());

	Ok(())
}
