//! Integration coverage for routing requests to issuers and inspecting their status.

// crates.io
use http::Request;
use issuer_cache::{
	CacheState, Error, IssuerConfig, IssuerDomain, IssuerManager, Result, RetryPolicy,
};
use wiremock::{
	Mock, MockServer, ResponseTemplate,
	matchers::{method, path},
};

fn jwks(kid: &str) -> serde_json::Value {
	serde_json::json!({
		"keys": [{ "kty": "oct", "kid": kid, "alg": "HS256", "k": "c2VjcmV0LWZvci1yb3V0aW5n" }]
	})
}

async fn issuer_server(kid: &str) -> MockServer {
	let server = MockServer::start().await;

	Mock::given(method("GET"))
		.and(path("/.well-known/openid-configuration"))
		.respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
			"issuer": server.uri(),
			"jwks_uri": format!("{}/jwks", server.uri()),
		})))
		.expect(1)
		.mount(&server)
		.await;
	Mock::given(method("GET"))
		.and(path("/jwks"))
		.respond_with(ResponseTemplate::new(200).set_body_json(jwks(kid)))
		.expect(1)
		.mount(&server)
		.await;

	server
}

fn config(issuers: &[&MockServer]) -> IssuerConfig {
	let addrs: Vec<String> = issuers.iter().map(|server| server.uri()).collect();

	IssuerConfig::new(addrs.join(" "))
		.with_retry_policy(RetryPolicy { max_retries: 0, ..RetryPolicy::default() })
}

#[tokio::test]
async fn routes_requests_by_issuer_domain_extension() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server_a = issuer_server("issuer-a").await;
	let server_b = issuer_server("issuer-b").await;
	let manager = IssuerManager::build(&config(&[&server_a, &server_b]))?;

	assert_eq!(manager.len(), 2);

	let mut request = Request::builder().uri("/api/resource").body(()).expect("request");

	request.extensions_mut().insert(IssuerDomain::new(format!("{}/realms/b", server_b.uri())));

	let routed = manager.resolve(&request)?;
	let keys = routed.get_verification_capability().await?;

	assert_eq!(keys.key_ids().collect::<Vec<_>>(), ["issuer-b"]);

	let unrouted = Request::builder().uri("/api/resource").body(()).expect("request");
	let fallback = manager.resolve(&unrouted)?;

	assert!(fallback.ptr_eq(manager.default_issuer().expect("default issuer")));

	let keys = fallback.get_verification_capability().await?;

	assert_eq!(keys.key_ids().collect::<Vec<_>>(), ["issuer-a"]);

	// Served from cache; the mocks expect a single fetch each.
	manager.resolve(&request)?.get_verification_capability().await?;
	manager.resolve(&unrouted)?.get_verification_capability().await?;

	server_a.verify().await;
	server_b.verify().await;

	Ok(())
}

#[tokio::test]
async fn warm_up_and_statuses_reflect_each_issuer() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let healthy = issuer_server("healthy").await;
	let broken = MockServer::start().await;

	Mock::given(method("GET"))
		.respond_with(ResponseTemplate::new(503))
		.mount(&broken)
		.await;

	let manager = IssuerManager::build(&config(&[&healthy, &broken]))?;

	assert_eq!(manager.warm().await, 1);

	let statuses = manager.statuses().await;
	let healthy_status = statuses
		.iter()
		.find(|status| status.domain_key == healthy.uri())
		.expect("healthy status");
	let broken_status =
		statuses.iter().find(|status| status.domain_key == broken.uri()).expect("broken status");

	assert_eq!(healthy_status.state, CacheState::Fresh);
	assert_eq!(healthy_status.key_count, 1);
	assert!(healthy_status.last_success.is_some());
	assert_eq!(broken_status.state, CacheState::Failed);
	assert_eq!(broken_status.error_count, 1);
	assert!(broken_status.last_error.as_deref().is_some_and(|err| err.contains("503")));

	let err = manager
		.resolve(&IssuerDomain::new(broken.uri()))?
		.get_verification_capability()
		.await
		.expect_err("issuer is down");

	assert!(matches!(err, Error::VerificationUnavailable { .. }));

	healthy.verify().await;

	Ok(())
}

#[tokio::test]
async fn unconfigured_manager_reports_no_issuer() -> Result<()> {
	let manager = IssuerManager::build(&IssuerConfig::new(""))?;
	let request = Request::builder().body(()).expect("request");

	assert!(manager.is_empty());
	assert!(matches!(manager.resolve(&request), Err(Error::NoIssuerConfigured { domain: None })));

	Ok(())
}

#[tokio::test]
async fn malformed_issuer_url_rejects_configuration() {
	let err = IssuerManager::build(&IssuerConfig::new("https://idp.example.com ://missing-scheme"))
		.expect_err("malformed issuer");

	assert!(matches!(err, Error::Configuration { .. }));
}
