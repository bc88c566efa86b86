use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::Router;
use envconfig::Envconfig;
use http_body_util::BodyExt;
use mystbin_limiter::bans::Ban;
use mystbin_limiter::config::{Config, LimitsFile};
use mystbin_limiter::create_app;
use mystbin_limiter::identity::TokenDecoder;
use mystbin_limiter::rate_limit_config::RateLimitConfig;
use mystbin_limiter::users::UserRecord;
use std::collections::HashMap;
use std::net::SocketAddr;
use tower::ServiceExt;

const ADMIN_TOKEN: &str = "admin-token";
const USER_TOKEN: &str = "user-token";

fn config(env: &[(&str, &str)]) -> Config {
    let env: HashMap<String, String> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Config::init_from_hashmap(&env).unwrap()
}

fn limits(zones: &[(&str, &str)]) -> LimitsFile {
    let mut all = vec![
        ("global", "100/minute"),
        ("postpastes", "100/minute"),
        ("getpaste", "100/minute"),
        ("deletepaste", "100/minute"),
        ("admin", "100/minute"),
    ];
    all.extend_from_slice(zones);

    LimitsFile {
        ratelimits: RateLimitConfig::from_strings(all).unwrap(),
        users: vec![
            UserRecord {
                id: 1,
                token: ADMIN_TOKEN.to_string(),
                admin: true,
                subscriber: false,
            },
            UserRecord {
                id: 2,
                token: USER_TOKEN.to_string(),
                admin: false,
                subscriber: false,
            },
        ],
        ..LimitsFile::default()
    }
}

fn app(zones: &[(&str, &str)]) -> Router {
    create_app(&config(&[]), &limits(zones)).unwrap()
}

fn post_paste(ip: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/pastes")
        .header("content-type", "application/json")
        .header("x-forwarded-for", ip);
    if let Some(token) = auth {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder
        .body(Body::from(
            serde_json::json!({ "filename": "main.rs", "content": "fn main() {}" }).to_string(),
        ))
        .unwrap()
}

fn request(method: &str, uri: &str, ip: &str, auth: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-forwarded-for", ip);
    if let Some(token) = auth {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

fn header<'a>(response: &'a Response<Body>, name: &str) -> &'a str {
    response
        .headers()
        .get(name)
        .unwrap_or_else(|| panic!("missing header {}", name))
        .to_str()
        .unwrap()
}

async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_route_quota_rejects_third_anonymous_post() {
    let app = app(&[("postpastes", "2/minute")]);

    assert_eq!(send(&app, post_paste("1.2.3.4", None)).await.status(), StatusCode::CREATED);
    assert_eq!(send(&app, post_paste("1.2.3.4", None)).await.status(), StatusCode::CREATED);

    let response = send(&app, post_paste("1.2.3.4", None)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, "x-ratelimit-available"), "0");
    assert_eq!(header(&response, "x-ratelimit-max"), "2");
    assert_eq!(header(&response, "x-ratelimit-used"), "3");
    assert_eq!(header(&response, "x-ratelimit-reset"), "0");
    assert_eq!(header(&response, "x-ratelimit-strategy"), "leakybucket");

    // A different address is unaffected.
    assert_eq!(send(&app, post_paste("5.6.7.8", None)).await.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_admin_is_exempt() {
    let app = app(&[("global", "1/minute"), ("postpastes", "2/minute")]);

    for _ in 0..3 {
        let response = send(&app, post_paste("1.2.3.4", Some(ADMIN_TOKEN))).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(header(&response, "x-ratelimit-used"), "0");
        assert_eq!(header(&response, "x-ratelimit-available"), "1");
        assert_eq!(header(&response, "x-global-ratelimit-used"), "0");
        assert_eq!(header(&response, "x-global-ratelimit-available"), "1");
        assert_eq!(header(&response, "x-ratelimit-strategy"), "ignore");
    }
}

#[tokio::test]
async fn test_route_quota_binds_before_global() {
    let app = app(&[("global", "5/minute"), ("postpastes", "2/minute")]);

    send(&app, post_paste("1.2.3.4", None)).await;
    send(&app, post_paste("1.2.3.4", None)).await;
    let response = send(&app, post_paste("1.2.3.4", None)).await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, "x-global-ratelimit-used"), "3");
    assert_eq!(header(&response, "x-global-ratelimit-available"), "2");
    assert_eq!(header(&response, "x-global-ratelimit-max"), "5");
    assert_eq!(header(&response, "x-ratelimit-available"), "0");
}

#[tokio::test]
async fn test_global_quota_rejects_with_default_route_headers() {
    let app = app(&[("global", "1/minute")]);

    let response = send(&app, request("GET", "/health", "1.2.3.4", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-global-ratelimit-used"), "1");

    let response = send(&app, post_paste("1.2.3.4", None)).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&response, "x-global-ratelimit-available"), "0");
    assert_eq!(header(&response, "x-ratelimit-used"), "0");
    assert_eq!(header(&response, "x-ratelimit-max"), "1");
    assert_eq!(header(&response, "x-ratelimit-available"), "1");
}

#[tokio::test]
async fn test_successful_response_carries_headers() {
    let app = app(&[("global", "5/minute"), ("postpastes", "2/minute")]);

    let response = send(&app, post_paste("1.2.3.4", None)).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(header(&response, "x-global-ratelimit-used"), "1");
    assert_eq!(header(&response, "x-global-ratelimit-available"), "4");
    assert_eq!(header(&response, "x-ratelimit-used"), "1");
    assert_eq!(header(&response, "x-ratelimit-available"), "1");
}

#[tokio::test]
async fn test_authed_tier_uses_override_and_user_identity() {
    let decoder = TokenDecoder::default();
    let alice = decoder.generate(41).unwrap();
    let bob = decoder.generate(42).unwrap();

    let mut limits = limits(&[("postpastes", "1/minute"), ("authed_postpastes", "2/minute")]);
    for (id, token) in [(41, &alice), (42, &bob)] {
        limits.users.push(UserRecord {
            id,
            token: token.clone(),
            admin: false,
            subscriber: false,
        });
    }
    let app = create_app(&config(&[]), &limits).unwrap();

    // Same address, but each user has their own authed bucket of 2.
    for token in [&alice, &alice, &bob, &bob] {
        let response = send(&app, post_paste("1.2.3.4", Some(token))).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(header(&response, "x-ratelimit-max"), "2");
    }
    let response = send(&app, post_paste("1.2.3.4", Some(&alice))).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    // The anonymous caller at that address is on the base quota.
    assert_eq!(send(&app, post_paste("1.2.3.4", None)).await.status(), StatusCode::CREATED);
    assert_eq!(
        send(&app, post_paste("1.2.3.4", None)).await.status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_banned_ip_is_rejected_before_quota() {
    let mut limits = limits(&[]);
    limits.bans.push(Ban {
        ip: Some("6.6.6.6".to_string()),
        user_id: None,
        reason: Some("spam".to_string()),
    });
    let app = create_app(&config(&[]), &limits).unwrap();

    let response = send(&app, post_paste("6.6.6.6", None)).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.headers().get("x-global-ratelimit-used").is_none());

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"Banned from this service: spam");
}

#[tokio::test]
async fn test_admin_ban_lifecycle() {
    let app = app(&[]);

    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/admin/bans")
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", ADMIN_TOKEN))
            .body(Body::from(
                serde_json::json!({ "ip": "7.7.7.7", "reason": "abuse" }).to_string(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    assert_eq!(
        send(&app, post_paste("7.7.7.7", None)).await.status(),
        StatusCode::FORBIDDEN
    );

    let response = send(&app, request("GET", "/admin/bans", "1.2.3.4", Some(ADMIN_TOKEN))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["count"], 1);

    let response = send(
        &app,
        request("DELETE", "/admin/bans?ip=7.7.7.7", "1.2.3.4", Some(ADMIN_TOKEN)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    assert_eq!(send(&app, post_paste("7.7.7.7", None)).await.status(), StatusCode::CREATED);

    let response = send(
        &app,
        request("DELETE", "/admin/bans?ip=7.7.7.7", "1.2.3.4", Some(ADMIN_TOKEN)),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_admin_endpoints_require_admin() {
    let app = app(&[]);

    let response = send(&app, request("GET", "/admin/bans", "1.2.3.4", None)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = send(&app, request("GET", "/admin/bans", "1.2.3.4", Some(USER_TOKEN))).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    // Non-admins are still charged the admin zone.
    assert_eq!(header(&response, "x-ratelimit-used"), "1");
}

#[tokio::test]
async fn test_invalid_ban_payload() {
    let app = app(&[]);
    let response = send(
        &app,
        Request::builder()
            .method("POST")
            .uri("/admin/bans")
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", ADMIN_TOKEN))
            .body(Body::from(serde_json::json!({ "reason": "who?" }).to_string()))
            .unwrap(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_paste_round_trip() {
    let app = app(&[]);

    let created = body_json(send(&app, post_paste("1.2.3.4", None)).await).await;
    let id = created["id"].as_str().unwrap().to_string();

    let response = send(&app, request("GET", &format!("/pastes/{}", id), "1.2.3.4", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["content"], "fn main() {}");

    let response = send(&app, request("DELETE", &format!("/pastes/{}", id), "1.2.3.4", None)).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&app, request("GET", &format!("/pastes/{}", id), "1.2.3.4", None)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unreachable_store_fails_open() {
    let config = config(&[
        ("RATELIMIT_BACKEND", "external"),
        ("REDIS_URL", "redis://127.0.0.1:1"),
    ]);
    let app = create_app(&config, &limits(&[("global", "1/minute"), ("postpastes", "1/minute")]))
        .unwrap();

    for _ in 0..3 {
        let response = send(&app, post_paste("1.2.3.4", None)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(header(&response, "x-ratelimit-strategy"), "window");
        assert_eq!(header(&response, "x-global-ratelimit-used"), "0");
    }

    let response = send(&app, request("GET", "/ready", "1.2.3.4", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["store"], "disconnected");
}

#[tokio::test]
async fn test_configuration_errors_fail_at_startup() {
    let limits = LimitsFile {
        ratelimits: RateLimitConfig::from_strings([("global", "5/minute")]).unwrap(),
        ..LimitsFile::default()
    };
    assert!(create_app(&config(&[]), &limits).is_err());
}

#[tokio::test]
async fn test_health_and_metrics() {
    let app = app(&[("postpastes", "1/minute")]);
    send(&app, post_paste("1.2.3.4", None)).await;
    send(&app, post_paste("1.2.3.4", None)).await;

    let response = send(&app, request("GET", "/health", "1.2.3.4", None)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let health = body_json(response).await;
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["dependencies"]["bucket_store"]["backend"], "memory");

    let metrics = body_json(send(&app, request("GET", "/metrics", "9.9.9.9", None)).await).await;
    assert_eq!(metrics["zones"]["postpastes"]["admitted_requests"], 1);
    assert_eq!(metrics["zones"]["postpastes"]["throttled_requests"], 1);
}

#[tokio::test]
async fn test_peer_address_identity_over_tcp() {
    let app = app(&[("postpastes", "1/minute")]);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    let client = reqwest::Client::new();
    let url = format!("http://{}/pastes", addr);
    let body = serde_json::json!({ "content": "hello" });

    let first = client.post(&url).json(&body).send().await.unwrap();
    assert_eq!(first.status().as_u16(), 201);

    let second = client.post(&url).json(&body).send().await.unwrap();
    assert_eq!(second.status().as_u16(), 429);
    assert_eq!(
        second.headers()["x-ratelimit-available"].to_str().unwrap(),
        "0"
    );
}
