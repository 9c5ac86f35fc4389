//! Integration tests for the interval HTTP server

#[cfg(feature = "server")]
mod server_tests {
    use heartbeat_intervals::server::{run, ServerConfig, ServerHandle};
    use std::net::SocketAddr;
    use std::time::Duration;

    const GAP: i64 = 60;

    fn local_config(dir: &tempfile::TempDir) -> ServerConfig {
        // Random port on loopback, store in a fresh directory
        ServerConfig::new(0, dir.path().join("intervals"), GAP).with_host("127.0.0.1")
    }

    async fn start_with(config: ServerConfig) -> (SocketAddr, ServerHandle) {
        let server = run(config).await.expect("Failed to start server");

        // Give server time to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        (server.addr(), server)
    }

    async fn start() -> (tempfile::TempDir, SocketAddr, ServerHandle) {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let (addr, server) = start_with(local_config(&dir)).await;
        (dir, addr, server)
    }

    async fn post_heartbeat(
        client: &reqwest::Client,
        addr: SocketAddr,
        body: serde_json::Value,
    ) -> reqwest::Response {
        client
            .post(format!("http://{}/heartbeat", addr))
            .json(&body)
            .send()
            .await
            .expect("Failed to send request")
    }

    async fn get_json(client: &reqwest::Client, url: String) -> serde_json::Value {
        let response = client.get(url).send().await.expect("Failed to send request");
        assert!(response.status().is_success(), "{}", response.status());
        response.json().await.expect("Failed to parse JSON")
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_dir, addr, server) = start().await;

        let client = reqwest::Client::new();
        let body = get_json(&client, format!("http://{}/health", addr)).await;
        assert_eq!(body["status"], "ok");
        assert!(body["version"].as_str().is_some());

        server.shutdown().await.expect("Server did not stop cleanly");
    }

    #[tokio::test]
    async fn test_heartbeat_round_trip() {
        let (_dir, addr, server) = start().await;
        let client = reqwest::Client::new();

        for ts in [0, 30, 45] {
            let response = post_heartbeat(
                &client,
                addr,
                serde_json::json!({"g": "g1", "u": "u1", "d": "d1", "ts": ts}),
            )
            .await;
            assert!(response.status().is_success());
        }

        let response = post_heartbeat(
            &client,
            addr,
            serde_json::json!({"g": "g1", "u": "u1", "d": "d1", "ts": 200}),
        )
        .await;
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["status"], "ok");
        assert_eq!(body["outcome"], "split");
        assert_eq!(body["interval"]["tsStart"], 200);
        assert_eq!(body["interval"]["g"], "g1");

        let all = get_json(&client, format!("http://{}/all", addr)).await;
        let all = all.as_array().expect("Expected an array");
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["tsStart"], 0);
        assert_eq!(all[0]["tsEnd"], 45);

        let active = get_json(&client, format!("http://{}/active", addr)).await;
        let active = active.as_array().expect("Expected an array");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0]["tsStart"], 200);
        assert_eq!(active[0]["tsEnd"], 200);

        // Lookup by id returns the same record
        let id = active[0]["id"].as_str().expect("Missing id").to_string();
        let found = get_json(&client, format!("http://{}/interval/{}", addr, id)).await;
        assert_eq!(found, active[0]);

        let entity = get_json(&client, format!("http://{}/entity/g1/u1/d1", addr)).await;
        assert_eq!(entity.as_array().map(Vec::len), Some(2));

        let stats = get_json(&client, format!("http://{}/stats", addr)).await;
        assert_eq!(stats["heartbeats"], 4);
        assert_eq!(stats["split"], 1);

        server.shutdown().await.expect("Server did not stop cleanly");
    }

    #[tokio::test]
    async fn test_unknown_interval_is_not_found() {
        let (_dir, addr, server) = start().await;

        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/interval/does-not-exist", addr))
            .send()
            .await
            .expect("Failed to send request");

        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "NOT_FOUND");

        server.shutdown().await.expect("Server did not stop cleanly");
    }

    #[tokio::test]
    async fn test_invalid_heartbeat_rejected() {
        let (_dir, addr, server) = start().await;
        let client = reqwest::Client::new();

        let response = post_heartbeat(
            &client,
            addr,
            serde_json::json!({"g": "", "u": "u1", "d": "d1", "ts": 5}),
        )
        .await;
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(body["code"], "INVALID_HEARTBEAT");

        let all = get_json(&client, format!("http://{}/all", addr)).await;
        assert_eq!(all.as_array().map(Vec::len), Some(0));

        server.shutdown().await.expect("Server did not stop cleanly");
    }

    #[tokio::test]
    async fn test_malformed_heartbeat_body_is_json_error() {
        let (_dir, addr, server) = start().await;
        let client = reqwest::Client::new();

        let bodies = [
            serde_json::json!({"u": "u1", "d": "d1", "ts": 5}),
            serde_json::json!({"g": "g1", "u": "u1", "d": "d1", "ts": "soon"}),
        ];
        for body in bodies {
            let response = post_heartbeat(&client, addr, body).await;
            assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
            let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
            assert_eq!(body["code"], "INVALID_HEARTBEAT");
            assert!(body["error"].as_str().is_some());
        }

        server.shutdown().await.expect("Server did not stop cleanly");
    }

    #[tokio::test]
    async fn test_shutdown_persists_stats() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let stats_path = dir.path().join("stats.json");
        let (addr, server) =
            start_with(local_config(&dir).with_stats_path(stats_path.clone())).await;

        let client = reqwest::Client::new();
        for ts in [0, 10] {
            let response = post_heartbeat(
                &client,
                addr,
                serde_json::json!({"g": "g1", "u": "u1", "d": "d1", "ts": ts}),
            )
            .await;
            assert!(response.status().is_success());
        }
        drop(client);

        // Returns only after the serve task has finished.
        server.shutdown().await.expect("Server did not stop cleanly");

        let content = std::fs::read_to_string(&stats_path).expect("Stats were not saved");
        let saved: serde_json::Value = serde_json::from_str(&content).expect("Invalid stats file");
        assert_eq!(saved["heartbeats"], 2);
        assert_eq!(saved["created"], 1);
        assert_eq!(saved["extended"], 1);
    }

    #[tokio::test]
    async fn test_sweep_endpoint() {
        let (_dir, addr, server) = start().await;
        let client = reqwest::Client::new();

        post_heartbeat(
            &client,
            addr,
            serde_json::json!({"g": "g1", "u": "u1", "d": "d1", "ts": 0}),
        )
        .await;

        let response = client
            .post(format!("http://{}/sweep?now=1000", addr))
            .send()
            .await
            .expect("Failed to send request");
        assert!(response.status().is_success());
        let report: serde_json::Value = response.json().await.expect("Failed to parse JSON");
        assert_eq!(report["scanned"], 1);
        assert_eq!(report["closed"].as_array().map(Vec::len), Some(1));

        let active = get_json(&client, format!("http://{}/active", addr)).await;
        assert_eq!(active.as_array().map(Vec::len), Some(0));

        server.shutdown().await.expect("Server did not stop cleanly");
    }

    #[tokio::test]
    async fn test_cors_allows_remote_origin_by_default() {
        let (_dir, addr, server) = start().await;

        let client = reqwest::Client::new();
        let response = client
            .request(reqwest::Method::OPTIONS, format!("http://{}/heartbeat", addr))
            .header("Origin", "https://devices.example.com")
            .header("Access-Control-Request-Method", "POST")
            .send()
            .await
            .expect("Failed to send request");

        assert!(response.status().is_success());
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );

        server.shutdown().await.expect("Server did not stop cleanly");
    }

    #[tokio::test]
    async fn test_cors_respects_configured_origins() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = local_config(&dir)
            .with_cors_origins(vec!["https://devices.example.com".to_string()]);
        let (addr, server) = start_with(config).await;

        let client = reqwest::Client::new();
        let preflight = |origin: &'static str| {
            client
                .request(reqwest::Method::OPTIONS, format!("http://{}/heartbeat", addr))
                .header("Origin", origin)
                .header("Access-Control-Request-Method", "POST")
                .send()
        };

        let allowed = preflight("https://devices.example.com")
            .await
            .expect("Failed to send request");
        assert_eq!(
            allowed
                .headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("https://devices.example.com")
        );

        let denied = preflight("https://elsewhere.example.com")
            .await
            .expect("Failed to send request");
        assert!(denied.headers().get("access-control-allow-origin").is_none());

        server.shutdown().await.expect("Server did not stop cleanly");
    }

    #[tokio::test]
    async fn test_cors_headers() {
        let (_dir, addr, server) = start().await;

        // Send OPTIONS request to check CORS
        let client = reqwest::Client::new();
        let response = client
            .request(reqwest::Method::OPTIONS, format!("http://{}/heartbeat", addr))
            .header("Origin", "http://localhost")
            .header("Access-Control-Request-Method", "POST")
            .send()
            .await
            .expect("Failed to send request");

        // CORS preflight should succeed
        assert!(
            response.status().is_success() || response.status() == reqwest::StatusCode::NO_CONTENT,
            "CORS preflight failed: {}",
            response.status()
        );

        server.shutdown().await.expect("Server did not stop cleanly");
    }
}
