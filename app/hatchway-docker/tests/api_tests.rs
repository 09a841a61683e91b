//! Integration tests for Docker API handlers.
//!
//! These tests drive the router in process against the host-process
//! runtime, so every container is a real child process.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use bytes::BytesMut;
use hatchway_core::{ContainerDefinition, ContainerProvider, ContainerStatus, LocalRuntime, StreamConfig};
use hatchway_docker::stream::frame::{self, Frame, StreamType};
use hatchway_docker::{create_router, AppState};
use http_body_util::BodyExt;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::time::{timeout, Duration};
use tower::ServiceExt;

struct TestEnv {
    app: Router,
    state: AppState,
    runtime: LocalRuntime,
    _tmp: TempDir,
}

impl TestEnv {
    fn new(containers: &[(&str, &[&str], bool)]) -> Self {
        let tmp = TempDir::new().expect("Failed to create temp dir");
        let runtime = LocalRuntime::new(tmp.path());
        for (id, cmd, tty) in containers {
            runtime
                .register(ContainerDefinition {
                    id: (*id).to_string(),
                    cmd: cmd.iter().map(ToString::to_string).collect(),
                    tty: *tty,
                    autostart: false,
                })
                .expect("Failed to register container");
        }
        let stream = StreamConfig {
            log_poll_ms: 20,
            ..StreamConfig::default()
        };
        let state = AppState::new(Arc::new(runtime.clone()), stream);
        Self {
            app: create_router(state.clone()),
            state,
            runtime,
            _tmp: tmp,
        }
    }

    async fn send(&self, request: Request<Body>) -> Response {
        self.app.clone().oneshot(request).await.unwrap()
    }

    async fn get(&self, uri: &str) -> Response {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post(&self, uri: &str, body: &str) -> Response {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn create_exec(&self, container: &str, body: &str) -> String {
        let response = self
            .post(&format!("/containers/{container}/exec"), body)
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let json = body_json(response).await;
        json["Id"].as_str().unwrap().to_string()
    }
}

async fn body_bytes(response: Response) -> bytes::Bytes {
    timeout(Duration::from_secs(10), response.into_body().collect())
        .await
        .expect("stream did not end")
        .unwrap()
        .to_bytes()
}

async fn body_json(response: Response) -> serde_json::Value {
    let body = body_bytes(response).await;
    serde_json::from_slice(&body).unwrap()
}

fn decode_all(bytes: &[u8]) -> Vec<Frame> {
    let mut buf = BytesMut::from(bytes);
    let mut frames = Vec::new();
    while let Some(frame) = frame::decode(&mut buf).unwrap() {
        frames.push(frame);
    }
    assert!(buf.is_empty(), "truncated frame at end of stream");
    frames
}

fn stream_text(frames: &[Frame], stream: StreamType) -> String {
    frames
        .iter()
        .filter(|f| f.stream == stream)
        .map(|f| String::from_utf8_lossy(&f.payload).to_string())
        .collect()
}

async fn wait_until_gone(env: &TestEnv, exec_id: &str) {
    for _ in 0..100 {
        if env.state.exec_sessions.get(exec_id).is_none() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("exec session {exec_id} was never removed");
}

// ============================================================================
// System API Tests
// ============================================================================

#[tokio::test]
async fn test_ping() {
    let env = TestEnv::new(&[]);

    let response = env.get("/_ping").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("Api-Version").unwrap(), "1.43");
    assert_eq!(&body_bytes(response).await[..], b"OK");

    let response = env
        .send(
            Request::builder()
                .method("HEAD")
                .uri("/_ping")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_version() {
    let env = TestEnv::new(&[]);

    let response = env.get("/version").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["ApiVersion"], "1.43");
    assert_eq!(json["MinAPIVersion"], "1.24");
    assert!(json["Version"].is_string());
}

#[tokio::test]
async fn test_versioned_paths() {
    let env = TestEnv::new(&[]);

    for uri in ["/v1.24/_ping", "/v1.41/_ping", "/v1.43/version"] {
        let response = env.get(uri).await;
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
    }
}

#[tokio::test]
async fn test_unknown_endpoint_is_not_implemented() {
    let env = TestEnv::new(&[]);

    let response = env.get("/v1.43/images/json").await;
    assert_eq!(response.status(), StatusCode::NOT_IMPLEMENTED);
    let json = body_json(response).await;
    assert!(json["message"].as_str().unwrap().contains("/v1.43/images/json"));
}

// ============================================================================
// Attach API Tests
// ============================================================================

#[tokio::test]
async fn test_attach_unknown_container() {
    let env = TestEnv::new(&[]);

    let response = env.post("/containers/missing/attach?stream=1", "").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert!(json["message"].as_str().unwrap().contains("missing"));
}

#[tokio::test]
async fn test_attach_requires_logs_or_stream() {
    let env = TestEnv::new(&[("c1", &["sleep", "30"], false)]);

    let response = env.post("/containers/c1/attach?stdout=1", "").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_attach_stdin_requires_stopped_container() {
    let env = TestEnv::new(&[("c1", &["sleep", "30"], false)]);
    env.runtime.start("c1").await.unwrap();

    let response = env
        .post("/containers/c1/attach?stream=1&stdin=1&stdout=1", "")
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_attach_streams_logs_until_container_stops() {
    let env = TestEnv::new(&[(
        "c1",
        &["sh", "-c", "echo out; sleep 0.3; echo err 1>&2; sleep 0.3"],
        false,
    )]);
    env.runtime.start("c1").await.unwrap();

    let response = env
        .post("/containers/c1/attach?logs=1&stream=1&stdout=1&stderr=1", "")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/vnd.docker.multiplexed-stream"
    );

    let frames = decode_all(&body_bytes(response).await);
    assert_eq!(stream_text(&frames, StreamType::Stdout), "out\n");
    assert_eq!(stream_text(&frames, StreamType::Stderr), "err\n");
    assert_eq!(
        env.runtime.get("c1").await.unwrap().status,
        ContainerStatus::Stopped
    );
}

#[tokio::test]
async fn test_attach_logs_only_replays_and_ends() {
    let env = TestEnv::new(&[("c1", &["sh", "-c", "echo done"], false)]);
    env.runtime.start("c1").await.unwrap();
    for _ in 0..100 {
        if env.runtime.get("c1").await.unwrap().status == ContainerStatus::Stopped {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let response = env.post("/containers/c1/attach?logs=1&stdout=1", "").await;
    assert_eq!(response.status(), StatusCode::OK);
    let frames = decode_all(&body_bytes(response).await);
    assert_eq!(stream_text(&frames, StreamType::Stdout), "done\n");
}

#[tokio::test]
async fn test_attach_stdin_bootstraps_stopped_container() {
    let env = TestEnv::new(&[("c1", &["cat"], false)]);

    let response = env
        .post("/containers/c1/attach?stream=1&stdin=1&stdout=1", "hello\n")
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let frames = decode_all(&body_bytes(response).await);
    assert!(frames.iter().all(|f| f.stream == StreamType::Stdout));
    assert_eq!(stream_text(&frames, StreamType::Stdout), "hello\n");
}

#[tokio::test]
async fn test_attach_tty_container_is_raw() {
    let env = TestEnv::new(&[("c1", &["cat"], true)]);

    let response = env
        .post("/containers/c1/attach?stream=1&stdin=1&stdout=1&stderr=1", "raw bytes")
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/vnd.docker.raw-stream"
    );
    assert_eq!(&body_bytes(response).await[..], b"raw bytes");
}

#[tokio::test]
async fn test_container_resize() {
    let env = TestEnv::new(&[("c1", &["sleep", "30"], false)]);

    let response = env.post("/containers/c1/resize?h=40&w=120", "").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = env.post("/containers/nope/resize?h=40&w=120", "").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// Exec API Tests
// ============================================================================

#[tokio::test]
async fn test_exec_create_validation() {
    let env = TestEnv::new(&[("c1", &["sleep", "30"], false)]);

    let response = env.post("/containers/nope/exec", r#"{"Cmd":["true"]}"#).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Registered but not started.
    let response = env.post("/containers/c1/exec", r#"{"Cmd":["true"]}"#).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    env.runtime.start("c1").await.unwrap();
    let response = env.post("/containers/c1/exec", r#"{"Cmd":[]}"#).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = env.post("/containers/c1/exec", "{not json").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_exec_echo_yields_single_stdout_frame() {
    let env = TestEnv::new(&[("c1", &["sleep", "30"], false)]);
    env.runtime.start("c1").await.unwrap();

    let exec_id = env
        .create_exec("c1", r#"{"Cmd":["echo","hi"],"Tty":false}"#)
        .await;
    assert_eq!(exec_id.len(), 64);

    let response = env
        .post(&format!("/exec/{exec_id}/start"), r#"{"Detach":false}"#)
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/vnd.docker.multiplexed-stream"
    );

    let frames = decode_all(&body_bytes(response).await);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].stream, StreamType::Stdout);
    assert_eq!(&frames[0].payload[..], b"hi\n");

    wait_until_gone(&env, &exec_id).await;
}

#[tokio::test]
async fn test_exec_stderr_is_separate_stream() {
    let env = TestEnv::new(&[("c1", &["sleep", "30"], false)]);
    env.runtime.start("c1").await.unwrap();

    let exec_id = env
        .create_exec("c1", r#"{"Cmd":["sh","-c","echo oops 1>&2"]}"#)
        .await;
    let response = env.post(&format!("/exec/{exec_id}/start"), "{}").await;

    let frames = decode_all(&body_bytes(response).await);
    assert_eq!(stream_text(&frames, StreamType::Stderr), "oops\n");
    assert_eq!(stream_text(&frames, StreamType::Stdout), "");
}

#[tokio::test]
async fn test_exec_tty_output_is_raw() {
    let env = TestEnv::new(&[("c1", &["sleep", "30"], false)]);
    env.runtime.start("c1").await.unwrap();

    let exec_id = env
        .create_exec("c1", r#"{"Cmd":["echo","hi"],"Tty":true,"AttachStderr":true}"#)
        .await;
    let response = env.post(&format!("/exec/{exec_id}/start"), "").await;
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/vnd.docker.raw-stream"
    );
    assert_eq!(&body_bytes(response).await[..], b"hi\n");
}

#[tokio::test]
async fn test_exec_env_and_working_dir() {
    let env = TestEnv::new(&[("c1", &["sleep", "30"], false)]);
    env.runtime.start("c1").await.unwrap();

    let exec_id = env
        .create_exec(
            "c1",
            r#"{"Cmd":["sh","-c","echo $GREETING; pwd"],"Env":["GREETING=hello"],"WorkingDir":"/"}"#,
        )
        .await;
    let response = env.post(&format!("/exec/{exec_id}/start"), "{}").await;

    let frames = decode_all(&body_bytes(response).await);
    assert_eq!(stream_text(&frames, StreamType::Stdout), "hello\n/\n");
}

#[tokio::test]
async fn test_exec_stdin_without_upgrade_is_closed() {
    let env = TestEnv::new(&[("c1", &["sleep", "30"], false)]);
    env.runtime.start("c1").await.unwrap();

    let exec_id = env
        .create_exec("c1", r#"{"Cmd":["cat"],"AttachStdin":true}"#)
        .await;
    let response = env.post(&format!("/exec/{exec_id}/start"), "{}").await;
    assert_eq!(response.status(), StatusCode::OK);

    // cat sees EOF at once, so the stream ends with no output.
    let frames = decode_all(&body_bytes(response).await);
    assert!(frames.is_empty());
    wait_until_gone(&env, &exec_id).await;
}

#[tokio::test]
async fn test_exec_start_twice_is_not_found() {
    let env = TestEnv::new(&[("c1", &["sleep", "30"], false)]);
    env.runtime.start("c1").await.unwrap();

    let exec_id = env.create_exec("c1", r#"{"Cmd":["echo","hi"]}"#).await;
    let first = env.post(&format!("/exec/{exec_id}/start"), "{}").await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = env.post(&format!("/exec/{exec_id}/start"), "{}").await;
    assert_eq!(second.status(), StatusCode::NOT_FOUND);
    let json = body_json(second).await;
    assert!(json["message"]
        .as_str()
        .unwrap()
        .contains("No such exec instance"));

    body_bytes(first).await;
}

#[tokio::test]
async fn test_exec_start_detached_returns_immediately() {
    let env = TestEnv::new(&[("c1", &["sleep", "30"], false)]);
    env.runtime.start("c1").await.unwrap();

    let exec_id = env.create_exec("c1", r#"{"Cmd":["sleep","5"]}"#).await;
    let response = timeout(
        Duration::from_secs(1),
        env.post(&format!("/exec/{exec_id}/start"), r#"{"Detach":true}"#),
    )
    .await
    .expect("detached start waited for the process");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::CONTENT_TYPE).is_none());

    assert!(env.state.exec_sessions.get(&exec_id).is_none());
    let response = env.get(&format!("/exec/{exec_id}/json")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_exec_start_requires_running_container() {
    let env = TestEnv::new(&[("c1", &["sleep", "30"], false)]);
    env.runtime.start("c1").await.unwrap();

    let exec_id = env.create_exec("c1", r#"{"Cmd":["echo","hi"]}"#).await;
    env.runtime.stop("c1").await.unwrap();
    for _ in 0..100 {
        if !env.runtime.get("c1").await.unwrap().status.is_running() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let response = env.post(&format!("/exec/{exec_id}/start"), "{}").await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    // Not consumed by the failed start.
    assert!(env.state.exec_sessions.get(&exec_id).is_some());
}

#[tokio::test]
async fn test_exec_start_with_upgrade_headers_switches_protocols() {
    let env = TestEnv::new(&[("c1", &["sleep", "30"], false)]);
    env.runtime.start("c1").await.unwrap();

    let exec_id = env.create_exec("c1", r#"{"Cmd":["echo","hi"]}"#).await;
    let response = env
        .send(
            Request::builder()
                .method("POST")
                .uri(format!("/exec/{exec_id}/start"))
                .header(header::CONNECTION, "Upgrade")
                .header(header::UPGRADE, "tcp")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await;

    assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
    assert_eq!(response.headers().get(header::UPGRADE).unwrap(), "tcp");
    assert!(response.headers().get(header::CONTENT_TYPE).is_none());

    // No connection to take over in process, so the session is released.
    wait_until_gone(&env, &exec_id).await;
}

#[tokio::test]
async fn test_exec_inspect() {
    let env = TestEnv::new(&[("c1", &["sleep", "30"], false)]);
    env.runtime.start("c1").await.unwrap();

    let exec_id = env
        .create_exec("c1", r#"{"Cmd":["echo","hi"],"DetachKeys":"ctrl-p,ctrl-q"}"#)
        .await;

    let response = env.get(&format!("/exec/{exec_id}/json")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["ID"], exec_id.as_str());
    assert_eq!(json["ContainerID"], "c1");
    assert_eq!(json["Running"], false);
    assert!(json["ExitCode"].is_null());
    assert_eq!(json["OpenStdin"], false);
    assert_eq!(json["OpenStdout"], true);
    assert_eq!(json["OpenStderr"], true);
    assert_eq!(json["DetachKeys"], "ctrl-p,ctrl-q");
    assert_eq!(json["CanRemove"], true);
    assert_eq!(json["ProcessConfig"]["entrypoint"], "echo");
    assert_eq!(json["ProcessConfig"]["arguments"][0], "hi");

    let response = env.get("/exec/unknown/json").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_exec_inspect_while_running() {
    let env = TestEnv::new(&[("c1", &["sleep", "30"], false)]);
    env.runtime.start("c1").await.unwrap();

    let exec_id = env
        .create_exec("c1", r#"{"Cmd":["sh","-c","sleep 0.5"]}"#)
        .await;
    let response = env.post(&format!("/exec/{exec_id}/start"), "{}").await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(env.get(&format!("/exec/{exec_id}/json")).await).await;
    assert_eq!(json["Running"], true);
    assert!(json["Pid"].as_u64().unwrap() > 0);

    body_bytes(response).await;
    wait_until_gone(&env, &exec_id).await;
}

#[tokio::test]
async fn test_exec_resize() {
    let env = TestEnv::new(&[("c1", &["sleep", "30"], false)]);
    env.runtime.start("c1").await.unwrap();

    let exec_id = env.create_exec("c1", r#"{"Cmd":["echo","hi"]}"#).await;

    let response = env.post(&format!("/exec/{exec_id}/resize?h=30&w=100"), "").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = env.post(&format!("/exec/{exec_id}/resize"), "").await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = env.post(&format!("/exec/{exec_id}/resize?h=tall"), "").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = env.post("/exec/unknown/resize?h=30&w=100", "").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Resize does not consume the session.
    assert!(env.state.exec_sessions.get(&exec_id).is_some());
}

#[tokio::test]
async fn test_exec_client_disconnect_releases_session() {
    let env = TestEnv::new(&[("c1", &["sleep", "30"], false)]);
    env.runtime.start("c1").await.unwrap();

    let exec_id = env
        .create_exec("c1", r#"{"Cmd":["sh","-c","while true; do echo tick; sleep 0.05; done"]}"#)
        .await;
    let response = env.post(&format!("/exec/{exec_id}/start"), "{}").await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body();
    let first = timeout(Duration::from_secs(5), body.frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(first.is_data());
    drop(body);

    wait_until_gone(&env, &exec_id).await;
}
