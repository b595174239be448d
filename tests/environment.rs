use std::io::Write;
use std::time::Duration;

use anchorwatch::{
    init_tracing, AnchorStatus, EnvironmentError, HarnessConfig, ServiceMode, TestEnvironment,
    WaitError,
};
use serde_json::json;
use tokio::runtime::{Builder, Runtime};

fn paused_runtime() -> Runtime {
    init_tracing();

    Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("tokio runtime")
}

fn config_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn environment_anchors_streams_on_schedule() {
    let file = config_file(
        r#"
        anchor_timeout_secs = 60

        [anchor]
        mode = "node"
        interval_secs = 10
        "#,
    );
    let config = HarnessConfig::load(file.path()).unwrap();

    let rt = paused_runtime();
    rt.block_on(async {
        let env = TestEnvironment::setup(config).unwrap();
        let doc = env.network().create_stream(json!({"foo": "bar"}), true).unwrap();

        let outcome = env.wait_for_anchor(&doc).await.unwrap();
        assert_eq!(outcome.elapsed, Duration::from_secs(10));
        assert_eq!(doc.anchor_status(), AnchorStatus::Anchored);

        env.restart_anchors().unwrap();
        doc.change(json!({"foo": "baz"}), true).unwrap();
        env.wait_for_anchor(&doc).await.unwrap();
        assert_eq!(doc.log_len(), 4);
        assert_eq!(env.anchors().block_number(), 2);

        env.teardown();
    });
}

#[test]
fn missing_config_file_is_an_io_error() {
    let err = HarnessConfig::load("/nonexistent/anchorwatch.toml").unwrap_err();
    assert!(err.to_string().contains("/nonexistent/anchorwatch.toml"));
}

#[test]
fn manual_anchoring_without_schedule() {
    let mut config = HarnessConfig::default();
    config.anchor.mode = ServiceMode::None;

    let rt = paused_runtime();
    rt.block_on(async {
        let env = TestEnvironment::setup(config).unwrap();
        assert!(matches!(
            env.restart_anchors(),
            Err(EnvironmentError::NotRestartable(ServiceMode::None))
        ));

        let doc = env.network().create_stream(json!({}), true).unwrap();
        let (outcome, ()) = tokio::join!(env.wait_for_anchor(&doc), async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            env.anchors().anchor_now().unwrap();
        });
        assert_eq!(outcome.unwrap().elapsed, Duration::from_secs(30));
    });
}

#[test]
fn client_mode_anchor_service_is_rejected() {
    let mut config = HarnessConfig::default();
    config.anchor.mode = ServiceMode::Client;
    assert!(matches!(
        TestEnvironment::setup(config),
        Err(EnvironmentError::UnsupportedMode(ServiceMode::Client))
    ));
}

#[test]
fn teardown_fails_outstanding_waits() {
    let mut config = HarnessConfig::default();
    config.anchor.mode = ServiceMode::None;

    let rt = paused_runtime();
    rt.block_on(async {
        let env = TestEnvironment::setup(config).unwrap();
        let doc = env.network().create_stream(json!({}), true).unwrap();
        let network = env.network().clone();
        let timeout = env.config().anchor_timeout();

        let (result, ()) = tokio::join!(anchorwatch::wait_for_anchor(&doc, timeout), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            env.teardown();
        });
        assert!(matches!(result, Err(WaitError::Subscription { .. })));
        assert!(network.is_closed());
    });
}
