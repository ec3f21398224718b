mod support;

use overuse_app::daemon::{ServiceRequest, ServiceResponse};
use overuse_app::serve_callbacks;
use support::{FakePackageManager, Harness, app_info, sample};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

async fn send(
    lines: &mut tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
    writer: &mut tokio::net::unix::OwnedWriteHalf,
    request: &str,
) -> ServiceResponse {
    writer
        .write_all(format!("{}\n", request).as_bytes())
        .await
        .expect("write");
    let line = lines.next_line().await.expect("read").expect("reply");
    serde_json::from_str(&line).expect("response json")
}

#[tokio::test]
async fn daemon_callbacks_feed_the_ledger_over_the_socket() {
    let packages = FakePackageManager::new(&[0]);
    packages.install(app_info("com.example.game", 10_010));
    let harness = Harness::start(packages).await;

    let socket_dir = tempfile::tempdir().expect("socket dir");
    let socket_path = socket_dir.path().join("handler.sock");
    let listener = UnixListener::bind(&socket_path).expect("bind");
    let server = tokio::spawn(serve_callbacks(listener, harness.service.clone()));

    let stream = UnixStream::connect(&socket_path).await.expect("connect");
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let push = serde_json::to_string(&ServiceRequest::LatestIoOveruseStats {
        samples: vec![sample(10_010, 10, 20, true)],
    })
    .expect("request json");
    let response = send(&mut lines, &mut writer, &push).await;
    assert!(response.ok);
    harness.service.sync_worker().await;

    let query = serde_json::to_string(&ServiceRequest::TodayIoUsageStats).expect("request json");
    let response = send(&mut lines, &mut writer, &query).await;
    assert!(response.ok);
    assert_eq!(response.today_io_usage_stats.len(), 1);
    assert_eq!(response.today_io_usage_stats[0].package_name, "com.example.game");
    assert_eq!(response.today_io_usage_stats[0].written_bytes.total(), 30);

    let response = send(&mut lines, &mut writer, "{\"type\":\"Bogus\"}").await;
    assert!(!response.ok);
    assert!(response.message.starts_with("invalid request"));

    server.abort();
}
