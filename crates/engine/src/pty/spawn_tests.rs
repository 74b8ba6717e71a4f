use std::time::Duration;

use bytes::Bytes;

use super::*;

fn opts(shell: &str) -> SpawnOptions {
    SpawnOptions {
        shell: shell.to_owned(),
        cols: 80,
        rows: 24,
        network_isolated: false,
        home_dir: std::env::temp_dir(),
        user: "candidate".to_owned(),
    }
}

#[test]
fn pick_sandbox_uid_stays_in_range() {
    for _ in 0..64 {
        let uid = pick_sandbox_uid();
        assert!((10_000..60_000).contains(&uid));
    }
}

#[tokio::test]
async fn spawn_runs_shell_and_captures_output() {
    let (handle, join) = spawn(opts("/bin/sh")).unwrap();
    let mut output = handle.subscribe();

    handle.write(Bytes::from_static(b"echo hello-pty\n")).await.unwrap();

    let mut collected = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(500), output.recv()).await {
            Ok(Ok(chunk)) => {
                collected.extend_from_slice(&chunk);
                if String::from_utf8_lossy(&collected).contains("hello-pty") {
                    break;
                }
            }
            _ => continue,
        }
    }
    assert!(String::from_utf8_lossy(&collected).contains("hello-pty"));

    handle.write(Bytes::from_static(b"exit\n")).await.unwrap();
    let status = tokio::time::timeout(Duration::from_secs(5), join).await.unwrap().unwrap().unwrap();
    assert_eq!(status.code, Some(0));
}

#[tokio::test]
async fn resize_does_not_error_on_a_live_pty() {
    let (handle, _join) = spawn(opts("/bin/sh")).unwrap();
    handle.resize(100, 40).await.unwrap();
    handle.close();
}

#[tokio::test]
async fn close_is_safe_to_call_twice() {
    let (handle, _join) = spawn(opts("/bin/sh")).unwrap();
    handle.close();
    handle.close();
}
