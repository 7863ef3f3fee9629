#![cfg(unix)]

mod common;

use common::{count, start};
use companion_host::SupervisorState;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_external_kill_resets_and_relaunches() {
    let session = start(0);

    assert!(session.handle.open_file(&session.scene()));
    session.handle.flush().await;
    assert_eq!(session.handle.state(), SupervisorState::Ready);

    let lines = session.wait_for_lines(|l| count(l, "open-file") == 1).await;
    let first_pid = lines[0].trim_start_matches("pid ").to_string();

    let status = std::process::Command::new("kill")
        .args(["-9", &first_pid])
        .status()
        .unwrap();
    assert!(status.success());
    session.wait_for_state(SupervisorState::NotRunning).await;

    // Passive notifications are dropped while nothing runs
    session.handle.on_build_finished();
    session.handle.flush().await;
    assert_eq!(session.handle.state(), SupervisorState::NotRunning);

    assert!(session.handle.open_file(&session.scene()));
    session.handle.flush().await;
    assert_eq!(session.handle.state(), SupervisorState::Ready);

    let lines = session.wait_for_lines(|l| count(l, "open-file") == 2).await;
    let pids: Vec<&String> = lines.iter().filter(|l| l.starts_with("pid ")).collect();
    assert_eq!(pids.len(), 2);
    assert_ne!(pids[1].trim_start_matches("pid "), first_pid);
    assert_eq!(count(&lines, "initialize-classpath"), 2);
    assert_eq!(count(&lines, "load-compiled-classes"), 0);
    assert!(session.recorder.warnings.lock().unwrap().is_empty());

    session.handle.shutdown().await;
}
