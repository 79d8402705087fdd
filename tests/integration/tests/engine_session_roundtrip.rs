#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chesster_engine::{
    EngineError, EngineSession, EngineSessionConfig, EngineState, FixedResolver, Remediation,
};
use chesster_process::TokioProcessLauncher;

const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

fn write_executable(path: &Path, body: &str) {
    std::fs::write(path, body).expect("write script");
    let mut permissions = std::fs::metadata(path).expect("metadata").permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(path, permissions).expect("chmod");
}

/// Engine that logs its pid and the weights argument, then speaks UCI.
fn fake_engine(dir: &Path) -> PathBuf {
    let script = dir.join("fake-lc0");
    let pid_log = dir.join("pids.log");
    write_executable(
        &script,
        &format!(
            "#!/bin/sh\n\
             echo \"$$ $1\" >> '{}'\n\
             while IFS= read -r line; do\n\
               case \"$line\" in\n\
                 uci) echo 'id name fake-lc0'; echo 'option name Nodes type spin'; echo uciok ;;\n\
                 'setoption name Nodes value 1') echo 'info string nodes limited' >&2 ;;\n\
                 isready) echo readyok ;;\n\
                 'position fen '*) last=\"$line\" ;;\n\
                 go*) echo 'info depth 1 nodes 1'; echo 'bestmove g1f3' ;;\n\
               esac\n\
             done\n",
            pid_log.display()
        ),
    );
    script
}

fn session_for(engine: PathBuf, config: EngineSessionConfig) -> EngineSession {
    EngineSession::new(
        Arc::new(TokioProcessLauncher),
        Arc::new(FixedResolver::new(Some(engine))),
        config,
    )
}

fn logged_pids(dir: &Path) -> Vec<(u32, String)> {
    std::fs::read_to_string(dir.join("pids.log"))
        .unwrap_or_default()
        .lines()
        .filter_map(|line| {
            let (pid, weights) = line.split_once(' ')?;
            Some((pid.parse().ok()?, weights.to_string()))
        })
        .collect()
}

#[tokio::test]
async fn integration_real_engine_process_answers_move_requests() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut session = session_for(fake_engine(temp.path()), EngineSessionConfig::default());

    session
        .load(&temp.path().join("maia-1500.pb.gz"))
        .await
        .expect("load");
    assert_eq!(session.state(), EngineState::Ready);
    assert_eq!(session.get_move(START_FEN).await.expect("move"), "g1f3");
    assert_eq!(session.get_move(START_FEN).await.expect("second move"), "g1f3");

    let spawned = logged_pids(temp.path());
    assert_eq!(spawned.len(), 1);
    assert!(spawned[0].1.starts_with("--weights="));
    assert!(spawned[0].1.ends_with("maia-1500.pb.gz"));

    session.unload().await;
    assert_eq!(session.state(), EngineState::Terminated);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn integration_reload_reaps_previous_engine_before_replacement_runs() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut session = session_for(fake_engine(temp.path()), EngineSessionConfig::default());

    session.load(&temp.path().join("a.pb.gz")).await.expect("load a");
    session.load(&temp.path().join("b.pb.gz")).await.expect("load b");

    let spawned = logged_pids(temp.path());
    assert_eq!(spawned.len(), 2);
    let (first_pid, _) = &spawned[0];
    let (second_pid, second_weights) = &spawned[1];
    assert!(!Path::new(&format!("/proc/{first_pid}")).exists());
    assert!(Path::new(&format!("/proc/{second_pid}")).exists());
    assert!(second_weights.ends_with("b.pb.gz"));
    assert!(session.weights_path().expect("weights").ends_with("b.pb.gz"));

    session.unload().await;
}

#[tokio::test]
async fn integration_silent_engine_times_out_with_its_stderr() {
    let temp = tempfile::tempdir().expect("tempdir");
    let engine = temp.path().join("broken-lc0");
    write_executable(
        &engine,
        "#!/bin/sh\n\
         echo 'error: weights file is corrupt' >&2\n\
         while IFS= read -r line; do\n\
           [ \"$line\" = uci ] && echo uciok\n\
         done\n",
    );
    let config = EngineSessionConfig {
        ready_timeout: Duration::from_millis(300),
        ..EngineSessionConfig::default()
    };
    let mut session = session_for(engine, config);

    let error = session
        .load(&temp.path().join("corrupt.pb.gz"))
        .await
        .expect_err("no readyok");
    assert!(matches!(error, EngineError::HandshakeTimeout { .. }));
    assert_eq!(error.remediation(), Remediation::Retry);
    let message = error.to_string();
    assert!(message.contains("timed out after 300ms"), "{message}");
    assert!(message.contains("weights file is corrupt"), "{message}");
    assert_eq!(session.state(), EngineState::Terminated);

    let not_ready = session.get_move(START_FEN).await.expect_err("not ready");
    assert!(matches!(not_ready, EngineError::NotReady { .. }));
    session.unload().await;
}

#[tokio::test]
async fn integration_engine_crash_surfaces_as_exit_with_stderr() {
    let temp = tempfile::tempdir().expect("tempdir");
    let engine = temp.path().join("crashy-lc0");
    write_executable(
        &engine,
        "#!/bin/sh\n\
         while IFS= read -r line; do\n\
           case \"$line\" in\n\
             uci) echo uciok ;;\n\
             isready) echo readyok ;;\n\
             go*) echo 'segfault in search' >&2; exit 139 ;;\n\
           esac\n\
         done\n",
    );
    let mut session = session_for(engine, EngineSessionConfig::default());
    session.load(&temp.path().join("x.pb.gz")).await.expect("load");

    let error = session.get_move(START_FEN).await.expect_err("crash");
    assert!(matches!(error, EngineError::EngineExited { .. }), "{error}");
    assert!(error.stderr_tail().unwrap_or_default().contains("segfault"));
    assert_eq!(session.state(), EngineState::Terminated);
}

#[tokio::test]
async fn integration_slow_reply_is_discarded_before_the_next_position() {
    let temp = tempfile::tempdir().expect("tempdir");
    let engine = temp.path().join("slow-lc0");
    write_executable(
        &engine,
        "#!/bin/sh\n\
         searches=0\n\
         while IFS= read -r line; do\n\
           case \"$line\" in\n\
             uci) echo uciok ;;\n\
             isready) echo readyok ;;\n\
             go*)\n\
               searches=$((searches + 1))\n\
               if [ \"$searches\" -eq 1 ]; then sleep 1; echo 'bestmove a7a6'; else echo 'bestmove g1f3'; fi ;;\n\
           esac\n\
         done\n",
    );
    let config = EngineSessionConfig {
        move_timeout: Duration::from_millis(300),
        ..EngineSessionConfig::default()
    };
    let mut session = session_for(engine, config);
    session.load(&temp.path().join("x.pb.gz")).await.expect("load");

    let error = session
        .get_move("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq - 0 1")
        .await
        .expect_err("slow search");
    assert!(matches!(error, EngineError::MoveRequestTimeout { .. }), "{error}");

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    assert_eq!(session.get_move(START_FEN).await.expect("second move"), "g1f3");
    session.unload().await;
}
