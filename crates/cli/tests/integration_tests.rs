/// Integration tests for the CaskKV CLI.
/// Drive the real binary over stdin: basic ops, batches, scans, rotation,
/// merge, recovery across restarts, and per-backend behavior.
use std::path::Path;
use tempfile::tempdir;

/// Runs the CLI against `dir` with extra environment `env`, feeding `commands`
/// followed by `EXIT`, and returns stdout.
fn run_cli(dir: &Path, env: &[(&str, &str)], commands: &str) -> String {
    use std::io::Write;
    use std::process::{Command, Stdio};

    let mut cmd = Command::new(env!("CARGO_BIN_EXE_cli"));
    cmd.env("CASKKV_DIR", dir)
        .env("CASKKV_SYNC", "true")
        .env_remove("RUST_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (k, v) in env {
        cmd.env(k, v);
    }
    let mut child = cmd.spawn().expect("Failed to spawn CLI");

    {
        let stdin = child.stdin.as_mut().expect("Failed to open stdin");
        stdin
            .write_all(commands.as_bytes())
            .expect("Failed to write to stdin");
        stdin.write_all(b"EXIT\n").expect("Failed to write EXIT");
    }

    let output = child.wait_with_output().expect("Failed to read output");
    assert!(
        output.status.success(),
        "cli failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn run_default(dir: &Path, commands: &str) -> String {
    run_cli(dir, &[], commands)
}

fn count_data_files(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().map(|x| x == "data").unwrap_or(false))
        .count()
}

// -------------------- Basic operations --------------------

#[test]
fn test_basic_set_get() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().join("db");

    let output = run_default(&dir, "SET key1 value1\nGET key1\n");

    assert!(output.contains("OK"));
    assert!(output.contains("value1"));
    assert!(output.contains("bye"));
}

#[test]
fn test_overwrite_and_delete() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().join("db");

    let output = run_default(
        &dir,
        "SET k oldvalue\nSET k newvalue\nGET k\nDEL k\nGET k\nDEL k\n",
    );

    assert!(output.contains("newvalue"));
    assert!(!output.contains("oldvalue"));
    assert!(output.contains("(nil)"));
    assert!(!output.contains("ERR"));
}

#[test]
fn test_value_with_spaces() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().join("db");

    let output = run_default(&dir, "SET greeting hello big world\nGET greeting\n");
    assert!(output.contains("hello big world"));
}

#[test]
fn test_unknown_command() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().join("db");

    let output = run_default(&dir, "FROB x\n");
    assert!(output.contains("unknown command: FROB"));
}

// -------------------- Batches and scans --------------------

#[test]
fn test_mset_and_prefix_scan() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().join("db");

    let output = run_default(&dir, "MSET user:1 ann user:2 bob item:1 pen\nSCAN user:\n");
    assert!(output.contains("OK (3 keys)"));
    assert!(output.contains("user:1 -> ann"));
    assert!(output.contains("user:2 -> bob"));
    assert!(!output.contains("item:1 -> pen"));
    assert!(output.contains("(2 entries)"));
}

#[test]
fn test_reverse_scan_order() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().join("db");

    let output = run_default(&dir, "SET a 1\nSET b 2\nSET c 3\nRSCAN\n");
    let c = output.find("c -> 3").unwrap();
    let b = output.find("b -> 2").unwrap();
    let a = output.find("a -> 1").unwrap();
    assert!(c < b && b < a);
}

#[test]
fn test_keys_lists_sorted() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().join("db");

    let output = run_default(&dir, "SET zeta 1\nSET alpha 2\nKEYS\n");
    let alpha = output.find("alpha").unwrap();
    let zeta = output.rfind("zeta").unwrap();
    assert!(alpha < zeta);
}

// -------------------- Persistence --------------------

#[test]
fn test_data_survives_restart() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().join("db");

    run_default(&dir, "SET persistent yes\nMSET x 1 y 2\nDEL y\n");
    let output = run_default(&dir, "GET persistent\nGET x\nGET y\n");

    assert!(output.contains("yes"));
    assert!(output.contains("\n1\n") || output.contains("> 1\n"));
    assert!(output.contains("(nil)"));
}

#[test]
fn test_every_index_backend_restarts() {
    for index in ["btree", "art", "bptree"] {
        let tmp = tempdir().unwrap();
        let dir = tmp.path().join("db");
        let env = [("CASKKV_INDEX", index)];

        run_cli(&dir, &env, "SET a 1\nSET b 2\nDEL a\n");
        let output = run_cli(&dir, &env, "KEYS\nGET b\nSTATS\n");

        assert!(output.contains(&format!("index={index}")), "{index}");
        assert!(output.contains("keys=1"), "{index}: {output}");
        assert!(!output.contains("\na\n"), "{index}");
    }
}

// -------------------- Rotation and merge --------------------

#[test]
fn test_small_segments_rotate() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().join("db");

    let mut commands = String::new();
    for i in 0..100 {
        commands.push_str(&format!("SET key{i:03} {}\n", "v".repeat(40)));
    }
    commands.push_str("GET key000\nGET key099\n");

    let output = run_cli(&dir, &[("CASKKV_SEGMENT_KB", "1")], &commands);
    assert!(output.matches(&"v".repeat(40)).count() >= 2);
    assert!(count_data_files(&dir) > 1);
}

#[test]
fn test_merge_reclaims_space_after_restart() {
    let tmp = tempdir().unwrap();
    let dir = tmp.path().join("db");
    let env = [("CASKKV_SEGMENT_KB", "1")];

    let mut commands = String::new();
    for round in 0..5 {
        for i in 0..20 {
            commands.push_str(&format!("SET key{i:02} round{round}-{}\n", "x".repeat(30)));
        }
    }
    run_cli(&dir, &env, &commands);
    let before = count_data_files(&dir);

    let output = run_cli(&dir, &env, "MERGE\n");
    assert!(output.contains("OK (takes effect on next start)"));

    let output = run_cli(&dir, &env, "GET key07\nSTATS\n");
    assert!(output.contains(&format!("round4-{}", "x".repeat(30))));
    assert!(output.contains("keys=20"));
    assert!(count_data_files(&dir) < before);
}
