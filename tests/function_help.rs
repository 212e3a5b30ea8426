use std::process::{Command, Output};

fn agent(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_telemetry-agent"))
        .args(args)
        .env("NO_COLOR", "1")
        .output()
        .expect("agent binary runs")
}

#[test]
fn lists_every_function_by_group() {
    let output = agent(&["--functions"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for expected in [
        "Arithmetic",
        "Series",
        "Objects",
        "$add",
        "$pick",
        "$push",
        "$pop",
        "$last",
        "$compute",
        "$aggregate",
    ] {
        assert!(stdout.contains(expected), "missing {} in:\n{}", expected, stdout);
    }
}

#[test]
fn describes_one_function() {
    let output = agent(&["--function-help", "add"]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Adds two numbers"));
    assert!(stdout.contains("Returns (number)"));
    assert!(stdout.contains("left"));
    assert!(stdout.contains("right"));
}

#[test]
fn unknown_functions_fail() {
    let output = agent(&["--function-help", "$nope"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Function `$nope` not found."));
}

#[test]
fn a_missing_config_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.yaml");
    let output = agent(&["--config", missing.to_str().unwrap(), "--once"]);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Unable to read configuration file"));
}
