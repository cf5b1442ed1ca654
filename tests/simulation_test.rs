use std::process::{Command, Output};

fn run_simulation(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_traffic_agents"))
        .args(args)
        .env("RUST_LOG", "warn,traffic_agents=info")
        .output()
        .expect("Failed to execute simulation")
}

/// Test that the basic scenario runs to completion
#[test]
fn test_basic_simulation_runs() {
    let output = run_simulation(&["basic", "--sim-time", "15", "--tick-ms", "10", "--seed", "7"]);

    assert!(
        output.status.success(),
        "Simulation failed. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("=== SIMULATION COMPLETE ==="),
        "Simulation did not complete properly. stderr: {}",
        stderr
    );
}

/// Test that simulation statistics are logged
#[test]
fn test_simulation_statistics_logged() {
    let output = run_simulation(&["complete", "--sim-time", "20", "--tick-ms", "10", "--seed", "11"]);
    assert!(output.status.success(), "Simulation failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    for statistic in [
        "Vehicles entered:",
        "Vehicles despawned:",
        "Average wait:",
        "Total wait time:",
        "Number of waits:",
    ] {
        assert!(stderr.contains(statistic), "Missing '{}' statistic", statistic);
    }

    // Format: "[2026-01-01T00:00:00Z INFO  traffic_agents::simulation::stats] Vehicles entered: 8"
    let entered_line = stderr
        .lines()
        .find(|line| line.contains("Vehicles entered:"))
        .expect("Could not find 'Vehicles entered' line");
    let entered: u32 = entered_line
        .split("Vehicles entered:")
        .nth(1)
        .and_then(|s| s.trim().parse().ok())
        .expect("Could not parse entered count");
    assert!(entered > 0, "No vehicles entered the simulation");
}

/// Test that learning runs dump controller statistics
#[test]
fn test_learning_statistics_logged() {
    let output = run_simulation(&[
        "basic",
        "--sim-time",
        "5",
        "--tick-ms",
        "10",
        "--use-rl",
        "--epsilon",
        "0.2",
    ]);
    assert!(output.status.success(), "Simulation failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--- Learning statistics ---"));
    assert!(stderr.contains("Q-values"));
}

/// Test that configuration problems exit with a failure status
#[test]
fn test_invalid_configuration_fails() {
    let missing = run_simulation(&["--config", "/nonexistent/map.json"]);
    assert!(!missing.status.success());

    let bad_epsilon = run_simulation(&["basic", "--epsilon", "3"]);
    assert!(!bad_epsilon.status.success());

    let bad_capacity = run_simulation(&["basic", "--lane-capacity", "0"]);
    assert!(!bad_capacity.status.success());
}
