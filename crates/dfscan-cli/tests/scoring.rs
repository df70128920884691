//! End-to-end scoring through the `dfscan score` binary with tiny weights.

#![allow(clippy::unwrap_used, clippy::float_cmp)]
#![allow(deprecated)] // cargo_bin deprecation

mod common;

use std::fs;

use common::{jsonl, Workspace};
use dfscan_test_support::{SyntheticFrameBuilder, TinyWeights};

fn assert_exit_matches_verdicts(code: Option<i32>, reports: &[serde_json::Value]) {
    let any_high = reports.iter().any(|r| r["verdict"] == "high");
    assert_eq!(code, Some(i32::from(any_high)));
}

#[test]
fn test_jsonl_report_fields() {
    let ws = Workspace::with_tiny_weights();
    let frame = ws.frame("frame.png", [120, 80, 40]);

    let output = ws
        .command()
        .args(["score", "--weights"])
        .arg(ws.weights())
        .arg(&frame)
        .output()
        .unwrap();

    let reports = jsonl(&output.stdout);
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert!(report["path"].as_str().unwrap().ends_with("frame.png"));
    assert!(report["timestamp"].as_str().unwrap().contains('T'));
    assert_eq!(report["dimensions"]["width"], 48);
    assert_eq!(report["dimensions"]["height"], 36);

    let p = report["deepfake_probability"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&p));
    let expected = if p > 0.5 { "high" } else { "low" };
    assert_eq!(report["verdict"], expected);
    assert_exit_matches_verdicts(output.status.code(), &reports);
}

#[test]
fn test_ensemble_averages_members() {
    let ws = Workspace::with_tiny_weights();
    let second = ws.path().join("second.safetensors");
    TinyWeights::generate().unwrap().save(&second).unwrap();
    let frame = ws.frame("frame.png", [10, 200, 30]);

    let weights = format!("{},{}", ws.weights().display(), second.display());
    let output = ws
        .command()
        .env("DFSCAN_WEIGHTS", weights)
        .arg("score")
        .arg(&frame)
        .output()
        .unwrap();

    let reports = jsonl(&output.stdout);
    let members: Vec<f64> = reports[0]["model_probabilities"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_f64().unwrap())
        .collect();
    assert_eq!(members.len(), 2);
    let mean = (members[0] + members[1]) / 2.0;
    let p = reports[0]["deepfake_probability"].as_f64().unwrap();
    assert!((p - mean).abs() < 1e-5, "{p} vs {mean}");
}

#[test]
fn test_wrapper_prefix_does_not_change_scores() {
    let ws = Workspace::with_tiny_weights();
    let weights = TinyWeights::generate().unwrap();
    let plain = ws.path().join("plain.safetensors");
    let wrapped = ws.path().join("wrapped.safetensors");
    weights.save(&plain).unwrap();
    weights.save_prefixed(&wrapped).unwrap();
    let frame = ws.frame("frame.png", [64, 128, 255]);

    let score = |path: &std::path::Path| {
        let output = ws
            .command()
            .args(["score", "--weights"])
            .arg(path)
            .arg(&frame)
            .output()
            .unwrap();
        jsonl(&output.stdout)[0]["deepfake_probability"]
            .as_f64()
            .unwrap()
    };

    assert_eq!(score(&plain), score(&wrapped));
}

#[test]
fn test_directory_recursion_and_skips() {
    let ws = Workspace::with_tiny_weights();
    let frames = ws.path().join("frames");
    ws.frame("frames/a.png", [0, 0, 0]);
    ws.frame("frames/b.png", [255, 255, 255]);
    ws.frame("frames/nested/c.png", [128, 0, 128]);
    fs::write(frames.join("broken.png"), SyntheticFrameBuilder::garbage_bytes()).unwrap();
    fs::write(frames.join("notes.txt"), "not a frame").unwrap();

    let flat = ws
        .command()
        .args(["score", "--weights"])
        .arg(ws.weights())
        .arg(&frames)
        .output()
        .unwrap();
    let reports = jsonl(&flat.stdout);
    assert_eq!(reports.len(), 2);
    assert!(String::from_utf8_lossy(&flat.stderr).contains("broken.png"));
    assert_exit_matches_verdicts(flat.status.code(), &reports);

    let recursive = ws
        .command()
        .args(["score", "-r", "--weights"])
        .arg(ws.weights())
        .arg(&frames)
        .output()
        .unwrap();
    assert_eq!(jsonl(&recursive.stdout).len(), 3);
}

#[test]
fn test_json_array_output() {
    let ws = Workspace::with_tiny_weights();
    let a = ws.frame("a.png", [1, 1, 1]);
    let b = ws.frame("b.png", [250, 250, 250]);

    let output = ws
        .command()
        .args(["score", "--format", "json", "--pretty", "--weights"])
        .arg(ws.weights())
        .arg(&a)
        .arg(&b)
        .output()
        .unwrap();

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let reports = value.as_array().unwrap();
    assert_eq!(reports.len(), 2);
    assert_exit_matches_verdicts(output.status.code(), reports);
}

#[test]
fn test_scoring_is_deterministic() {
    let ws = Workspace::with_tiny_weights();
    let frame = ws.frame("frame.png", [33, 66, 99]);

    let run = || {
        let output = ws
            .command()
            .args(["score", "--weights"])
            .arg(ws.weights())
            .arg(&frame)
            .output()
            .unwrap();
        jsonl(&output.stdout)[0]["model_probabilities"].clone()
    };

    assert_eq!(run(), run());
}
