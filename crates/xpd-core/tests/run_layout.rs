use std::fs;

use serde_json::json;
use tempfile::tempdir;
use xpd_core::{
    batch_paths, create_run, find_latest_run, partition, read_batch, res_path, task, write_batch,
    write_results, RunDirectory, RunIdentity, RunManifest,
};

#[test]
fn create_run_builds_both_trees() {
    let temp = tempdir().expect("tmp dir");
    let run = create_run(temp.path(), &RunIdentity::Tag("v1".into())).expect("create");
    assert_eq!(run.root, temp.path().join("v1"));
    assert_eq!(run.identity, "v1");
    assert!(run.xps.is_dir());
    assert!(run.res.is_dir());
}

#[test]
fn create_run_refuses_existing_directory() {
    let temp = tempdir().expect("tmp dir");
    create_run(temp.path(), &RunIdentity::Tag("v1".into())).expect("first");
    let err = create_run(temp.path(), &RunIdentity::Tag("v1".into())).unwrap_err();
    assert_eq!(err.code(), "path_exists");
}

#[test]
fn batches_round_trip_nested_records() {
    let temp = tempdir().expect("tmp dir");
    let run = create_run(temp.path(), &RunIdentity::Tag("rt".into())).expect("create");
    let tasks = vec![
        task([
            ("seed", json!(3001)),
            ("method", json!("stochastic")),
            ("opts", json!({"grid": [1, 2, 3], "nested": {"a": null, "b": 1.5}})),
        ]),
        task([("seed", json!(null)), ("method", json!("deterministic"))]),
    ];
    for batch in partition(&tasks, 2) {
        let path = write_batch(&run, &batch).expect("write");
        let back = read_batch(&path).expect("read");
        assert_eq!(back, batch);
    }
}

#[test]
fn batch_paths_sort_numerically() {
    let temp = tempdir().expect("tmp dir");
    let run = create_run(temp.path(), &RunIdentity::Tag("sorted".into())).expect("create");
    let tasks: Vec<_> = (0..12).map(|i| task([("i", json!(i))])).collect();
    for batch in partition(&tasks, 12) {
        write_batch(&run, &batch).expect("write");
    }
    fs::write(run.xps.join("notes.txt"), b"ignored").expect("stray file");
    let names: Vec<String> = batch_paths(&run)
        .expect("list")
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    let expected: Vec<String> = (0..12).map(|i| i.to_string()).collect();
    assert_eq!(names, expected);
}

#[test]
fn collect_results_follows_batch_order() {
    let temp = tempdir().expect("tmp dir");
    let run = create_run(temp.path(), &RunIdentity::Tag("res".into())).expect("create");
    let tasks: Vec<_> = (0..5).map(|i| task([("i", json!(i))])).collect();
    for batch in partition(&tasks, 2) {
        let xps = write_batch(&run, &batch).expect("write");
        let results: Vec<_> = batch.tasks.iter().map(|t| t["i"].clone()).collect();
        write_results(&res_path(&xps).expect("res"), &results).expect("results");
    }
    let collected = run.collect_results().expect("collect");
    assert_eq!(collected, (0..5).map(|i| json!(i)).collect::<Vec<_>>());
}

#[test]
fn collect_results_reports_missing_batch() {
    let temp = tempdir().expect("tmp dir");
    let run = create_run(temp.path(), &RunIdentity::Tag("gap".into())).expect("create");
    for batch in partition(&[task([("i", json!(0))])], 1) {
        write_batch(&run, &batch).expect("write");
    }
    assert_eq!(run.collect_results().unwrap_err().code(), "missing_results");
}

#[test]
fn latest_run_ignores_tags() {
    let temp = tempdir().expect("tmp dir");
    for name in [
        "2024-01-02_at_10-00-00",
        "2024-03-01_at_09-30-00",
        "2023-12-31_at_23-59-59",
        "zz-tagged",
    ] {
        fs::create_dir(temp.path().join(name)).expect("mkdir");
    }
    let latest = find_latest_run(temp.path()).expect("latest");
    assert_eq!(latest, RunDirectory::at(temp.path().join("2024-03-01_at_09-30-00")));
}

#[test]
fn manifest_round_trips() {
    let temp = tempdir().expect("tmp dir");
    let manifest = RunManifest {
        identity: "v1".into(),
        host: "local".into(),
        target: "local".into(),
        tasks: 3,
        batches: 2,
        ..RunManifest::default()
    };
    manifest.write(temp.path()).expect("write");
    assert_eq!(RunManifest::read(temp.path()).expect("read"), manifest);
}
