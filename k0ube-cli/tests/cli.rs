//! End-to-end checks of the `k0ube` binary that need no cluster

use assert_cmd::Command;
use std::fs;
use tempfile::tempdir;

fn k0ube(config: &std::path::Path) -> Command {
    let mut cmd = Command::cargo_bin("k0ube").expect("bin");
    cmd.env("K0UBE_CONFIG", config).env_remove("RUST_LOG");
    cmd
}

#[test]
fn render_prints_replica_set_and_service() {
    let tmp = tempdir().expect("tempdir");
    let output = k0ube(&tmp.path().join("absent.toml"))
        .args([
            "render",
            "--name",
            "svc",
            "--binary-url",
            "http://host:30000/svc",
            "--labels",
            r#"{"team":"x"}"#,
            "--configMaps",
            r#"["a","b"]"#,
            "--",
            "--port=8080",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let yaml = String::from_utf8(output).expect("utf8");
    let docs: Vec<serde_yaml::Value> = yaml
        .split("---\n")
        .map(|doc| serde_yaml::from_str(doc).expect("yaml document"))
        .collect();
    assert_eq!(docs.len(), 2);

    let rs = &docs[0];
    assert_eq!(rs["kind"], "ReplicaSet");
    let pod = &rs["spec"]["template"];
    assert_eq!(pod["metadata"]["labels"]["team"], "x");
    assert_eq!(pod["metadata"]["labels"]["traffic"], "yes");
    assert!(rs["spec"]["selector"]["matchLabels"]["traffic"].is_null());
    assert_eq!(pod["spec"]["initContainers"][0]["command"][3], "http://host:30000/svc");
    assert_eq!(pod["spec"]["containers"][0]["args"][0], "--port=8080");
    assert_eq!(
        pod["spec"]["containers"][0]["volumeMounts"][2]["mountPath"],
        "/cfg/b"
    );

    let svc = &docs[1];
    assert_eq!(svc["kind"], "Service");
    assert_eq!(svc["spec"]["type"], "NodePort");
    assert_eq!(svc["spec"]["selector"]["run"], "svc");
}

#[test]
fn render_uses_config_file_defaults() {
    let tmp = tempdir().expect("tempdir");
    let config = tmp.path().join("k0ube.toml");
    fs::write(
        &config,
        "[deployment]\nnamespace = \"staging\"\nreplicas = 2\nlegacy_init_annotation = true\n",
    )
    .expect("write config");

    let output = k0ube(&config)
        .args(["render", "--name", "svc", "--replicas", "4"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let yaml = String::from_utf8(output).expect("utf8");
    let rs: serde_yaml::Value =
        serde_yaml::from_str(yaml.split("---\n").next().expect("first doc")).expect("yaml");
    assert_eq!(rs["metadata"]["namespace"], "staging");
    assert_eq!(rs["spec"]["replicas"], 4);
    let annotations = &rs["spec"]["template"]["metadata"]["annotations"];
    assert!(
        annotations["pod.beta.kubernetes.io/init-containers"]
            .as_str()
            .expect("annotation")
            .contains("http://k0ube-stager/svc")
    );
}

#[test]
fn render_rejects_malformed_labels() {
    let tmp = tempdir().expect("tempdir");
    let assert = k0ube(&tmp.path().join("absent.toml"))
        .args(["render", "--name", "svc", "--labels", "{team: x}"])
        .assert()
        .failure();
    let stderr = String::from_utf8_lossy(&assert.get_output().stderr).to_string();
    assert!(stderr.contains("--labels"), "stderr: {stderr}");
}

#[test]
fn render_rejects_uppercase_name() {
    let tmp = tempdir().expect("tempdir");
    k0ube(&tmp.path().join("absent.toml"))
        .args(["render", "--name", "Svc"])
        .assert()
        .failure();
}

#[test]
fn hello_without_deploy_flag_does_not_deploy() {
    // clap rejects the port only after the mode check has passed
    let mut cmd = Command::cargo_bin("k0ube-hello").expect("bin");
    let assert = cmd.args(["--port", "notaport"]).assert().failure();
    let stdout = String::from_utf8_lossy(&assert.get_output().stdout).to_string();
    assert!(!stdout.contains("Deployment mode"));
}
