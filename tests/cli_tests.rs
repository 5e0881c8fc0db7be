use clap::Parser;
use grackle::cli::{run, Cli};

#[test]
fn scaffolds_a_new_application() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().to_str().unwrap();
    run(Cli::parse_from(["grackle", "new", "demo", "--dir", dir])).unwrap();

    let root = tmp.path().join("demo");
    for file in [
        "Cargo.toml",
        "config.yaml",
        "src/main.rs",
        "templates/index.html",
        "static/style.css",
    ] {
        assert!(root.join(file).is_file(), "missing {file}");
    }
    let cargo = std::fs::read_to_string(root.join("Cargo.toml")).unwrap();
    assert!(cargo.contains("name = \"demo\""));
    let main_rs = std::fs::read_to_string(root.join("src/main.rs")).unwrap();
    assert!(main_rs.contains("struct IndexHandler"));

    // The generated configuration must validate.
    let config = root.join("config.yaml");
    run(Cli::parse_from([
        "grackle",
        "check-config",
        config.to_str().unwrap(),
    ]))
    .unwrap();
}

#[test]
fn refuses_to_overwrite_an_existing_directory() {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir(tmp.path().join("demo")).unwrap();
    let dir = tmp.path().to_str().unwrap();
    assert!(run(Cli::parse_from(["grackle", "new", "demo", "--dir", dir])).is_err());
}

#[test]
fn rejects_invalid_application_names() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().to_str().unwrap();
    assert!(run(Cli::parse_from(["grackle", "new", "../evil", "--dir", dir])).is_err());
}

#[test]
fn generates_an_http_handler_skeleton() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("user_handler.rs");
    run(Cli::parse_from([
        "grackle",
        "handler",
        "UserHandler",
        "--out",
        out.to_str().unwrap(),
    ]))
    .unwrap();
    let code = std::fs::read_to_string(&out).unwrap();
    assert!(code.contains("pub struct UserHandler"));
    assert!(code.contains("impl HttpHandler for UserHandler"));
}

#[test]
fn generates_websocket_handler_skeletons() {
    let tmp = tempfile::tempdir().unwrap();
    let out = tmp.path().join("feed_handler.rs");
    run(Cli::parse_from([
        "grackle",
        "handler",
        "FeedHandler",
        "--kind",
        "ws-json",
        "--out",
        out.to_str().unwrap(),
    ]))
    .unwrap();
    let code = std::fs::read_to_string(&out).unwrap();
    assert!(code.contains("impl WsJsonHandler for FeedHandler"));
}

#[test]
fn check_config_fails_on_bad_yaml() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("config.yaml");
    std::fs::write(&path, "handler_cache: 0\n").unwrap();
    assert!(run(Cli::parse_from([
        "grackle",
        "check-config",
        path.to_str().unwrap(),
    ]))
    .is_err());
}
