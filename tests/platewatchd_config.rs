use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use plate_watch::config::PlatewatchConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "PLATEWATCH_CONFIG",
        "PLATEWATCH_SOURCE_ID",
        "PLATEWATCH_STREAM_URL",
        "PLATEWATCH_DB_PATH",
        "PLATEWATCH_OUTPUT_DIR",
        "PLATEWATCH_SKIP_FRAMES",
        "PLATEWATCH_DUPLICATE_WINDOW_SECS",
        "PLATEWATCH_PERSIST_ALL",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source_id": "gate-north",
        "stream_url": "rtsp://10.0.0.12/stream1",
        "db_path": "plates_prod.db",
        "output_dir": "/var/lib/platewatch",
        "skip_frames": 4,
        "min_confidence": 0.5,
        "duplicate_window_secs": 45,
        "similarity_threshold": 0.9,
        "auto_cleanup_days": 14,
        "stream": { "width": 1280, "height": 720, "target_fps": 15 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("PLATEWATCH_CONFIG", file.path());
    std::env::set_var("PLATEWATCH_SKIP_FRAMES", "1");
    std::env::set_var("PLATEWATCH_PERSIST_ALL", "true");

    let cfg = PlatewatchConfig::load().expect("load config");
    assert_eq!(cfg.source_id, "gate-north");
    assert_eq!(cfg.stream_url, "rtsp://10.0.0.12/stream1");
    assert_eq!(cfg.db_path, "plates_prod.db");
    assert_eq!(cfg.skip_frames, 1);
    assert_eq!(cfg.min_confidence, 0.5);
    assert_eq!(cfg.duplicate_window, Duration::from_secs(45));
    assert_eq!(cfg.auto_cleanup_days, Some(14));
    assert!(cfg.persist_all);
    assert!(!cfg.route_policy().persist_only_valid);

    let rtsp = cfg.rtsp_config();
    assert_eq!(rtsp.width, 1280);
    assert_eq!(rtsp.height, 720);
    assert_eq!(rtsp.target_fps, 15);

    clear_env();
}

#[test]
fn toml_config_is_selected_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
source_id = "lane-2"
stream_url = "stub://lane-2"
duplicate_filter = false
annotate = true

[stream]
target_fps = 5
"#;
    file.write_all(toml.as_bytes()).expect("write config");

    let cfg = PlatewatchConfig::load_from(Some(file.path())).expect("load config");
    assert_eq!(cfg.source_id, "lane-2");
    assert!(!cfg.duplicate_filter);
    assert!(cfg.annotate);
    assert_eq!(cfg.stream.target_fps, 5);
    assert_eq!(cfg.stream.width, 640);
}

#[test]
fn explicit_path_wins_over_env_path() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut env_file = NamedTempFile::new().expect("temp config");
    env_file
        .write_all(br#"{ "source_id": "from-env" }"#)
        .expect("write config");
    let mut cli_file = NamedTempFile::new().expect("temp config");
    cli_file
        .write_all(br#"{ "source_id": "from-flag" }"#)
        .expect("write config");

    std::env::set_var("PLATEWATCH_CONFIG", env_file.path());
    let cfg = PlatewatchConfig::load_from(Some(cli_file.path())).expect("load config");
    assert_eq!(cfg.source_id, "from-flag");

    clear_env();
}

#[test]
fn unknown_keys_are_rejected() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "source_id": "cam-1", "retention_hours": 3 }"#)
        .expect("write config");

    let err = PlatewatchConfig::load_from(Some(file.path())).expect_err("unknown key");
    assert!(err.to_string().contains("invalid config file"));
}

#[test]
fn malformed_env_override_fails_loading() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("PLATEWATCH_SKIP_FRAMES", "-3");
    let err = PlatewatchConfig::load().expect_err("negative skip");
    assert!(err.to_string().contains("PLATEWATCH_SKIP_FRAMES"));

    std::env::set_var("PLATEWATCH_SKIP_FRAMES", "2");
    std::env::set_var("PLATEWATCH_PERSIST_ALL", "sometimes");
    let err = PlatewatchConfig::load().expect_err("bad bool");
    assert!(err.to_string().contains("PLATEWATCH_PERSIST_ALL"));

    clear_env();
}

#[test]
fn out_of_range_file_values_fail_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "min_confidence": 1.4 }"#)
        .expect("write config");

    let err = PlatewatchConfig::load_from(Some(file.path())).expect_err("range");
    assert!(err.to_string().contains("min_confidence"));
}
