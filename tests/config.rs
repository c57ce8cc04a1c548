use std::path::PathBuf;
use std::sync::Mutex;

use tempfile::NamedTempFile;

use yolo_det::config::AppConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "YOLO_DET_CONFIG",
        "YOLO_DET_WEIGHTS",
        "YOLO_DET_DEVICE",
        "YOLO_DET_OUT_DIR",
        "YOLO_DET_CONF",
        "YOLO_DET_IOU",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        [predict]
        weights = "models/site.onnx"
        conf = 0.4
        iou = 0.6
        imgsz = 320
        classes = [0, 2]
        vid_stride = 3

        [package]
        source_dirs = ["src", "assets"]
        bundle = ["zip", "-r", "{archive}", "."]
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("YOLO_DET_CONFIG", file.path());
    std::env::set_var("YOLO_DET_WEIGHTS", "models/override.onnx");
    std::env::set_var("YOLO_DET_CONF", "0.55");
    std::env::set_var("YOLO_DET_OUT_DIR", "runs/site");

    let cfg = AppConfig::load().expect("load config");

    assert_eq!(cfg.predict.weights, PathBuf::from("models/override.onnx"));
    assert_eq!(cfg.predict.conf, 0.55);
    assert_eq!(cfg.predict.iou, 0.6);
    assert_eq!(cfg.predict.imgsz, 320);
    assert_eq!(cfg.predict.classes, Some(vec![0, 2]));
    assert_eq!(cfg.predict.vid_stride, 3);
    assert_eq!(cfg.predict.out_dir, PathBuf::from("runs/site"));
    assert!(cfg.predict.save);
    assert_eq!(
        cfg.package.source_dirs,
        vec![PathBuf::from("src"), PathBuf::from("assets")]
    );
    assert_eq!(cfg.package.bundle[0], "zip");
    assert_eq!(cfg.package.compile, vec!["cargo", "build", "--release"]);

    clear_env();
}

#[test]
fn defaults_apply_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = AppConfig::load().expect("load defaults");
    assert_eq!(cfg.predict.weights, PathBuf::from("data/yolo11n.onnx"));
    assert_eq!(cfg.predict.device, None);
    assert_eq!(cfg.predict.out_dir, PathBuf::from("runs/pred"));
    assert_eq!(cfg.package.build_dir, PathBuf::from("build"));
}

#[test]
fn rejects_invalid_env_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("YOLO_DET_IOU", "high");
    let err = AppConfig::load().unwrap_err();
    assert!(err.to_string().contains("YOLO_DET_IOU"));

    std::env::set_var("YOLO_DET_IOU", "1.5");
    assert!(AppConfig::load().is_err());
    clear_env();

    std::env::set_var("YOLO_DET_DEVICE", "tpu");
    assert!(AppConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("YOLO_DET_CONFIG", "/nonexistent/yolo-det.toml");
    let err = AppConfig::load().unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));

    clear_env();
}
