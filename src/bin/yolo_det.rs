//! yolo_det - run a YOLO detection model over images, video, streams or cameras
//!
//! Results are printed one line per frame (`--json` for JSON lines) and,
//! unless `--no-save` is given, annotated frames are written to `--out`.

use anyhow::Result;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;

use yolo_det::{AppConfig, FrameResult, Source, StopFlag, YoloDetector};

#[derive(Parser, Debug)]
#[command(name = "yolo_det", about = "Run YOLO object detection on a source")]
struct Args {
    /// Image, video, directory, stream URL or camera index (repeat for an image list)
    #[arg(long, short, required = true, value_name = "SOURCE")]
    source: Vec<String>,

    /// ONNX weight file (`stub://` for the synthetic detector)
    #[arg(long, value_name = "PATH")]
    weights: Option<PathBuf>,

    /// Compute device (cpu, cuda, cuda:N, N)
    #[arg(long)]
    device: Option<String>,

    /// Confidence threshold
    #[arg(long)]
    conf: Option<f32>,

    /// NMS IoU threshold
    #[arg(long)]
    iou: Option<f32>,

    /// Do not write annotated frames
    #[arg(long)]
    no_save: bool,

    /// Directory for annotated frames
    #[arg(long, value_name = "DIR")]
    out: Option<PathBuf>,

    /// Model input size (multiple of 32)
    #[arg(long)]
    imgsz: Option<u32>,

    /// Keep at most N detections per frame
    #[arg(long)]
    max_det: Option<usize>,

    /// Keep only these class ids (comma separated)
    #[arg(long, value_delimiter = ',')]
    classes: Option<Vec<usize>>,

    /// Suppress overlapping boxes across classes
    #[arg(long)]
    agnostic_nms: bool,

    /// Keep every Nth video frame
    #[arg(long)]
    vid_stride: Option<u32>,

    /// Stop after N frames
    #[arg(long)]
    max_frames: Option<u64>,

    /// Print one JSON object per frame
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = AppConfig::load()?;
    apply_args(&mut cfg, &args);
    cfg.predict.validate()?;

    let source = if args.source.len() == 1 {
        Source::parse(&args.source[0])?
    } else {
        Source::parse_many(&args.source)?
    };

    let stop = StopFlag::new();
    if let Err(err) = stop.install_ctrlc() {
        log::warn!("{:#}", err);
    }

    let mut predict_args = cfg.predict.predict_args();
    predict_args.engine.max_frames = args.max_frames;
    predict_args.engine.stop = stop;

    let mut detector = YoloDetector::new(&cfg.predict.weights, cfg.predict.device.as_deref())?;
    let names = detector.class_names().to_vec();
    log::info!("source: {}", source);

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut frames = 0u64;
    let mut detections = 0usize;
    for result in detector.predict_iter(source, &predict_args)? {
        let result = result?;
        frames += 1;
        detections += result.detections.len();
        if args.json {
            writeln!(out, "{}", serde_json::to_string(&result)?)?;
        } else {
            writeln!(out, "{}", summarize(&result, &names))?;
        }
    }

    log::info!("{} frames, {} detections", frames, detections);
    if predict_args.save {
        log::info!("annotated frames in {}", predict_args.out_dir.display());
    }
    Ok(())
}

fn summarize(result: &FrameResult, names: &[String]) -> String {
    let mut line = format!("{}: {} detections", result.source, result.detections.len());
    for det in &result.detections {
        let name = names.get(det.cls).map(String::as_str).unwrap_or("?");
        line.push_str(&format!(
            " | {} {:.2} [{:.0}, {:.0}, {:.0}, {:.0}]",
            name, det.conf, det.xyxy[0], det.xyxy[1], det.xyxy[2], det.xyxy[3]
        ));
    }
    line
}

fn apply_args(cfg: &mut AppConfig, args: &Args) {
    let predict = &mut cfg.predict;
    if let Some(weights) = &args.weights {
        predict.weights = weights.clone();
    }
    if let Some(device) = &args.device {
        predict.device = Some(device.clone());
    }
    if let Some(conf) = args.conf {
        predict.conf = conf;
    }
    if let Some(iou) = args.iou {
        predict.iou = iou;
    }
    if args.no_save {
        predict.save = false;
    }
    if let Some(out) = &args.out {
        predict.out_dir = out.clone();
    }
    if let Some(imgsz) = args.imgsz {
        predict.imgsz = imgsz;
    }
    if let Some(max_det) = args.max_det {
        predict.max_det = max_det;
    }
    if let Some(classes) = &args.classes {
        predict.classes = Some(classes.clone());
    }
    if args.agnostic_nms {
        predict.agnostic_nms = true;
    }
    if let Some(vid_stride) = args.vid_stride {
        predict.vid_stride = vid_stride;
    }
}
