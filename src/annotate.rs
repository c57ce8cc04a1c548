//! Rendering detections onto frames and saving them.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

use crate::detect::Detection;
use crate::frame::{Frame, FrameKind, SourceId};

pub const DEFAULT_JPEG_QUALITY: u8 = 90;

/// Ultralytics default palette.
const PALETTE: [[u8; 3]; 20] = [
    [0xFF, 0x38, 0x38],
    [0xFF, 0x9D, 0x97],
    [0xFF, 0x70, 0x1F],
    [0xFF, 0xB2, 0x1D],
    [0xCF, 0xD2, 0x31],
    [0x48, 0xF9, 0x0A],
    [0x92, 0xCC, 0x17],
    [0x3D, 0xDB, 0x86],
    [0x1A, 0x93, 0x34],
    [0x00, 0xD4, 0xBB],
    [0x2C, 0x99, 0xA8],
    [0x00, 0xC2, 0xFF],
    [0x34, 0x45, 0x93],
    [0x64, 0x73, 0xFF],
    [0x00, 0x18, 0xEC],
    [0x84, 0x38, 0xFF],
    [0x52, 0x00, 0x85],
    [0xCB, 0x38, 0xFF],
    [0xFF, 0x95, 0xC8],
    [0xFF, 0x37, 0xC7],
];

const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;

pub fn class_color(cls: usize) -> Rgb<u8> {
    Rgb(PALETTE[cls % PALETTE.len()])
}

/// Where the annotated copy of `frame` goes.
///
/// `position` is the frame's place in the prediction call, used to name
/// sourceless frames.
pub fn output_path(out_dir: &Path, frame: &Frame, position: u64) -> PathBuf {
    let stem = frame
        .source
        .path()
        .and_then(|path| path.file_stem())
        .map(|stem| stem.to_string_lossy().into_owned());
    let name = match (&frame.source, stem, frame.kind) {
        (SourceId::Path(_), Some(stem), FrameKind::Still) => format!("{stem}_pred.jpg"),
        (SourceId::Path(_), Some(stem), FrameKind::Sequence) => {
            format!("{stem}_{:08}_pred.jpg", frame.index)
        }
        _ => format!("frame_{position:08}.jpg"),
    };
    out_dir.join(name)
}

/// Copy of `image` with every detection boxed and labelled.
pub fn annotate(image: &RgbImage, detections: &[Detection], names: &[String]) -> RgbImage {
    let mut canvas = image.clone();
    let (width, height) = canvas.dimensions();
    let line_width = (((width + height) as f32 / 2.0 * 0.003).round() as i32).max(2);
    let text_scale = (line_width / 2).max(1);

    for det in detections {
        let color = class_color(det.cls);
        let [x1, y1, x2, y2] = clamp_box(det.xyxy, width, height, line_width);
        for inset in 0..line_width {
            draw_rect(&mut canvas, x1 + inset, y1 + inset, x2 - inset, y2 - inset, color);
        }

        let name = names
            .get(det.cls)
            .cloned()
            .unwrap_or_else(|| format!("class{}", det.cls));
        let label = format!("{} {:.2}", name, det.conf);
        let label_w = label.chars().count() as i32 * (GLYPH_WIDTH + 1) * text_scale + 2;
        let label_h = GLYPH_HEIGHT * text_scale + 4;
        let label_y = if y1 - label_h >= 0 { y1 - label_h } else { y1 };
        fill_rect(&mut canvas, x1, label_y, x1 + label_w, label_y + label_h, color);
        draw_text(
            &mut canvas,
            x1 + 2,
            label_y + 2,
            &label,
            text_scale,
            Rgb([255, 255, 255]),
        );
    }
    canvas
}

/// Round a box to pixels, limited to one line width beyond the canvas.
/// NaN coordinates land on 0.
fn clamp_box(xyxy: [f32; 4], width: u32, height: u32, margin: i32) -> [i32; 4] {
    let margin = margin as f32;
    let (max_x, max_y) = (width as f32 + margin, height as f32 + margin);
    let [x1, y1, x2, y2] = xyxy;
    [
        x1.clamp(-margin, max_x).round() as i32,
        y1.clamp(-margin, max_y).round() as i32,
        x2.clamp(-margin, max_x).round() as i32,
        y2.clamp(-margin, max_y).round() as i32,
    ]
}

/// Encode `image` as JPEG at `path`.
pub fn write_jpeg(image: &RgbImage, path: &Path, quality: u8) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("failed to create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    JpegEncoder::new_with_quality(&mut writer, quality.clamp(1, 100))
        .encode_image(image)
        .map_err(|err| anyhow!("JPEG encode of {} failed: {err}", path.display()))
}

fn put(image: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < image.width() && (y as u32) < image.height() {
        image.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    if right < left || bottom < top {
        return;
    }
    for x in left..=right {
        put(image, x, top, color);
        put(image, x, bottom, color);
    }
    for y in top..=bottom {
        put(image, left, y, color);
        put(image, right, y, color);
    }
}

fn fill_rect(image: &mut RgbImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgb<u8>) {
    let left = left.max(0);
    let top = top.max(0);
    let right = right.min(image.width() as i32 - 1);
    let bottom = bottom.min(image.height() as i32 - 1);
    for y in top..=bottom {
        for x in left..=right {
            put(image, x, y, color);
        }
    }
}

fn draw_text(image: &mut RgbImage, mut x: i32, y: i32, text: &str, scale: i32, color: Rgb<u8>) {
    for ch in text.chars().flat_map(|c| c.to_uppercase()) {
        if let Some(glyph) = glyph_bits(ch) {
            for (row, pattern) in glyph.iter().enumerate() {
                for col in 0..GLYPH_WIDTH {
                    if (pattern >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                        for dy in 0..scale {
                            for dx in 0..scale {
                                put(image, x + col * scale + dx, y + row as i32 * scale + dy, color);
                            }
                        }
                    }
                }
            }
        }
        x += (GLYPH_WIDTH + 1) * scale;
    }
}

fn glyph_bits(ch: char) -> Option<[u8; 7]> {
    let bits = match ch {
        'A' => [0b01110, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'B' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10001, 0b10001, 0b11110],
        'C' => [0b01110, 0b10001, 0b10000, 0b10000, 0b10000, 0b10001, 0b01110],
        'D' => [0b11110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b11110],
        'E' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b11111],
        'F' => [0b11111, 0b10000, 0b11110, 0b10000, 0b10000, 0b10000, 0b10000],
        'G' => [0b01110, 0b10001, 0b10000, 0b10111, 0b10001, 0b10001, 0b01111],
        'H' => [0b10001, 0b10001, 0b10001, 0b11111, 0b10001, 0b10001, 0b10001],
        'I' => [0b01110, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        'J' => [0b00111, 0b00010, 0b00010, 0b00010, 0b00010, 0b10010, 0b01100],
        'K' => [0b10001, 0b10010, 0b10100, 0b11000, 0b10100, 0b10010, 0b10001],
        'L' => [0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b10000, 0b11111],
        'M' => [0b10001, 0b11011, 0b10101, 0b10101, 0b10001, 0b10001, 0b10001],
        'N' => [0b10001, 0b11001, 0b10101, 0b10101, 0b10011, 0b10001, 0b10001],
        'O' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'P' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10000, 0b10000, 0b10000],
        'Q' => [0b01110, 0b10001, 0b10001, 0b10001, 0b10101, 0b10010, 0b01101],
        'R' => [0b11110, 0b10001, 0b10001, 0b11110, 0b10100, 0b10010, 0b10001],
        'S' => [0b01111, 0b10000, 0b01110, 0b00001, 0b00001, 0b10001, 0b01110],
        'T' => [0b11111, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100, 0b00100],
        'U' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01110],
        'V' => [0b10001, 0b10001, 0b10001, 0b10001, 0b10001, 0b01010, 0b00100],
        'W' => [0b10001, 0b10001, 0b10001, 0b10101, 0b10101, 0b10101, 0b01010],
        'X' => [0b10001, 0b10001, 0b01010, 0b00100, 0b01010, 0b10001, 0b10001],
        'Y' => [0b10001, 0b10001, 0b01010, 0b00100, 0b00100, 0b00100, 0b00100],
        'Z' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b10000, 0b11111],
        '0' => [0b01110, 0b10001, 0b10011, 0b10101, 0b11001, 0b10001, 0b01110],
        '1' => [0b00100, 0b01100, 0b00100, 0b00100, 0b00100, 0b00100, 0b01110],
        '2' => [0b01110, 0b10001, 0b00001, 0b00010, 0b00100, 0b01000, 0b11111],
        '3' => [0b11110, 0b00001, 0b00001, 0b01110, 0b00001, 0b00001, 0b11110],
        '4' => [0b00010, 0b00110, 0b01010, 0b10010, 0b11111, 0b00010, 0b00010],
        '5' => [0b11111, 0b10000, 0b11110, 0b00001, 0b00001, 0b10001, 0b01110],
        '6' => [0b00110, 0b01000, 0b10000, 0b11110, 0b10001, 0b10001, 0b01110],
        '7' => [0b11111, 0b00001, 0b00010, 0b00100, 0b01000, 0b01000, 0b01000],
        '8' => [0b01110, 0b10001, 0b10001, 0b01110, 0b10001, 0b10001, 0b01110],
        '9' => [0b01110, 0b10001, 0b10001, 0b01111, 0b00001, 0b00010, 0b01100],
        '.' => [0, 0, 0, 0, 0, 0b00110, 0b00110],
        '-' => [0, 0, 0, 0b11111, 0, 0, 0],
        '_' => [0, 0, 0, 0, 0, 0, 0b11111],
        ' ' => [0; 7],
        _ => return None,
    };
    Some(bits)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(source: SourceId, index: u64, kind: FrameKind) -> Frame {
        Frame::new(RgbImage::new(4, 4), source, index, kind)
    }

    #[test]
    fn names_outputs_by_stem_or_position() {
        let out = Path::new("runs/pred");
        let image = frame(SourceId::Path("data/su7.jpg".into()), 0, FrameKind::Still);
        assert_eq!(output_path(out, &image, 5), out.join("su7_pred.jpg"));

        let video = frame(SourceId::Path("clips/road.mp4".into()), 12, FrameKind::Sequence);
        assert_eq!(
            output_path(out, &video, 3),
            out.join("road_00000012_pred.jpg")
        );

        let camera = frame(SourceId::Index(9), 9, FrameKind::Sequence);
        assert_eq!(output_path(out, &camera, 4), out.join("frame_00000004.jpg"));

        let stream = frame(SourceId::Stream("rtsp://cam/live".into()), 1, FrameKind::Sequence);
        assert_eq!(output_path(out, &stream, 1), out.join("frame_00000001.jpg"));
    }

    #[test]
    fn annotation_draws_box_in_class_colour() {
        let image = RgbImage::new(100, 100);
        let det = Detection {
            xyxy: [20.0, 40.0, 80.0, 90.0],
            cls: 0,
            conf: 0.87,
        };
        let out = annotate(&image, &[det], &["person".to_string()]);
        assert_eq!(out.dimensions(), (100, 100));
        assert_eq!(out.get_pixel(50, 90), &class_color(0));
        assert_eq!(out.get_pixel(50, 65), &Rgb([0, 0, 0]));
        assert_eq!(image.get_pixel(50, 90), &Rgb([0, 0, 0]));
    }

    #[test]
    fn annotation_tolerates_boxes_outside_the_frame() {
        let image = RgbImage::new(10, 10);
        let det = Detection {
            xyxy: [-5.0, -5.0, 50.0, 50.0],
            cls: 25,
            conf: 0.5,
        };
        let out = annotate(&image, &[det], &[]);
        assert_eq!(out.dimensions(), (10, 10));
    }

    #[test]
    fn far_and_infinite_boxes_are_clamped() {
        let image = RgbImage::new(10, 10);
        let dets = [
            Detection {
                xyxy: [0.0, 0.0, 2e8, 2e8],
                cls: 0,
                conf: 0.9,
            },
            Detection {
                xyxy: [f32::INFINITY, 0.0, f32::INFINITY, 5.0],
                cls: 1,
                conf: 0.9,
            },
            Detection {
                xyxy: [f32::NEG_INFINITY, f32::NAN, f32::MAX, f32::MIN],
                cls: 2,
                conf: 0.9,
            },
        ];
        let out = annotate(&image, &dets, &[]);
        assert_eq!(out.dimensions(), (10, 10));
        assert_eq!(clamp_box([0.0, 0.0, 2e8, 2e8], 10, 10, 2), [0, 0, 12, 12]);
        assert_eq!(
            clamp_box([f32::NEG_INFINITY, f32::NAN, 3.4, 7.6], 10, 10, 2),
            [-2, 0, 3, 8]
        );
    }

    #[test]
    fn writes_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jpg");
        write_jpeg(&RgbImage::new(16, 16), &path, DEFAULT_JPEG_QUALITY).unwrap();
        let decoded = image::open(&path).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 16));
    }
}
