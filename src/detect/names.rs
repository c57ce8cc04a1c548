//! Class names and input size from ultralytics ONNX metadata.
//!
//! Exports carry `names` as a Python dict literal (`{0: 'person', 1: 'bicycle'}`)
//! and `imgsz` as a list (`[640, 640]`).

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

pub const COCO_NAMES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich",
    "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch",
    "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote",
    "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book",
    "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Ids at or above this are treated as corrupt metadata.
const MAX_CLASS_ID: usize = 10_000;

pub fn coco_names() -> Vec<String> {
    COCO_NAMES.iter().map(|name| name.to_string()).collect()
}

fn names_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(\d+)\s*:\s*(?:'([^']*)'|"([^"]*)")"#).expect("names pattern is valid")
    })
}

/// Parse a `names` metadata value into a dense, id-ordered list.
///
/// Gaps in the id sequence are filled with `class<N>`. Ids of `MAX_CLASS_ID`
/// or more are dropped. Returns an empty list when nothing usable parses.
pub fn parse_names(raw: &str) -> Vec<String> {
    let parsed: BTreeMap<usize, String> = names_pattern()
        .captures_iter(raw)
        .filter_map(|caps| {
            let id: usize = caps.get(1)?.as_str().parse().ok()?;
            let name = caps.get(2).or_else(|| caps.get(3))?.as_str().to_string();
            if id >= MAX_CLASS_ID {
                log::warn!("ignoring class name {:?} with out-of-range id {}", name, id);
                return None;
            }
            Some((id, name))
        })
        .collect();

    let Some(&max_id) = parsed.keys().next_back() else {
        return Vec::new();
    };
    (0..=max_id)
        .map(|id| parsed.get(&id).cloned().unwrap_or_else(|| format!("class{id}")))
        .collect()
}

/// Parse an `imgsz` metadata value, taking the first positive dimension.
pub fn parse_imgsz(raw: &str) -> Option<u32> {
    raw.split(|c: char| !c.is_ascii_digit())
        .filter(|part| !part.is_empty())
        .filter_map(|part| part.parse::<u32>().ok())
        .find(|size| *size > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_python_dict_names() {
        let names = parse_names("{0: 'person', 1: 'bicycle', 2: \"traffic light\"}");
        assert_eq!(names, vec!["person", "bicycle", "traffic light"]);
    }

    #[test]
    fn fills_gaps_in_names() {
        let names = parse_names("{0: 'a', 2: 'c'}");
        assert_eq!(names, vec!["a", "class1", "c"]);
    }

    #[test]
    fn unparsable_names_are_empty() {
        assert!(parse_names("not a dict").is_empty());
    }

    #[test]
    fn huge_class_ids_are_dropped() {
        assert!(parse_names("{4294967295: 'x'}").is_empty());
        assert!(parse_names("{99999999999999999999999: 'x'}").is_empty());
        assert_eq!(parse_names("{0: 'a', 99999: 'b'}"), vec!["a"]);
    }

    #[test]
    fn parses_imgsz_list() {
        assert_eq!(parse_imgsz("[640, 640]"), Some(640));
        assert_eq!(parse_imgsz("320"), Some(320));
        assert_eq!(parse_imgsz("[]"), None);
    }

    #[test]
    fn coco_has_eighty_classes() {
        assert_eq!(coco_names().len(), 80);
        assert_eq!(COCO_NAMES[0], "person");
    }
}
