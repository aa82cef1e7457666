//! Metrics records and the sinks that persist them.

use std::{
    collections::BTreeMap,
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use image::RgbImage;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{UNet3PlusError, UNet3PlusResult};

/// A single logged value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Scalar(f64),
    Image { image: RgbImage, caption: String },
}

/// Metrics of one epoch, keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsRecord {
    entries: BTreeMap<String, MetricValue>,
}

impl MetricsRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_scalar(&mut self, key: impl Into<String>, value: f64) {
        self.entries.insert(key.into(), MetricValue::Scalar(value));
    }

    pub fn insert_image(&mut self, key: impl Into<String>, image: RgbImage, caption: impl Into<String>) {
        self.entries.insert(
            key.into(),
            MetricValue::Image {
                image,
                caption: caption.into(),
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<&MetricValue> {
        self.entries.get(key)
    }

    /// Scalar value of `key`, if present and scalar.
    pub fn scalar(&self, key: &str) -> Option<f64> {
        match self.entries.get(key)? {
            MetricValue::Scalar(value) => Some(*value),
            MetricValue::Image { .. } => None,
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetricValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Run-level summary of the best checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub best_dice: f64,
    pub best_epoch: usize,
    pub best_model_path: PathBuf,
}

/// Destination of per-epoch metrics and the run summary.
pub trait MetricsSink {
    /// Persists one epoch's record.
    fn log(&mut self, record: &MetricsRecord) -> UNet3PlusResult<()>;

    /// Replaces the run summary.
    fn update_summary(&mut self, summary: &RunSummary) -> UNet3PlusResult<()>;
}

impl<S: MetricsSink + ?Sized> MetricsSink for Box<S> {
    fn log(&mut self, record: &MetricsRecord) -> UNet3PlusResult<()> {
        (**self).log(record)
    }

    fn update_summary(&mut self, summary: &RunSummary) -> UNet3PlusResult<()> {
        (**self).update_summary(summary)
    }
}

/// Keeps every record in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    pub records: Vec<MetricsRecord>,
    pub summary: Option<RunSummary>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetricsSink for MemorySink {
    fn log(&mut self, record: &MetricsRecord) -> UNet3PlusResult<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn update_summary(&mut self, summary: &RunSummary) -> UNet3PlusResult<()> {
        self.summary = Some(summary.clone());
        Ok(())
    }
}

/// Writes records to `<dir>/metrics.jsonl`, images to `<dir>/media/` and the summary to
/// `<dir>/summary.json`.
///
/// Each line is a JSON object; images become `{"path": ..., "caption": ...}` with the
/// path relative to `dir`.
#[derive(Debug)]
pub struct JsonLinesSink {
    dir: PathBuf,
    writer: BufWriter<File>,
    step: usize,
}

impl JsonLinesSink {
    pub const METRICS_FILE: &'static str = "metrics.jsonl";
    pub const SUMMARY_FILE: &'static str = "summary.json";
    pub const MEDIA_DIR: &'static str = "media";

    /// Opens (appending) the metrics file under `dir`, creating directories as needed.
    pub fn new(dir: impl AsRef<Path>) -> UNet3PlusResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(dir.join(Self::MEDIA_DIR))?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(Self::METRICS_FILE))?;

        Ok(Self {
            dir,
            writer: BufWriter::new(file),
            step: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn save_image(&self, key: &str, image: &RgbImage) -> UNet3PlusResult<String> {
        let name = format!("{}_step{}.png", key.replace('/', "_"), self.step);
        let relative = format!("{}/{name}", Self::MEDIA_DIR);
        image
            .save(self.dir.join(Self::MEDIA_DIR).join(&name))
            .map_err(|e| UNet3PlusError::MetricsSinkFailed {
                reason: format!("failed to write image {relative}: {e}"),
            })?;
        Ok(relative)
    }
}

impl MetricsSink for JsonLinesSink {
    fn log(&mut self, record: &MetricsRecord) -> UNet3PlusResult<()> {
        let mut object = Map::new();
        object.insert("_step".to_string(), json!(self.step));

        for (key, value) in record.iter() {
            let value = match value {
                MetricValue::Scalar(scalar) => json!(scalar),
                MetricValue::Image { image, caption } => {
                    json!({ "path": self.save_image(key, image)?, "caption": caption })
                }
            };
            object.insert(key.to_string(), value);
        }

        let line = serde_json::to_string(&Value::Object(object)).map_err(|e| {
            UNet3PlusError::MetricsSinkFailed {
                reason: e.to_string(),
            }
        })?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;

        self.step += 1;
        Ok(())
    }

    fn update_summary(&mut self, summary: &RunSummary) -> UNet3PlusResult<()> {
        let contents = serde_json::to_string_pretty(summary).map_err(|e| {
            UNet3PlusError::MetricsSinkFailed {
                reason: e.to_string(),
            }
        })?;
        fs::write(self.dir.join(Self::SUMMARY_FILE), contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record() -> MetricsRecord {
        let mut record = MetricsRecord::new();
        record.insert_scalar("total/train_loss", 0.25);
        record.insert_scalar("epoch", 1.0);
        record.insert_image("worst_sample_1", RgbImage::new(4, 2), "Dice Score: 0.5000");
        record
    }

    #[test]
    fn record_accessors() {
        let record = sample_record();
        assert_eq!(record.len(), 3);
        assert_eq!(record.scalar("total/train_loss"), Some(0.25));
        assert_eq!(record.scalar("worst_sample_1"), None);
        assert!(record.contains_key("epoch"));
        assert_eq!(
            record.keys().collect::<Vec<_>>(),
            vec!["epoch", "total/train_loss", "worst_sample_1"]
        );
    }

    #[test]
    fn memory_sink_keeps_records() {
        let mut sink = MemorySink::new();
        sink.log(&sample_record()).unwrap();
        sink.update_summary(&RunSummary {
            best_dice: 0.9,
            best_epoch: 3,
            best_model_path: PathBuf::from("a/best_dice_0.9000.mpk"),
        })
        .unwrap();

        assert_eq!(sink.records.len(), 1);
        assert_eq!(sink.summary.unwrap().best_epoch, 3);
    }

    #[test]
    fn json_lines_sink_writes_lines_images_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonLinesSink::new(dir.path()).unwrap();

        sink.log(&sample_record()).unwrap();
        sink.log(&sample_record()).unwrap();
        let summary = RunSummary {
            best_dice: 0.75,
            best_epoch: 2,
            best_model_path: dir.path().join("best_dice_0.7500.mpk"),
        };
        sink.update_summary(&summary).unwrap();

        let contents = fs::read_to_string(dir.path().join(JsonLinesSink::METRICS_FILE)).unwrap();
        let lines: Vec<Value> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["_step"], json!(1));
        assert_eq!(lines[0]["total/train_loss"], json!(0.25));
        assert_eq!(lines[0]["worst_sample_1"]["caption"], json!("Dice Score: 0.5000"));

        let image_path = lines[0]["worst_sample_1"]["path"].as_str().unwrap();
        assert!(dir.path().join(image_path).exists());

        let restored: RunSummary = serde_json::from_str(
            &fs::read_to_string(dir.path().join(JsonLinesSink::SUMMARY_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(restored, summary);
    }
}
