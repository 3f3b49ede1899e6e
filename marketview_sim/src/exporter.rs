//! JSON exporter for offline inspection of scenario runs.
//!
//! Captures what the viewer would have drawn (smoothed positions, trust,
//! flash state) alongside the server metrics, a frame every few renders.

use crate::error::SimError;
use marketview_core::{MetricSet, Viewer};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// A single captured frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// Tick of the snapshot being displayed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tick: Option<u64>,

    /// Entities as drawn
    pub entities: Vec<ExportEntity>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricSet>,
}

/// One drawn entity, in simulation space.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportEntity {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub trust: f64,
    pub trade_count: u64,
    pub flashing: bool,
}

impl ExportFrame {
    /// Captures the viewer's current visual state.
    pub fn capture(viewer: &Viewer, now: Duration) -> Self {
        let entities = viewer
            .visual_entities()
            .iter()
            .map(|v| ExportEntity {
                id: v.id,
                x: v.smoothed.x,
                y: v.smoothed.y,
                trust: v.trust(),
                trade_count: v.trade_count(),
                flashing: viewer.is_flashing(v.id, now),
            })
            .collect();

        Self {
            time_sec: now.as_secs_f64(),
            tick: viewer.current_snapshot().map(|s| s.tick),
            entities,
            metrics: viewer.latest_metrics(),
        }
    }
}

/// Complete scenario export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<ExportFrame>,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: ExportFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marketview_core::{Entity, Snapshot, SnapshotBuffer, ViewerConfig};

    #[test]
    fn test_capture_and_write() {
        let buffer = SnapshotBuffer::shared();
        buffer.push(Snapshot::new(4, vec![Entity::new(1, 10.0, 20.0, 0.6, 2)], MetricSet::default()));
        let mut viewer = Viewer::new(ViewerConfig::default(), buffer);
        viewer.advance(Duration::from_millis(100));

        let mut export = SimExport::new("steady", 42);
        export.add_frame(ExportFrame::capture(&viewer, Duration::from_millis(100)));
        export.finalize(true, None);

        assert_eq!(export.frames.len(), 1);
        assert_eq!(export.frames[0].tick, Some(4));
        assert_eq!(export.frames[0].entities[0].x, 10.0);
        assert!((export.duration_sec - 0.1).abs() < 1e-9);

        let path = std::env::temp_dir().join(format!("marketview_export_{}.json", std::process::id()));
        export.write_to_file(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        let restored: SimExport = serde_json::from_str(&text).unwrap();
        assert!(restored.passed);
        assert_eq!(restored.frames[0].entities[0].trade_count, 2);
        assert!(!text.contains("failure_reason"));
    }
}
