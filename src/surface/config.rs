use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::network::params::WeightCoord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Colormap {
    #[default]
    Viridis,
    Grayscale,
}

/// Surface and animation settings, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizationConfig {
    /// Horizontal and vertical weight coordinates of the slice.
    pub axes: [WeightCoord; 2],
    pub range1: (f64, f64),
    pub range2: (f64, f64),
    /// Grid points per axis.
    pub resolution: usize,
    /// Evaluate the surface on at most this many leading rows.
    pub sample_limit: Option<usize>,
    pub width: u32,
    pub height: u32,
    pub colormap: Colormap,
    pub point_size: u32,
    pub line_width: u32,
    /// Where frames are written; defaults to `<model_dir>/plots`.
    pub output_dir: Option<PathBuf>,
}

impl Default for VisualizationConfig {
    fn default() -> Self {
        VisualizationConfig {
            axes: [WeightCoord::w1(0, 0), WeightCoord::w2(0)],
            range1: (-2.0, 2.0),
            range2: (-2.0, 2.0),
            resolution: 30,
            sample_limit: None,
            width: 1200,
            height: 800,
            colormap: Colormap::Viridis,
            point_size: 8,
            line_width: 3,
            output_dir: None,
        }
    }
}

impl VisualizationConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<VisualizationConfig> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| Error::format(path, e.to_string()))
    }

    pub fn frames_dir(&self, model_dir: &Path) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| model_dir.join("plots"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: VisualizationConfig =
            serde_json::from_str(r#"{"axes": ["W1[1,0]", "W2[2]"], "resolution": 12, "colormap": "grayscale"}"#).unwrap();
        assert_eq!(cfg.axes[1], WeightCoord::w2(2));
        assert_eq!(cfg.resolution, 12);
        assert_eq!(cfg.range1, (-2.0, 2.0));
        assert_eq!(cfg.colormap, Colormap::Grayscale);
        assert_eq!(cfg.frames_dir(Path::new("m")), Path::new("m").join("plots"));
    }
}
