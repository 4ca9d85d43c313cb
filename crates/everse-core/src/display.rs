use serde::{Deserialize, Serialize};

/// How a song's verses are rendered on the projection display.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DisplaySettings {
    pub font_family: String,
    /// Font size in points.
    pub font_size: f64,
    /// Shrink text to fit the screen instead of overflowing.
    pub auto_fit: bool,
    pub use_fade: bool,
    /// Fade duration in milliseconds.
    pub fade_ms: u32,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            font_family: "Segoe UI".into(),
            font_size: 56.0,
            auto_fit: true,
            use_fade: true,
            fade_ms: 350,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = DisplaySettings::default();
        assert_eq!(s.font_family, "Segoe UI");
        assert!((s.font_size - 56.0).abs() < f64::EPSILON);
        assert!(s.auto_fit);
        assert!(s.use_fade);
        assert_eq!(s.fade_ms, 350);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let s: DisplaySettings = serde_json::from_str(r#"{"fontSize":72,"useFade":false}"#).unwrap();
        assert!((s.font_size - 72.0).abs() < f64::EPSILON);
        assert!(!s.use_fade);
        assert_eq!(s.font_family, "Segoe UI");
        assert_eq!(s.fade_ms, 350);
    }
}
