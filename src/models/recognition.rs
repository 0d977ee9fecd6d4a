/// Marker that starts the confidence suffix in recognizer output.
pub const SCORE_MARKER: &str = "(score";

/// Result of one invocation of the external recognizer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecognitionOutcome {
    pub result: Option<String>,
    pub error: Option<String>,
}

impl RecognitionOutcome {
    pub fn recognized(result: impl Into<String>) -> Self {
        Self {
            result: Some(result.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(error.into()),
        }
    }

    /// The result text, if the recognizer produced any. An empty result is a failure.
    pub fn recognized_text(&self) -> Option<&str> {
        self.result.as_deref().filter(|text| !text.is_empty())
    }
}

/// Label shown to consumers: the recognizer output up to the score marker.
pub fn display_text(result: &str) -> &str {
    match result.find(SCORE_MARKER) {
        Some(end) => &result[..end],
        None => result,
    }
}
