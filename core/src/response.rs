use std::time::Duration;

/// Separates the server's timestamp/level decoration from the payload.
pub const RESPONSE_DELIMITER: &str = "]: ";

const MIN_WINDOW: Duration = Duration::from_millis(10);
const MAX_WINDOW: Duration = Duration::from_secs(60);

/// Returns the payload after the first delimiter, or `None` for lines that
/// carry no decoration.
pub fn strip_decoration(line: &str) -> Option<&str> {
    line.split_once(RESPONSE_DELIMITER)
        .map(|(_, payload)| payload)
}

pub fn clamp_window(window: Duration) -> Duration {
    window.clamp(MIN_WINDOW, MAX_WINDOW)
}

/// Output fragments collected while a capture window is open.
#[derive(Debug, Default)]
pub(crate) struct ResponseCapture {
    fragments: Vec<String>,
}

impl ResponseCapture {
    pub(crate) fn observe(&mut self, line: &str) {
        if let Some(payload) = strip_decoration(line) {
            self.fragments.push(payload.to_string());
        }
    }

    pub(crate) fn finish(self) -> String {
        self.fragments.join("\n")
    }
}
