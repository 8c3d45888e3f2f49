//! Status line and text volume meter for the terminal.

use atlasvoice_core::{SessionState, StateWatch, VolumeMeter};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const BAR_WIDTH: usize = 30;
const REFRESH: Duration = Duration::from_millis(100);

pub fn status_label(state: SessionState) -> &'static str {
    match state {
        SessionState::Connecting => "Connecting...",
        SessionState::Connected => "Online with Atlas",
        SessionState::Error => "Connection error",
        SessionState::Disconnected => "Call ended",
    }
}

pub fn render_bar(volume: f32, width: usize) -> String {
    let level = if volume.is_finite() { volume.clamp(0.0, 1.0) } else { 0.0 };
    let filled = (level * width as f32).round() as usize;
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

fn render_line(state: SessionState, volume: f32, show_bar: bool) -> String {
    if show_bar && state == SessionState::Connected {
        format!("{:<20} {}", status_label(state), render_bar(volume, BAR_WIDTH))
    } else {
        status_label(state).to_string()
    }
}

/// Redraws one stderr line until stopped or the call ends.
pub struct StatusMeter {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl StatusMeter {
    pub fn spawn(state: StateWatch, volume: VolumeMeter, show_bar: bool) -> io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let r = running.clone();

        let handle = thread::Builder::new()
            .name("atlasvoice-meter".into())
            .spawn(move || {
                let mut stderr = io::stderr();
                while r.load(Ordering::Relaxed) {
                    let current = state.get();
                    let line = render_line(current, volume.get(), show_bar);
                    let _ = write!(stderr, "\r\x1b[2K{}", line);
                    let _ = stderr.flush();
                    if current.is_terminal() {
                        break;
                    }
                    thread::sleep(REFRESH);
                }
                let _ = writeln!(stderr);
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatusMeter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels() {
        assert_eq!(status_label(SessionState::Connecting), "Connecting...");
        assert_eq!(status_label(SessionState::Connected), "Online with Atlas");
        assert_eq!(status_label(SessionState::Error), "Connection error");
        assert_eq!(status_label(SessionState::Disconnected), "Call ended");
    }

    #[test]
    fn test_render_bar_bounds() {
        assert_eq!(render_bar(0.0, 4), "[----]");
        assert_eq!(render_bar(0.5, 4), "[##--]");
        assert_eq!(render_bar(1.0, 4), "[####]");
        assert_eq!(render_bar(3.0, 4), "[####]");
        assert_eq!(render_bar(-1.0, 4), "[----]");
        assert_eq!(render_bar(f32::NAN, 4), "[----]");
    }

    #[test]
    fn test_bar_only_while_connected() {
        assert_eq!(
            render_line(SessionState::Connecting, 0.9, true),
            "Connecting..."
        );
        let line = render_line(SessionState::Connected, 1.0, true);
        assert!(line.starts_with("Online with Atlas"));
        assert!(line.ends_with(&format!("[{}]", "#".repeat(BAR_WIDTH))));
        assert_eq!(
            render_line(SessionState::Connected, 1.0, false),
            "Online with Atlas"
        );
    }
}
