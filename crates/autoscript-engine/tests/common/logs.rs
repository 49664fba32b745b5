//! Log capture
//!
//! Installs a thread-local fmt subscriber writing into a shared buffer. With
//! the current-thread test runtime every spawned task logs on the test's own
//! thread, so its output is captured too.

use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::subscriber::DefaultGuard;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Clone, Default)]
pub struct LogCapture {
    buf: Arc<Mutex<Vec<u8>>>,
}

struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

impl Write for CaptureWriter {
    fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    /// Capture logs until the returned guard is dropped
    pub fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let buf = capture.buf.clone();
        let subscriber = FmtSubscriber::builder()
            .with_ansi(false)
            .with_max_level(Level::DEBUG)
            .with_writer(move || CaptureWriter(buf.clone()))
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().unwrap()).into_owned()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.contents().contains(needle)
    }

    pub fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }

    /// Assert that `needle` was logged, showing everything captured if not
    #[track_caller]
    pub fn assert_logged(&self, needle: &str) {
        let contents = self.contents();
        assert!(
            contents.contains(needle),
            "expected log line containing {:?}, captured:\n{}",
            needle,
            contents
        );
    }
}
