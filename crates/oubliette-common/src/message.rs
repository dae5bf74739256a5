// message.rs — user-facing message channel
//
// mpr() is the single channel for anything the player should see. Tests (and
// callers that want to present messages themselves) can redirect output into
// a capture buffer. Diagnostics that should never interrupt play go through
// tracing::debug! at the call site instead.

use std::sync::Mutex;

static CAPTURE: Mutex<Option<String>> = Mutex::new(None);

/// Begin capturing mpr() output instead of printing it.
pub fn begin_capture() {
    let mut buf = CAPTURE.lock().unwrap();
    *buf = Some(String::new());
}

/// Stop capturing and return everything captured since begin_capture().
pub fn end_capture() -> Option<String> {
    let mut buf = CAPTURE.lock().unwrap();
    buf.take()
}

/// Print a message to the player.
pub fn mpr(msg: &str) {
    {
        let mut buf = CAPTURE.lock().unwrap();
        if let Some(ref mut s) = *buf {
            s.push_str(msg);
            if !msg.ends_with('\n') {
                s.push('\n');
            }
            return;
        }
    }
    if msg.ends_with('\n') {
        print!("{}", msg);
    } else {
        println!("{}", msg);
    }
}
