use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Spinner shown while a chat is being fetched or published.
/// - Yellow braille frames followed by the current stage (`{wide_msg}`).
pub fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("\x1b[33m{spinner}\x1b[0m {wide_msg}")
        .unwrap()
        .tick_strings(&["⣾", "⣽", "⣻", "⢿", "⡿", "⣟", "⣯", "⣷"])
}

/// Green check mark and the final message.
pub fn ok_style() -> ProgressStyle {
    ProgressStyle::with_template("\x1b[32m✔\x1b[0m {wide_msg}").unwrap()
}

/// Red cross and the error.
pub fn err_style() -> ProgressStyle {
    ProgressStyle::with_template("\x1b[31m✘\x1b[0m {wide_msg}").unwrap()
}

/// Start a ticking spinner with `msg`.
pub fn spinner(msg: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(spinner_style());
    pb.set_message(msg.into());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn finish_ok(pb: &ProgressBar, msg: impl Into<String>) {
    pb.set_style(ok_style());
    pb.finish_with_message(msg.into());
}

pub fn finish_err(pb: &ProgressBar, msg: impl Into<String>) {
    pb.set_style(err_style());
    pb.finish_with_message(msg.into());
}
