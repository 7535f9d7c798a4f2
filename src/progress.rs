use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

const RUNNING: &str = "{spinner:.yellow} {wide_msg}";
const DONE: &str = "{prefix:.green} {wide_msg}";
const FAILED: &str = "{prefix:.red} {wide_msg}";
const FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Start a ticking spinner showing `msg` on stderr.
pub fn spinner(msg: impl Into<String>) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(style(RUNNING).tick_strings(FRAMES));
    pb.set_message(msg.into());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Freeze the line with a check mark.
pub fn finish_ok(pb: &ProgressBar, msg: impl Into<String>) {
    finish(pb, DONE, "ok", msg.into());
}

/// Freeze the line with a failure marker.
pub fn finish_err(pb: &ProgressBar, msg: impl Into<String>) {
    finish(pb, FAILED, "failed", msg.into());
}

fn finish(pb: &ProgressBar, template: &str, marker: &'static str, msg: String) {
    pb.set_style(style(template));
    pb.set_prefix(marker);
    pb.finish_with_message(msg);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn templates_parse() {
        for t in [RUNNING, DONE, FAILED] {
            assert!(ProgressStyle::with_template(t).is_ok(), "{t}");
        }
    }

    #[test]
    fn finish_keeps_message_and_marker() {
        let pb = ProgressBar::hidden();
        finish_err(&pb, "push (error: rejected)");
        assert!(pb.is_finished());
        assert_eq!(pb.message(), "push (error: rejected)");
        assert_eq!(pb.prefix(), "failed");
    }
}
