//! Progress bar styling
// (c) 2024 Ross Younger

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Maximum update frequency we will use for the progress display
pub(crate) const MAX_UPDATE_FPS: u8 = 20;

/// Single-line style for the run timer. Position and length are in milliseconds.
///
/// ```text
/// 800000 x 4 [==========================            ] 2s/3s
/// ```
const PROGRESS_STYLE: &str = "{msg:.dim} {wide_bar:.cyan} {elapsed}/{duration_secs}";

/// Adds a run timer for a load generator run of `duration_seconds` to `display`
pub(crate) fn progress_bar(
    display: &MultiProgress,
    duration_seconds: i32,
    msg: String,
) -> ProgressBar {
    let millis = u64::try_from(duration_seconds).unwrap_or(0) * 1000;
    let style = ProgressStyle::with_template(PROGRESS_STYLE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .with_key(
            "duration_secs",
            move |_state: &indicatif::ProgressState, w: &mut dyn std::fmt::Write| {
                let _ = write!(w, "{}s", millis / 1000);
            },
        );
    display.add(ProgressBar::new(millis).with_style(style).with_message(msg))
}
