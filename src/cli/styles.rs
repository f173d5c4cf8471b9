// (c) 2024 Ross Younger
//! Terminal styling for copybench output
//!
//! Print styled text with anstream's `println!` / `eprintln!`, which strip the escapes
//! when the stream is not a terminal. The accessors below return the empty style when
//! colour is switched off, so they can be interpolated unconditionally.

use std::borrow::Cow;
use std::io::IsTerminal as _;

use anstream::ColorChoice;
use anstyle::{AnsiColor, Color, Style};
use clap::builder::styling::Styles;

const fn coloured(colour: AnsiColor) -> Style {
    Style::new().fg_color(Some(Color::Ansi(colour)))
}

const ERROR: Style = coloured(AnsiColor::Red).bold();
const WARNING: Style = coloured(AnsiColor::Yellow).bold();
const INFO: Style = coloured(AnsiColor::Cyan);
const HEADER: Style = coloured(AnsiColor::Yellow).underline();
const RESULT: Style = coloured(AnsiColor::Green).bold();

/// Resets styling to default. This is a re-export of [`anstyle::Reset`].
pub use anstyle::Reset as RESET;

pub(crate) const CLAP_STYLES: Styles = Styles::styled()
    .usage(HEADER)
    .header(HEADER)
    .literal(Style::new().bold())
    .invalid(WARNING)
    .error(ERROR)
    .valid(INFO.bold().underline())
    .placeholder(INFO);

fn when_colour(style: Style) -> Style {
    if use_colours() {
        style
    } else {
        Style::new()
    }
}

/// Style for error messages, if colour is on
#[must_use]
pub fn error() -> Style {
    when_colour(ERROR)
}

/// Style for the benchmark result, if colour is on
#[must_use]
pub fn result() -> Style {
    when_colour(RESULT)
}

/// Are we configured to use terminal colours?
#[must_use]
pub fn use_colours() -> bool {
    match ColorChoice::global() {
        ColorChoice::Auto => colour_from_environment(),
        ColorChoice::Never => false,
        ColorChoice::Always | ColorChoice::AlwaysAnsi => true,
    }
}

/// `NO_COLOR` beats `CLICOLOR_FORCE`; otherwise colour only if stderr is a terminal.
///
/// See <https://bixense.com/clicolors/>.
fn colour_from_environment() -> bool {
    let set = |var: &str| std::env::var_os(var).is_some_and(|v| !v.is_empty());
    if set("NO_COLOR") {
        false
    } else {
        set("CLICOLOR_FORCE") || std::io::stderr().is_terminal()
    }
}

/// Fixes the colour decision for the rest of the process
pub(crate) fn configure_colours() {
    let choice = if colour_from_environment() {
        ColorChoice::Always
    } else {
        ColorChoice::Never
    };
    choice.write_global();
}

/// Removes escape sequences from `s` unless colour is on
pub(crate) fn maybe_strip_color(s: &str) -> Cow<'_, str> {
    if use_colours() {
        Cow::Borrowed(s)
    } else {
        Cow::Owned(anstream::adapter::strip_str(s).to_string())
    }
}
