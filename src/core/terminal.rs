use console::{Alignment, Emoji, pad_str, style};

pub static SATELLITE: Emoji<'_, '_> = Emoji("📡 ", "");
pub static PUBLISHED: Emoji<'_, '_> = Emoji("📤 ", "");
pub static WARN_ICON: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ERROR_ICON: Emoji<'_, '_> = Emoji("❌ ", "x ");

/// Width of the label column in startup status lines.
const LABEL_WIDTH: usize = 6;

/// Startup banner: `📡 Starting telemetry agent`.
pub fn print_step(step: &str) {
    println!("{}{}", SATELLITE, style(step).bold());
}

/// One aligned `label  value` row under the banner.
pub fn print_status(label: &str, value: &str) {
    println!("{}", status_line(label, value));
}

fn status_line(label: &str, value: &str) -> String {
    let label = pad_str(label, LABEL_WIDTH, Alignment::Left, None);
    format!("   {} {}", style(label).dim(), value)
}

/// Outcome of a one-shot action such as pipe publishing.
pub fn print_success(msg: &str) {
    println!("{}{}", PUBLISHED, style(msg).green());
}

// Diagnostics go to stderr so piped stdout stays clean.

pub fn print_warn(msg: &str) {
    eprintln!("{}{}", WARN_ICON, style(msg).yellow());
}

pub fn print_error(msg: &str) {
    eprintln!("{}{} {}", ERROR_ICON, style("telemetry-agent:").red().bold(), style(msg).red());
}

pub fn print_goodbye() {
    println!("{}{}", SATELLITE, style("Telemetry agent stopped.").dim());
}
