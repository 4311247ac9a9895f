//! Terminal styling for command output.

use console::Style;

use scmbridge_core::BackendKind;

/// Success line (green with checkmark).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Error line (red with cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Warning line (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Backend label: svn in blue, git in green.
pub fn backend(kind: BackendKind) -> String {
    let style = match kind {
        BackendKind::Svn => Style::new().blue().bold(),
        BackendKind::Git => Style::new().green().bold(),
    };
    style.apply_to(kind.name()).to_string()
}
