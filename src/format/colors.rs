//! ANSI color handling for rendered lines.
//!
//! Colors wrap the entire rendered line in the level's style so scanning a
//! console picks whole lines out by color; individual tokens are never
//! styled on their own. Highlight rules re-style substrings and then restore
//! the surrounding line style.

use crate::config::Highlighters;

/// Converts a color name to its ANSI color code.
///
/// Supports both named colors and direct ANSI codes. Color names are
/// case-insensitive; numeric codes and unknown names pass through unchanged.
///
/// # Supported Color Names
///
/// - Standard colors: BLACK, RED, GREEN, YELLOW, BLUE, MAGENTA, CYAN, WHITE
/// - Bright colors: BRIGHT_BLACK, BRIGHT_RED, BRIGHT_GREEN, BRIGHT_YELLOW,
///   BRIGHT_BLUE, BRIGHT_MAGENTA, BRIGHT_CYAN, BRIGHT_WHITE
/// - Aliases: GRAY (same as BRIGHT_BLACK)
pub fn color_name_to_code(color: &str) -> String {
    match color.to_uppercase().as_str() {
        "BLACK" => "30",
        "RED" => "31",
        "GREEN" => "32",
        "YELLOW" => "33",
        "BLUE" => "34",
        "MAGENTA" => "35",
        "CYAN" => "36",
        "WHITE" => "37",
        "BRIGHT_BLACK" | "GRAY" => "90",
        "BRIGHT_RED" => "91",
        "BRIGHT_GREEN" => "92",
        "BRIGHT_YELLOW" => "93",
        "BRIGHT_BLUE" => "94",
        "BRIGHT_MAGENTA" => "95",
        "BRIGHT_CYAN" => "96",
        "BRIGHT_WHITE" => "97",
        // Numeric ANSI codes pass through.
        _ if color.chars().all(|c| c.is_ascii_digit()) => color,
        // Unknown names pass through as custom codes.
        _ => color,
    }
    .to_string()
}

/// Wraps a whole line in the given style.
pub fn wrap_line(line: &str, style: &str) -> String {
    let code = color_name_to_code(style);
    format!("\x1b[{}m{}\x1b[0m", code, line)
}

/// Applies substring highlighters to a line. When `line_style` is given the
/// line style is restored after each highlighted run instead of resetting.
pub fn apply_highlights(line: &str, highlighters: &Highlighters, line_style: Option<&str>) -> String {
    if highlighters.rules.is_empty() {
        return line.to_string();
    }
    let restore = match line_style {
        Some(style) => format!("\x1b[{}m", color_name_to_code(style)),
        None => "\x1b[0m".to_string(),
    };
    let mut out = line.to_string();
    for rule in &highlighters.rules {
        if rule.needle.is_empty() {
            continue;
        }
        let code = color_name_to_code(&rule.style);
        let styled = format!("\x1b[{}m{}{}", code, rule.needle, restore);
        out = out.replace(&rule.needle, &styled);
    }
    out
}
