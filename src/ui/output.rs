use crate::ui::theme::{self, Role};
use crate::ui::Icons;

pub fn header(text: &str) {
    println!("{} {}", Icons::ROCKET, theme::stdout().paint(text, Role::Heading));
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, theme::stdout().paint(label, Role::Done));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, theme::stderr().paint(label, Role::Failure));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, theme::stderr().paint(label, Role::Caution));
}

pub fn info(label: &str, value: &str) {
    let palette = theme::stdout();
    println!(
        "{} {}: {}",
        palette.paint(Icons::INFO, Role::Label),
        palette.paint(label, Role::Faint),
        value
    );
}

pub fn section(title: &str) {
    println!();
    println!("━{}━", theme::stdout().paint(title, Role::Heading));
}

pub fn summary_row(label: &str, value: &str) {
    println!("  {} {}", theme::stdout().paint(label, Role::Faint), value);
}

pub fn dim(text: &str) -> String {
    theme::stdout().paint(text, Role::Faint)
}

pub fn muted(text: &str) -> String {
    theme::stdout().paint(text, Role::Quiet)
}

pub fn accent(text: &str) -> String {
    theme::stdout().paint(text, Role::Identifier)
}

/// An undo statement from the audit trail
pub fn undo(sql: &str) -> String {
    theme::stdout().paint(sql, Role::Undo)
}
