use console::Term;
use owo_colors::{OwoColorize, Style};
use std::sync::OnceLock;

static STDOUT: OnceLock<Palette> = OnceLock::new();
static STDERR: OnceLock<Palette> = OnceLock::new();

/// What a piece of output means; the palette decides how it looks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Heading,
    Done,
    Failure,
    Caution,
    Label,
    Faint,
    Quiet,
    /// Keys, usernames and table names
    Identifier,
    /// Undo statements from the audit trail
    Undo,
}

/// Colors for one output stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    colored: bool,
}

impl Palette {
    /// Colored only on a terminal, and never when NO_COLOR / CLICOLOR say so
    pub fn detect(term: &Term) -> Self {
        Self {
            colored: term.is_term() && console::colors_enabled(),
        }
    }

    pub fn plain() -> Self {
        Self { colored: false }
    }

    pub fn is_colored(&self) -> bool {
        self.colored
    }

    pub fn style(&self, role: Role) -> Style {
        if !self.colored {
            return Style::new();
        }
        match role {
            Role::Heading => Style::new().cyan().bold(),
            Role::Done => Style::new().green().bold(),
            Role::Failure => Style::new().red().bold(),
            Role::Caution => Style::new().yellow().bold(),
            Role::Label => Style::new().magenta(),
            Role::Faint => Style::new().white().dimmed(),
            Role::Quiet => Style::new().bright_black(),
            Role::Identifier => Style::new().bright_blue().bold(),
            Role::Undo => Style::new().yellow().italic(),
        }
    }

    pub fn paint(&self, text: &str, role: Role) -> String {
        text.style(self.style(role)).to_string()
    }
}

/// Palette for regular output
pub fn stdout() -> &'static Palette {
    STDOUT.get_or_init(|| Palette::detect(&Term::stdout()))
}

/// Palette for errors and warnings, which go to stderr
pub fn stderr() -> &'static Palette {
    STDERR.get_or_init(|| Palette::detect(&Term::stderr()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_palette_leaves_text_alone() {
        let plain = Palette::plain();
        assert!(!plain.is_colored());
        for role in [Role::Heading, Role::Failure, Role::Identifier, Role::Undo] {
            assert_eq!(plain.paint("DELETE FROM Person WHERE rowid=1", role), "DELETE FROM Person WHERE rowid=1");
        }
    }

    #[test]
    fn test_colored_palette_wraps_text() {
        let colored = Palette { colored: true };
        let painted = colored.paint("12", Role::Identifier);
        assert!(painted.contains("12"));
        assert_ne!(painted, "12");
    }
}
