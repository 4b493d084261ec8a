pub use colored::{Color, Colorize};

#[derive(Debug, Clone, Default)]
pub struct ColorScheme {
    pub foreground: Option<Color>,
    pub bold: bool,
    pub dimmed: bool,
}

/// Styles for each kind of line the assistant prints.
#[derive(Debug, Clone)]
pub struct Theme {
    pub header: ColorScheme,
    pub explanation: ColorScheme,
    pub command: ColorScheme,
    pub warning: ColorScheme,
    pub success: ColorScheme,
    pub failure: ColorScheme,
    pub muted: ColorScheme,
}

fn fg(color: Color, bold: bool) -> ColorScheme {
    ColorScheme {
        foreground: Some(color),
        bold,
        dimmed: false,
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            header: fg(Color::Blue, true),
            explanation: fg(Color::Yellow, false),
            command: fg(Color::Green, true),
            warning: fg(Color::Red, true),
            success: fg(Color::Green, false),
            failure: fg(Color::Red, false),
            muted: ColorScheme {
                foreground: None,
                bold: false,
                dimmed: true,
            },
        }
    }
}

impl Theme {
    pub fn dark() -> Self {
        Self::default()
    }

    pub fn light() -> Self {
        Self {
            header: fg(Color::BrightBlue, true),
            explanation: fg(Color::Magenta, false),
            command: fg(Color::BrightGreen, true),
            warning: fg(Color::BrightRed, true),
            success: fg(Color::BrightGreen, false),
            failure: fg(Color::BrightRed, false),
            muted: ColorScheme::default(),
        }
    }

    pub fn monochrome() -> Self {
        let bold = ColorScheme {
            foreground: None,
            bold: true,
            dimmed: false,
        };
        Self {
            header: bold.clone(),
            explanation: ColorScheme::default(),
            command: bold.clone(),
            warning: bold,
            success: ColorScheme::default(),
            failure: ColorScheme::default(),
            muted: ColorScheme::default(),
        }
    }

    /// Looks a theme up by its config name, falling back to the dark theme.
    pub fn named(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "light" => Self::light(),
            "monochrome" | "mono" | "none" => Self::monochrome(),
            "dark" => Self::dark(),
            other => {
                tracing::warn!("Unknown theme '{}', using dark", other);
                Self::dark()
            }
        }
    }
}

impl ColorScheme {
    pub fn apply(&self, text: &str) -> colored::ColoredString {
        let mut colored_text: colored::ColoredString = text.into();

        if let Some(fg) = self.foreground {
            colored_text = colored_text.color(fg);
        }
        if self.bold {
            colored_text = colored_text.bold();
        }
        if self.dimmed {
            colored_text = colored_text.dimmed();
        }

        colored_text
    }
}
