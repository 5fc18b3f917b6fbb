use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of interaction recorded in the history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Text,
    Image,
    Math,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Text, Mode::Image, Mode::Math];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Text => "Text",
            Mode::Image => "Image",
            Mode::Math => "Math",
        }
    }

    /// Model capability the mode is served by.
    pub fn capability(&self) -> &'static str {
        match self {
            Mode::Image => "image",
            Mode::Text | Mode::Math => "text",
        }
    }

    pub fn page(&self) -> Page {
        match self {
            Mode::Text => Page::Teaching,
            Mode::Image => Page::ImageGenerator,
            Mode::Math => Page::MathSolver,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level feature the user can switch between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Page {
    Teaching,
    ImageGenerator,
    MathSolver,
    History,
}

impl Page {
    pub const ALL: [Page; 4] = [
        Page::Teaching,
        Page::ImageGenerator,
        Page::MathSolver,
        Page::History,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Page::Teaching => "Teaching",
            Page::ImageGenerator => "Image Generator",
            Page::MathSolver => "Math Solver",
            Page::History => "History",
        }
    }

    /// Short name used by `--page` and the chat commands.
    pub fn slug(&self) -> &'static str {
        match self {
            Page::Teaching => "teaching",
            Page::ImageGenerator => "image",
            Page::MathSolver => "math",
            Page::History => "history",
        }
    }

    pub fn header(&self) -> &'static str {
        match self {
            Page::Teaching => "AI Teaching Assistant",
            Page::ImageGenerator => "Safe AI Image Generator",
            Page::MathSolver => "Math Mastermind",
            Page::History => "History",
        }
    }

    pub fn input_label(&self) -> Option<&'static str> {
        match self {
            Page::Teaching => Some("Ask your question:"),
            Page::ImageGenerator => Some("Describe the image:"),
            Page::MathSolver => Some("Enter a math problem:"),
            Page::History => None,
        }
    }

    pub fn action_label(&self) -> Option<&'static str> {
        match self {
            Page::Teaching => Some("Get Answer"),
            Page::ImageGenerator => Some("Generate Image"),
            Page::MathSolver => Some("Solve"),
            Page::History => None,
        }
    }

    /// Warning shown when the action is triggered with a blank prompt.
    pub fn empty_prompt_warning(&self) -> &'static str {
        match self {
            Page::Teaching => "Please enter something.",
            Page::ImageGenerator => "Enter a prompt.",
            Page::MathSolver => "Please enter a math problem.",
            Page::History => "History is read-only.",
        }
    }

    /// Shown while the page waits on the remote service.
    pub fn progress_label(&self) -> Option<&'static str> {
        match self {
            Page::Teaching => Some("Generating..."),
            Page::ImageGenerator => Some("Generating image..."),
            Page::MathSolver => Some("Solving..."),
            Page::History => None,
        }
    }

    /// `None` for the read-only history page.
    pub fn mode(&self) -> Option<Mode> {
        match self {
            Page::Teaching => Some(Mode::Text),
            Page::ImageGenerator => Some(Mode::Image),
            Page::MathSolver => Some(Mode::Math),
            Page::History => None,
        }
    }

    pub fn from_name(raw: &str) -> Option<Page> {
        let normalized = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "teaching" | "teach" | "text" => Some(Page::Teaching),
            "image" | "image_generator" | "img" => Some(Page::ImageGenerator),
            "math" | "math_solver" | "solve" => Some(Page::MathSolver),
            "history" | "log" => Some(Page::History),
            _ => None,
        }
    }
}

impl fmt::Display for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
