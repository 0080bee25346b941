use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    Command,
    Greeting,
    Research,
    Planning,
    Question,
    Chat,
    Task,
}

impl Intent {
    pub const ALL: [Intent; 7] = [
        Self::Command,
        Self::Greeting,
        Self::Research,
        Self::Planning,
        Self::Question,
        Self::Chat,
        Self::Task,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Greeting => "greeting",
            Self::Research => "research",
            Self::Planning => "planning",
            Self::Question => "question",
            Self::Chat => "chat",
            Self::Task => "task",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Command => "Command",
            Self::Greeting => "Greeting",
            Self::Research => "Research",
            Self::Planning => "Planning",
            Self::Question => "Question",
            Self::Chat => "Chat",
            Self::Task => "Task",
        }
    }

    /// Maps a classifier label to an intent. Unrecognized labels become `Task`.
    pub fn from_label(label: &str) -> Self {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|intent| intent.as_str().eq_ignore_ascii_case(label))
            .unwrap_or(Self::Task)
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
