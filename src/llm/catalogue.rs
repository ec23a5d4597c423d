use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LlmService {
    Claude,
    OpenAi,
    Gemini,
}

impl LlmService {
    pub const ALL: [LlmService; 3] = [LlmService::Claude, LlmService::OpenAi, LlmService::Gemini];

    /// Keyring account name.
    pub fn id(self) -> &'static str {
        match self {
            LlmService::Claude => "claude",
            LlmService::OpenAi => "openai",
            LlmService::Gemini => "gemini",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            LlmService::Claude => "Claude",
            LlmService::OpenAi => "OpenAI",
            LlmService::Gemini => "Gemini",
        }
    }

    pub fn env_var(self) -> &'static str {
        match self {
            LlmService::Claude => "ANTHROPIC_API_KEY",
            LlmService::OpenAi => "OPENAI_API_KEY",
            LlmService::Gemini => "GEMINI_API_KEY",
        }
    }
}

impl fmt::Display for LlmService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for LlmService {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" | "anthropic" => Ok(LlmService::Claude),
            "openai" | "chatgpt" => Ok(LlmService::OpenAi),
            "gemini" | "google" => Ok(LlmService::Gemini),
            other => Err(format!(
                "Unknown provider '{other}'. Expected one of: claude, openai, gemini"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LlmModel {
    pub name: &'static str,
    pub service: LlmService,
    pub id: &'static str,
}

pub const MODELS: &[LlmModel] = &[
    LlmModel {
        name: "Claude 3.5 Sonnet",
        service: LlmService::Claude,
        id: "claude-3-5-sonnet-latest",
    },
    LlmModel {
        name: "Claude 3.7 Sonnet",
        service: LlmService::Claude,
        id: "claude-3-7-sonnet-latest",
    },
    LlmModel {
        name: "Gemini 1.5 Flash",
        service: LlmService::Gemini,
        id: "gemini-1.5-flash-latest",
    },
    LlmModel {
        name: "Gemini 2.0 Flash-Lite",
        service: LlmService::Gemini,
        id: "gemini-2.0-flash-lite",
    },
    LlmModel {
        name: "Gemini 2.0 Flash",
        service: LlmService::Gemini,
        id: "gemini-2.0-flash",
    },
    LlmModel {
        name: "GPT-4o",
        service: LlmService::OpenAi,
        id: "gpt-4o",
    },
    LlmModel {
        name: "GPT-4o mini",
        service: LlmService::OpenAi,
        id: "gpt-4o-mini",
    },
];

pub fn default_model() -> LlmModel {
    MODELS[0]
}

/// Looks a model up by vendor id or display name, ignoring case.
pub fn find_model(query: &str) -> Option<LlmModel> {
    let query = query.trim();
    MODELS
        .iter()
        .find(|model| {
            model.id.eq_ignore_ascii_case(query) || model.name.eq_ignore_ascii_case(query)
        })
        .copied()
}

/// The configured model, or the default when unset or unknown.
pub fn resolve_model(selected: Option<&str>) -> LlmModel {
    selected.and_then(find_model).unwrap_or_else(default_model)
}
