//! Setting handlers.

use super::error::SettingError;
use super::{format_bool, parse_bool, truncate_with_ellipsis, SetContext, SettingHandler};
use crate::core::config::Config;
use crate::llm::conversation::DEFAULT_MAX_TOOL_ROUNDS;
use crate::llm::{default_model, find_model};

/// Data-driven handler for boolean (on/off) settings.
pub struct BooleanHandler {
    key: &'static str,
    hint: &'static str,
    example: &'static str,
    get: fn(&Config) -> bool,
    set_field: fn(&mut Config, bool),
}

impl SettingHandler for BooleanHandler {
    fn key(&self) -> &'static str {
        self.key
    }

    fn set(&self, args: &[String], ctx: &SetContext<'_>) -> Result<String, SettingError> {
        if args.is_empty() {
            return Err(SettingError::MissingArgs {
                hint: self.hint,
                example: self.example,
            });
        }

        let input = args.join(" ");
        let value = parse_bool(&input).ok_or(SettingError::InvalidBoolean(input))?;
        let set_field = self.set_field;
        ctx.mutate(move |config| set_field(config, value))?;

        Ok(format!("✅ Set {} to: {}", self.key, format_bool(value)))
    }

    fn unset(&self, ctx: &SetContext<'_>) -> Result<String, SettingError> {
        let set_field = self.set_field;
        ctx.mutate(move |config| set_field(config, false))?;
        Ok(format!("✅ Unset {} (off)", self.key))
    }

    fn format(&self, config: &Config) -> String {
        format!("  {}: {}", self.key, format_bool((self.get)(config)))
    }
}

/// Data-driven handler for free-text settings.
pub struct TextHandler {
    key: &'static str,
    hint: &'static str,
    example: &'static str,
    get: fn(&Config) -> Option<&str>,
    set_field: fn(&mut Config, Option<String>),
}

impl SettingHandler for TextHandler {
    fn key(&self) -> &'static str {
        self.key
    }

    fn set(&self, args: &[String], ctx: &SetContext<'_>) -> Result<String, SettingError> {
        let value = args.join(" ");
        if value.trim().is_empty() {
            return Err(SettingError::MissingArgs {
                hint: self.hint,
                example: self.example,
            });
        }

        let display = truncate_with_ellipsis(&value, 50);
        let set_field = self.set_field;
        ctx.mutate(move |config| set_field(config, Some(value)))?;

        Ok(format!("✅ Set {} to: {display}", self.key))
    }

    fn unset(&self, ctx: &SetContext<'_>) -> Result<String, SettingError> {
        let set_field = self.set_field;
        ctx.mutate(move |config| set_field(config, None))?;
        Ok(format!("✅ Unset {}", self.key))
    }

    fn format(&self, config: &Config) -> String {
        match (self.get)(config).filter(|value| !value.is_empty()) {
            Some(value) => format!("  {}: {}", self.key, truncate_with_ellipsis(value, 50)),
            None => format!("  {}: (unset)", self.key),
        }
    }
}

/// Handler for the `model` setting.
pub struct ModelHandler;

impl SettingHandler for ModelHandler {
    fn key(&self) -> &'static str {
        "model"
    }

    fn set(&self, args: &[String], ctx: &SetContext<'_>) -> Result<String, SettingError> {
        if args.is_empty() {
            return Err(SettingError::MissingArgs {
                hint: "To select a model, give its id or name:",
                example: "mcp-assistant set model gpt-4o-mini",
            });
        }

        let input = args.join(" ");
        let model = find_model(&input).ok_or(SettingError::UnknownModel(input))?;
        ctx.mutate(move |config| config.selected_model = Some(model.id.to_string()))?;

        Ok(format!("✅ Set model to: {} ({})", model.name, model.id))
    }

    fn unset(&self, ctx: &SetContext<'_>) -> Result<String, SettingError> {
        ctx.mutate(|config| config.selected_model = None)?;
        Ok(format!(
            "✅ Unset model (will use default: {})",
            default_model().id
        ))
    }

    fn format(&self, config: &Config) -> String {
        match &config.selected_model {
            Some(model) => format!("  model: {model}"),
            None => format!("  model: (unset, default: {})", default_model().id),
        }
    }
}

/// Handler for the `max-tool-rounds` setting.
pub struct MaxToolRoundsHandler;

impl SettingHandler for MaxToolRoundsHandler {
    fn key(&self) -> &'static str {
        "max-tool-rounds"
    }

    fn set(&self, args: &[String], ctx: &SetContext<'_>) -> Result<String, SettingError> {
        let Some(input) = args.first() else {
            return Err(SettingError::MissingArgs {
                hint: "To limit tool-call rounds per turn, give a number:",
                example: "mcp-assistant set max-tool-rounds 5",
            });
        };
        let rounds = input
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|rounds| *rounds > 0)
            .ok_or_else(|| SettingError::InvalidNumber(input.clone()))?;
        ctx.mutate(move |config| config.max_tool_rounds = Some(rounds))?;

        Ok(format!("✅ Set max-tool-rounds to: {rounds}"))
    }

    fn unset(&self, ctx: &SetContext<'_>) -> Result<String, SettingError> {
        ctx.mutate(|config| config.max_tool_rounds = None)?;
        Ok(format!(
            "✅ Unset max-tool-rounds (will use default: {DEFAULT_MAX_TOOL_ROUNDS})"
        ))
    }

    fn format(&self, config: &Config) -> String {
        match config.max_tool_rounds {
            Some(rounds) => format!("  max-tool-rounds: {rounds}"),
            None => format!("  max-tool-rounds: (unset, default: {DEFAULT_MAX_TOOL_ROUNDS})"),
        }
    }
}

pub fn memory_handler() -> BooleanHandler {
    BooleanHandler {
        key: "memory",
        hint: "To enable or disable long-term memory, specify on or off:",
        example: "mcp-assistant set memory on",
        get: |c| c.memory.enabled,
        set_field: |c, v| c.memory.enabled = v,
    }
}

pub fn auto_reconnect_handler() -> BooleanHandler {
    BooleanHandler {
        key: "auto-reconnect",
        hint: "To reconnect dropped MCP connections on health checks, specify on or off:",
        example: "mcp-assistant set auto-reconnect on",
        get: |c| c.auto_reconnect,
        set_field: |c, v| c.auto_reconnect = v,
    }
}

pub fn tts_handler() -> BooleanHandler {
    BooleanHandler {
        key: "tts",
        hint: "To enable or disable spoken replies, specify on or off:",
        example: "mcp-assistant set tts off",
        get: |c| c.tts_enabled,
        set_field: |c, v| c.tts_enabled = v,
    }
}

pub fn asr_auto_result_handler() -> BooleanHandler {
    BooleanHandler {
        key: "asr-auto-result",
        hint: "To submit recognized speech without confirmation, specify on or off:",
        example: "mcp-assistant set asr-auto-result on",
        get: |c| c.asr_auto_result,
        set_field: |c, v| c.asr_auto_result = v,
    }
}

pub fn hot_word_handler() -> BooleanHandler {
    BooleanHandler {
        key: "hot-word",
        hint: "To enable or disable the hot word, specify on or off:",
        example: "mcp-assistant set hot-word on",
        get: |c| c.hot_word.enabled,
        set_field: |c, v| c.hot_word.enabled = v,
    }
}

pub fn system_prompt_handler() -> TextHandler {
    TextHandler {
        key: "system-prompt",
        hint: "To set the system prompt, provide the prompt text:",
        example: "mcp-assistant set system-prompt \"You are a concise assistant.\"",
        get: |c| c.system_prompt.as_deref(),
        set_field: |c, v| c.system_prompt = v,
    }
}

pub fn memory_content_handler() -> TextHandler {
    TextHandler {
        key: "memory-content",
        hint: "To replace the stored memory, provide the memory text:",
        example: "mcp-assistant set memory-content \"Prefers morning calls.\"",
        get: |c| Some(c.memory.content.as_str()),
        set_field: |c, v| c.memory.content = v.unwrap_or_default(),
    }
}

pub fn hot_word_text_handler() -> TextHandler {
    TextHandler {
        key: "hot-word-text",
        hint: "To set the hot word, provide the phrase:",
        example: "mcp-assistant set hot-word-text \"hey assistant\"",
        get: |c| Some(c.hot_word.text.as_str()),
        set_field: |c, v| c.hot_word.text = v.unwrap_or_default(),
    }
}
