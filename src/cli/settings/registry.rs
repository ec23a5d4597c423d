//! Lookup table from config keys to their handlers.

use super::handlers::{
    asr_auto_result_handler, auto_reconnect_handler, hot_word_handler, hot_word_text_handler,
    memory_content_handler, memory_handler, system_prompt_handler, tts_handler,
    MaxToolRoundsHandler, ModelHandler,
};
use super::SettingHandler;

/// Every settable key, in the order `mcp-assistant set` lists them.
pub struct SettingRegistry {
    handlers: Vec<Box<dyn SettingHandler>>,
}

impl SettingRegistry {
    pub fn new() -> Self {
        Self {
            handlers: vec![
                Box::new(ModelHandler),
                Box::new(system_prompt_handler()),
                Box::new(memory_handler()),
                Box::new(memory_content_handler()),
                Box::new(MaxToolRoundsHandler),
                Box::new(auto_reconnect_handler()),
                Box::new(hot_word_handler()),
                Box::new(hot_word_text_handler()),
                Box::new(tts_handler()),
                Box::new(asr_auto_result_handler()),
            ],
        }
    }

    /// Keys match ignoring case, and `_` is accepted in place of `-`.
    pub fn get(&self, key: &str) -> Option<&dyn SettingHandler> {
        let wanted = normalize_key(key);
        self.handlers
            .iter()
            .find(|handler| handler.key() == wanted)
            .map(|handler| handler.as_ref())
    }

    pub fn handlers(&self) -> impl Iterator<Item = &dyn SettingHandler> + '_ {
        self.handlers.iter().map(|handler| handler.as_ref())
    }

    pub fn keys(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|handler| handler.key()).collect()
    }
}

impl Default for SettingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace('_', "-")
}
