use std::fmt;

#[derive(Debug)]
pub enum SettingError {
    UnknownKey(String),
    UnknownModel(String),
    InvalidBoolean(String),
    /// Not a whole number of at least 1.
    InvalidNumber(String),
    MissingArgs {
        hint: &'static str,
        example: &'static str,
    },
    /// Loading or saving the config file failed.
    Save(String),
}

impl SettingError {
    fn guidance(&self) -> Option<&'static str> {
        match self {
            SettingError::UnknownKey(_) => Some("Run 'mcp-assistant set' to see every key."),
            SettingError::UnknownModel(_) => {
                Some("Run 'mcp-assistant models' to list available models.")
            }
            SettingError::InvalidBoolean(_) => Some("Use on/off, true/false or yes/no."),
            SettingError::InvalidNumber(_) => Some("Expected a whole number of at least 1."),
            SettingError::MissingArgs { .. } | SettingError::Save(_) => None,
        }
    }

    /// Writes the error, and any follow-up hint, to stderr.
    pub fn print(&self) {
        if let SettingError::MissingArgs { hint, example } = self {
            eprintln!("⚠️  {hint}");
            eprintln!("Example: {example}");
            return;
        }
        eprintln!("❌ {self}");
        if let Some(guidance) = self.guidance() {
            eprintln!("   {guidance}");
        }
    }
}

impl fmt::Display for SettingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingError::UnknownKey(key) => write!(f, "No setting named '{key}'"),
            SettingError::UnknownModel(model) => {
                write!(f, "Model '{model}' is not in the catalogue")
            }
            SettingError::InvalidBoolean(value) => write!(f, "'{value}' is not on or off"),
            SettingError::InvalidNumber(value) => write!(f, "'{value}' is not a valid count"),
            SettingError::MissingArgs { hint, .. } => f.write_str(hint),
            SettingError::Save(message) => write!(f, "Could not update the config file: {message}"),
        }
    }
}

impl std::error::Error for SettingError {}
