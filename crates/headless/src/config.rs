use std::path::PathBuf;

/// Headless run configuration loaded from environment variables.
///
/// Everything has a default so a bare `cyanic-headless` against a local
/// server works out of the box.
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    /// Server address (default: `http://127.0.0.1:7860`).
    pub host: String,
    /// Settings file. `None` runs on built-in defaults.
    pub settings_path: Option<PathBuf>,
    pub prompt: String,
    pub negative_prompt: String,
    /// Canvas width (default: `512`).
    pub width: u32,
    /// Canvas height (default: `512`).
    pub height: u32,
    /// Seed text; blank means random.
    pub seed: String,
    /// Where result PNGs are written (default: `./output`).
    pub output_dir: PathBuf,
}

impl HeadlessConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                  |
    /// |--------------------------|--------------------------|
    /// | `CYANIC_HOST`            | `http://127.0.0.1:7860`  |
    /// | `CYANIC_SETTINGS`        | unset (built-in defaults)|
    /// | `CYANIC_PROMPT`          | empty                    |
    /// | `CYANIC_NEGATIVE_PROMPT` | empty                    |
    /// | `CYANIC_WIDTH`           | `512`                    |
    /// | `CYANIC_HEIGHT`          | `512`                    |
    /// | `CYANIC_SEED`            | empty (random)           |
    /// | `CYANIC_OUTPUT_DIR`      | `./output`               |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`HeadlessConfig::from_env`] over an arbitrary lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let host = lookup("CYANIC_HOST").unwrap_or_else(|| "http://127.0.0.1:7860".into());

        let settings_path = lookup("CYANIC_SETTINGS")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let width: u32 = lookup("CYANIC_WIDTH")
            .unwrap_or_else(|| "512".into())
            .trim()
            .parse()
            .expect("CYANIC_WIDTH must be a valid u32");

        let height: u32 = lookup("CYANIC_HEIGHT")
            .unwrap_or_else(|| "512".into())
            .trim()
            .parse()
            .expect("CYANIC_HEIGHT must be a valid u32");

        let output_dir = lookup("CYANIC_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("output"));

        Self {
            host,
            settings_path,
            prompt: lookup("CYANIC_PROMPT").unwrap_or_default(),
            negative_prompt: lookup("CYANIC_NEGATIVE_PROMPT").unwrap_or_default(),
            width,
            height,
            seed: lookup("CYANIC_SEED").unwrap_or_default(),
            output_dir,
        }
    }
}
