use serde::{Deserialize, Serialize};

pub const DEFAULT_GREETING_KEYWORDS: [&str; 5] = ["salam", "hello", "hi", "hey", "greetings"];

/// Case-insensitive keyword match that triggers the greeting gesture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GreetingDetector {
    keywords: Vec<String>,
}

impl Default for GreetingDetector {
    fn default() -> Self {
        Self::new(DEFAULT_GREETING_KEYWORDS)
    }
}

impl GreetingDetector {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            keywords: keywords
                .into_iter()
                .map(|k| k.as_ref().trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Substring match, so "hi" also fires on "this".
    pub fn matches(&self, text: &str) -> bool {
        let lowered = text.to_lowercase();
        self.keywords.iter().any(|k| lowered.contains(k.as_str()))
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }
}
