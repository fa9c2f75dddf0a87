//! Language registry.
//!
//! Maps a language key to the profile describing how to build and run a
//! program in that language inside its container image. The registry is
//! built once and only read afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::LanguageOverride;
use crate::error::EngineError;

/// Name of the stdin file written next to every source file.
pub const STDIN_FILENAME: &str = "input.txt";

/// Supported languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    C,
    Python,
    Java,
}

impl Language {
    /// All supported languages in registry order.
    pub const ALL: [Language; 3] = [Language::C, Language::Python, Language::Java];

    /// The canonical registry key.
    pub fn key(&self) -> &'static str {
        match self {
            Language::C => "c",
            Language::Python => "python",
            Language::Java => "java",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for Language {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "c" => Ok(Language::C),
            "python" | "python3" | "py" => Ok(Language::Python),
            "java" => Ok(Language::Java),
            _ => Err(EngineError::UnsupportedLanguage(s.to_string())),
        }
    }
}

/// How to build and run one language inside its container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageProfile {
    pub language: Language,
    /// File name the source code is written to.
    pub source_filename: String,
    /// Container image holding the toolchain.
    pub image: String,
    /// Shell pipeline run with `sh -c` from the job directory. Compiled
    /// languages chain compile and run with `&&` so a compile error skips
    /// the run.
    pub run_command: String,
}

impl LanguageProfile {
    /// The built-in profile for a language.
    pub fn builtin(language: Language) -> Self {
        let (source_filename, image, run_command) = match language {
            Language::C => (
                "main.c",
                "gcc:13",
                format!("gcc -O2 -o main main.c && ./main < {STDIN_FILENAME}"),
            ),
            Language::Python => (
                "main.py",
                "python:3.11-slim",
                format!("python3 main.py < {STDIN_FILENAME}"),
            ),
            Language::Java => (
                "Main.java",
                "eclipse-temurin:17-jdk",
                format!("javac Main.java && java -cp . Main < {STDIN_FILENAME}"),
            ),
        };
        Self {
            language,
            source_filename: source_filename.to_string(),
            image: image.to_string(),
            run_command,
        }
    }

    /// The container command for this profile.
    pub fn command(&self) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), self.run_command.clone()]
    }
}

/// Immutable mapping from language to execution profile.
#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: BTreeMap<Language, LanguageProfile>,
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LanguageRegistry {
    /// Creates a registry with the built-in profiles.
    pub fn new() -> Self {
        let profiles = Language::ALL
            .iter()
            .map(|&lang| (lang, LanguageProfile::builtin(lang)))
            .collect();
        Self { profiles }
    }

    /// Creates a registry with configured image/command overrides applied.
    ///
    /// Override keys go through the same parsing as request keys; an unknown
    /// key is rejected rather than silently ignored.
    pub fn with_overrides(
        overrides: &BTreeMap<String, LanguageOverride>,
    ) -> Result<Self, EngineError> {
        let mut registry = Self::new();
        for (key, entry) in overrides {
            let language: Language = key.parse()?;
            if let Some(profile) = registry.profiles.get_mut(&language) {
                if let Some(image) = &entry.image {
                    profile.image = image.clone();
                }
                if let Some(cmd) = &entry.run_command {
                    profile.run_command = cmd.clone();
                }
            }
        }
        Ok(registry)
    }

    /// Resolves a request language key to its profile.
    pub fn resolve(&self, lang: &str) -> Result<&LanguageProfile, EngineError> {
        let language: Language = lang.parse()?;
        self.profiles
            .get(&language)
            .ok_or_else(|| EngineError::UnsupportedLanguage(lang.to_string()))
    }

    /// Supported profiles in stable order.
    pub fn profiles(&self) -> impl Iterator<Item = &LanguageProfile> {
        self.profiles.values()
    }

    /// Supported language keys in stable order.
    pub fn languages(&self) -> Vec<&'static str> {
        self.profiles.keys().map(|l| l.key()).collect()
    }
}
