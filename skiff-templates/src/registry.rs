use minijinja::{Environment, UndefinedBehavior};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::builtin::BUILTIN;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template not found: {0}")]
    NotFound(String),

    #[error("template '{name}' has invalid syntax: {message}")]
    Syntax { name: String, message: String },

    #[error("failed to render template '{name}': {message}")]
    Exec { name: String, message: String },

    #[error("failed to read template directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Name → script source map, built once at startup and read-only afterwards
///
/// Lookup is by file stem (`docker.sh` is registered as `docker`).
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, String>,
}

impl TemplateRegistry {
    /// Registry holding only the built-in templates
    pub fn builtin() -> Self {
        let templates = BUILTIN
            .iter()
            .map(|(name, source)| (name.to_string(), source.to_string()))
            .collect();

        Self { templates }
    }

    /// Loads `*.sh` files from `dir` over the built-in set
    ///
    /// Every template is parsed up front so a broken file aborts startup
    /// instead of failing the first task that uses it.
    pub fn init(dir: Option<&Path>) -> Result<Self, TemplateError> {
        let mut registry = Self::builtin();

        if let Some(dir) = dir {
            let mut loaded = 0;
            for entry in std::fs::read_dir(dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("sh") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };

                let source = std::fs::read_to_string(&path)?;
                debug!("Loaded template {} from {}", stem, path.display());
                registry.templates.insert(stem.to_string(), source);
                loaded += 1;
            }
            info!("Loaded {} templates from {}", loaded, dir.display());
        }

        registry.check()?;
        Ok(registry)
    }

    /// Registers or replaces a single template
    pub fn insert(&mut self, name: impl Into<String>, source: impl Into<String>) {
        self.templates.insert(name.into(), source.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.templates.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Renders template `name` against `ctx`
    ///
    /// Referencing a variable missing from `ctx` is an error, so a template
    /// and the step feeding it cannot silently drift apart.
    pub fn render<S: Serialize>(&self, name: &str, ctx: &S) -> Result<String, TemplateError> {
        let source = self
            .get(name)
            .ok_or_else(|| TemplateError::NotFound(name.to_string()))?;

        let env = environment();
        env.render_str(source, ctx).map_err(|e| TemplateError::Exec {
            name: name.to_string(),
            message: format!("{:#}", e),
        })
    }

    fn check(&self) -> Result<(), TemplateError> {
        let mut env = environment();
        for (name, source) in &self.templates {
            env.add_template(name, source)
                .map_err(|e| TemplateError::Syntax {
                    name: name.clone(),
                    message: e.to_string(),
                })?;
        }
        Ok(())
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn environment<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Strict);
    env.set_keep_trailing_newline(true);
    env
}
