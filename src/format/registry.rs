//! Format registry
//!
//! Maps a pipeline token to a constructor for the format that handles it,
//! either by exact format name or by file extension.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;

use super::{ChituFormat, ChituVariant, Format, FormatError, Sl1Format, Target};

/// Builds a format instance bound to a target
pub type FormatFactory = Box<dyn Fn(Target) -> Box<dyn Format>>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("'{0}' is already registered")]
    AlreadyRegistered(String),

    #[error("Extension '.{extension}' already claimed by '{existing}'")]
    ExtensionConflict { extension: String, existing: String },
}

/// A registered format
pub struct FormatEntry {
    name: &'static str,
    description: &'static str,
    extensions: Vec<String>,
    help: Option<fn() -> String>,
    factory: FormatFactory,
}

impl FormatEntry {
    pub fn new(
        name: &'static str,
        description: &'static str,
        factory: impl Fn(Target) -> Box<dyn Format> + 'static,
    ) -> Self {
        Self {
            name,
            description,
            extensions: Vec::new(),
            help: None,
            factory: Box::new(factory),
        }
    }

    /// Claims a file extension (without the leading dot)
    pub fn extension(mut self, extension: &str) -> Self {
        self.extensions
            .push(extension.trim_start_matches('.').to_ascii_lowercase());
        self
    }

    /// Sets the option help renderer
    pub fn help(mut self, help: fn() -> String) -> Self {
        self.help = Some(help);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Option help text, empty if the format has no options
    pub fn options_help(&self) -> String {
        self.help.map(|help| help()).unwrap_or_default()
    }
}

/// Registry of known formats
///
/// Built once at startup and read-only while a pipeline runs.
#[derive(Default)]
pub struct FormatRegistry {
    entries: Vec<FormatEntry>,
    by_name: HashMap<&'static str, usize>,
    by_extension: HashMap<String, usize>,
}

impl FormatRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in format
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.insert(Sl1Format::entry());
        registry.insert(ChituFormat::entry(ChituVariant::Cbddlp));
        registry.insert(ChituFormat::entry(ChituVariant::Ctb));
        registry
    }

    /// Registers a format, rejecting duplicate names and extensions
    pub fn register(&mut self, entry: FormatEntry) -> Result<(), RegistryError> {
        if self.by_name.contains_key(entry.name) {
            return Err(RegistryError::AlreadyRegistered(entry.name.to_string()));
        }

        for extension in &entry.extensions {
            if let Some(&existing) = self.by_extension.get(extension) {
                return Err(RegistryError::ExtensionConflict {
                    extension: extension.clone(),
                    existing: self.entries[existing].name.to_string(),
                });
            }
        }

        self.insert(entry);
        Ok(())
    }

    fn insert(&mut self, entry: FormatEntry) {
        let index = self.entries.len();
        self.by_name.insert(entry.name, index);
        for extension in &entry.extensions {
            self.by_extension.insert(extension.clone(), index);
        }
        self.entries.push(entry);
    }

    /// Finds the entry that claims `token`
    pub fn lookup(&self, token: &str) -> Option<(&FormatEntry, Target)> {
        if let Some(&index) = self.by_name.get(token) {
            let entry = &self.entries[index];
            return Some((entry, Target::named(entry.name)));
        }

        let extension = Path::new(token).extension()?.to_str()?.to_ascii_lowercase();
        let &index = self.by_extension.get(&extension)?;
        let entry = &self.entries[index];
        Some((entry, Target::path(entry.name, token)))
    }

    /// Builds a new, unparsed format instance for `token`
    ///
    /// Performs no I/O.
    pub fn resolve(&self, token: &str) -> Result<Box<dyn Format>, FormatError> {
        let (entry, target) = self
            .lookup(token)
            .ok_or_else(|| FormatError::Unrecognized(token.to_string()))?;

        Ok((entry.factory)(target))
    }

    /// Gets a format by name
    pub fn get(&self, name: &str) -> Option<&FormatEntry> {
        self.by_name.get(name).map(|&index| &self.entries[index])
    }

    /// Lists all formats in registration order
    pub fn iter(&self) -> impl Iterator<Item = &FormatEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
