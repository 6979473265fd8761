//! Command registry

use std::collections::HashMap;

use super::{Commander, Decimate, ExposureCommand, Info};
use crate::format::RegistryError;

/// Builds a new, unparsed commander
pub type CommandFactory = Box<dyn Fn() -> Box<dyn Commander>>;

/// A registered command
pub struct CommandEntry {
    name: &'static str,
    description: &'static str,
    help: Option<fn() -> String>,
    factory: CommandFactory,
}

impl CommandEntry {
    pub fn new(
        name: &'static str,
        description: &'static str,
        factory: impl Fn() -> Box<dyn Commander> + 'static,
    ) -> Self {
        Self {
            name,
            description,
            help: None,
            factory: Box::new(factory),
        }
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

    pub fn options_help(&self) -> String {
        self.help.map(|help| help()).unwrap_or_default()
    }
}

/// Registry of known commands, matched by exact name
#[derive(Default)]
pub struct CommandRegistry {
    entries: Vec<CommandEntry>,
    by_name: HashMap<&'static str, usize>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in command
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.insert(Info::entry());
        registry.insert(Decimate::entry());
        registry.insert(ExposureCommand::entry());
        registry
    }

    pub fn register(&mut self, entry: CommandEntry) -> Result<(), RegistryError> {
        if self.by_name.contains_key(entry.name) {
            return Err(RegistryError::AlreadyRegistered(entry.name.to_string()));
        }
        self.insert(entry);
        Ok(())
    }

    fn insert(&mut self, entry: CommandEntry) {
        self.by_name.insert(entry.name, self.entries.len());
        self.entries.push(entry);
    }

    /// Builds a new commander for `name`, if one is registered
    pub fn resolve(&self, name: &str) -> Option<Box<dyn Commander>> {
        self.get(name).map(|entry| (entry.factory)())
    }

    pub fn get(&self, name: &str) -> Option<&CommandEntry> {
        self.by_name.get(name).map(|&index| &self.entries[index])
    }

    /// Lists all commands in registration order
    pub fn iter(&self) -> impl Iterator<Item = &CommandEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
