//! Usage text: global options, then every command and format with its options

use clap::CommandFactory;

use super::app::Cli;
use crate::command::CommandRegistry;
use crate::format::FormatRegistry;

fn section(text: &mut String, title: &str, help: &str) {
    if help.trim().is_empty() {
        return;
    }
    text.push_str(&format!("\n{}:\n\n{}\n", title, help.trim_end()));
}

/// Renders the full usage text
pub fn usage(formats: &FormatRegistry, commands: &CommandRegistry) -> String {
    let mut text = Cli::command().render_help().to_string();

    text.push_str("\nCommands:\n\n");
    text.push_str(&format!("  {:<20} {}\n", "(none)", "Translates input file to output file"));
    for entry in commands.iter() {
        text.push_str(&format!("  {:<20} {}\n", entry.name(), entry.description()));
    }
    for entry in commands.iter() {
        section(&mut text, &format!("Options for '{}'", entry.name()), &entry.options_help());
    }

    text.push_str("\nFormats:\n\n");
    for entry in formats.iter() {
        let extensions: Vec<String> = entry.extensions().iter().map(|e| format!(".{}", e)).collect();
        text.push_str(&format!(
            "  {:<20} {} ({})\n",
            entry.name(),
            entry.description(),
            extensions.join(", ")
        ));
    }
    for entry in formats.iter() {
        section(&mut text, &format!("Options for '{}'", entry.name()), &entry.options_help());
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_lists_commands_and_formats() {
        let text = usage(&FormatRegistry::builtin(), &CommandRegistry::builtin());

        for name in ["info", "decimate", "exposure", "sl1", "cbddlp", "ctb"] {
            assert!(text.contains(&format!("Options for '{}'", name)), "missing {}", name);
        }
        assert!(text.contains(".cbddlp, .photon"));
        assert!(text.contains("--cached-layers"));
        assert!(text.contains("--anti-alias"));
    }

    #[test]
    fn empty_registries_still_render() {
        let text = usage(&FormatRegistry::new(), &CommandRegistry::new());

        assert!(text.contains("(none)"));
        assert!(text.contains("Formats:"));
    }
}
