//! Command line tokenizer and option binder.
//!
//! A command is `name arg... --key value...`. Positional arguments are bound
//! to option names through a static per-command schema; `--key value` pairs
//! are applied afterwards and overwrite positional bindings for the same key.

use crate::error::{CoordError, Result};

/// Ordered key/value options of one command. Keys are unique.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandOptions {
    entries: Vec<(String, String)>,
}

impl CommandOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Sets `key`, replacing an existing value in place.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Splits off every option whose key starts with `prefix`.
    /// Returns `(matching, rest)`, both in input order.
    pub fn split_prefix(self, prefix: &str) -> (CommandOptions, CommandOptions) {
        let (matching, rest): (Vec<_>, Vec<_>) = self
            .entries
            .into_iter()
            .partition(|(k, _)| k.starts_with(prefix));
        (
            CommandOptions { entries: matching },
            CommandOptions { entries: rest },
        )
    }

    /// Fetches a required option.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| CoordError::InvalidArgument(format!("{key} option missing")))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for CommandOptions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut options = CommandOptions::new();
        for (k, v) in iter {
            options.set(k, v);
        }
        options
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub name: String,
    pub options: CommandOptions,
}

/// Ordered option names bound to positional arguments, per command name.
/// Unknown commands get an empty schema.
pub fn schema_for(name: &str) -> &'static [&'static str] {
    match name {
        "cache_limit" => &["max"],
        "check" => &["obj"],
        "column_create" => &["table", "name", "flags", "type", "source"],
        "column_list" => &["table"],
        "column_remove" => &["table", "name"],
        "column_rename" => &["table", "name", "new_name"],
        "delete" => &["table", "key", "id", "filter"],
        "dump" => &["tables"],
        "insert_row" => &["table", "key"],
        "load" => &["values", "table", "columns", "ifexists", "input_type"],
        "log_level" => &["level"],
        "log_put" => &["level", "message"],
        "normalize" => &["normalizer", "string", "flags"],
        "select" => &[
            "table",
            "match_columns",
            "query",
            "filter",
            "scorer",
            "sortby",
            "output_columns",
            "offset",
            "limit",
            "drilldown",
            "drilldown_sortby",
            "drilldown_output_columns",
            "drilldown_offset",
            "drilldown_limit",
            "cache",
            "match_escalation_threshold",
            "query_expansion",
            "query_flags",
            "query_expander",
            "adjuster",
            "drilldown_calc_types",
            "drilldown_calc_target",
            "analytics_filter",
            "analytics_output_columns",
            "analytics_offset",
            "analytics_limit",
            "analytics_sortby",
        ],
        "snapshot" => &["table", "column"],
        "table_create" => &[
            "name",
            "flags",
            "key_type",
            "value_type",
            "default_tokenizer",
            "normalizer",
            "token_filters",
        ],
        "table_remove" => &["name"],
        "table_tokenize" => &["table", "string", "flags", "mode"],
        "tokenize" => &[
            "tokenizer",
            "normalizer",
            "string",
            "flags",
            "mode",
            "token_filters",
        ],
        "truncate" => &["target_name"],
        _ => &[],
    }
}

/// Reads one token from `s`.
///
/// Returns `None` at end of input or when the remaining text is a `#` comment.
fn next_token(s: &str) -> Result<Option<(String, &str)>> {
    let s = s.trim_start();
    let mut chars = s.char_indices();
    let (_, first) = match chars.next() {
        Some(c) => c,
        None => return Ok(None),
    };
    match first {
        '#' => Ok(None),
        '\'' | '"' => {
            let mut token = String::new();
            let mut escaped = false;
            for (pos, c) in chars {
                if escaped {
                    token.push(c);
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == first {
                    return Ok(Some((token, &s[pos + c.len_utf8()..])));
                } else {
                    token.push(c);
                }
            }
            Err(CoordError::Parse(format!("unterminated {first} quote")))
        }
        _ => {
            let end = s.find(char::is_whitespace).unwrap_or(s.len());
            Ok(Some((s[..end].to_string(), &s[end..])))
        }
    }
}

/// Splits a command line into tokens.
pub fn tokenize(line: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let mut rest = line;
    while let Some((token, next)) = next_token(rest)? {
        tokens.push(token);
        rest = next;
    }
    Ok(tokens)
}

fn bind_options(name: &str, args: &[String]) -> Result<CommandOptions> {
    let mut positional = Vec::new();
    let mut named = Vec::new();
    let mut iter = args.iter();
    while let Some(token) = iter.next() {
        match token.strip_prefix("--") {
            Some(key) => {
                let value = iter.next().ok_or_else(|| {
                    CoordError::Parse(format!("option argument missing for --{key}"))
                })?;
                named.push((key.to_string(), value.clone()));
            }
            None => positional.push(token.clone()),
        }
    }

    let mut options = CommandOptions::new();
    for (key, value) in schema_for(name).iter().zip(positional) {
        options.set(*key, value);
    }
    for (key, value) in named {
        options.set(key, value);
    }
    Ok(options)
}

/// Parses a command line.
///
/// Empty lines and `#` comments yield `Ok(None)`: nothing to execute.
pub fn parse(line: &str) -> Result<Option<Command>> {
    let tokens = tokenize(line)?;
    let (name, args) = match tokens.split_first() {
        Some(split) => split,
        None => return Ok(None),
    };
    let options = bind_options(name, args)?;
    Ok(Some(Command {
        name: name.clone(),
        options,
    }))
}

fn quote_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for c in value.chars() {
        if c == '\\' || c == '\'' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Writes a command in the engine's text form: `name --k1 'v1' --k2 'v2'`.
pub fn format_command(name: &str, options: &CommandOptions) -> Result<String> {
    if name.is_empty() || name.contains(char::is_whitespace) {
        return Err(CoordError::InvalidArgument(format!(
            "invalid command name: {name:?}"
        )));
    }
    let mut command = name.to_string();
    for (key, value) in options.iter() {
        if key.is_empty() || key.contains(char::is_whitespace) {
            return Err(CoordError::InvalidArgument(format!(
                "invalid option key: {key:?}"
            )));
        }
        command.push_str(" --");
        command.push_str(key);
        command.push(' ');
        command.push_str(&quote_value(value));
    }
    Ok(command)
}
