use std::fs;
use std::path::Path;

use crate::errors::DictError;

/// INI-style configuration: named sections of `key = value` pairs. Lines
/// starting with `#` or `;` are comments; a `#` preceded by whitespace starts
/// an inline comment.
#[derive(Debug, Default)]
pub struct Config {
    sections: Vec<(String, Section)>,
}

#[derive(Debug, Default)]
pub struct Section {
    values: Vec<(String, String)>,
}

fn strip_inline_comment(line: &str) -> &str {
    let mut prev_ws = true;
    for (i, c) in line.char_indices() {
        if c == '#' && prev_ws {
            return &line[..i];
        }
        prev_ws = c.is_whitespace();
    }
    line
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, DictError> {
        let content = fs::read_to_string(path).map_err(|e| {
            DictError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        Config::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Config, DictError> {
        let mut config = Config::default();
        let mut current: Option<usize> = None;

        for (lineno, raw) in content.lines().enumerate() {
            let line = strip_inline_comment(raw).trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') {
                let end = line.find(']').ok_or_else(|| {
                    DictError::ConfigError(format!("line {}: section missing ']'", lineno + 1))
                })?;
                let name = line[1..end].trim();
                if name.is_empty() {
                    return Err(DictError::ConfigError(format!(
                        "line {}: empty section name",
                        lineno + 1
                    )));
                }
                config.sections.push((name.to_string(), Section::default()));
                current = Some(config.sections.len() - 1);
                continue;
            }

            let (key, value) = match line.split_once('=') {
                Some(pair) => pair,
                None => {
                    return Err(DictError::ConfigError(format!(
                        "line {}: assignment missing '='",
                        lineno + 1
                    )))
                }
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(DictError::ConfigError(format!(
                    "line {}: missing key",
                    lineno + 1
                )));
            }
            let index = current.ok_or_else(|| {
                DictError::ConfigError(format!("line {}: assignment before any section", lineno + 1))
            })?;
            config.sections[index]
                .1
                .values
                .push((key.to_string(), value.trim().to_string()));
        }
        Ok(config)
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections
            .iter()
            .find(|(section, _)| section == name)
            .map(|(_, section)| section)
    }

    pub fn require_section(&self, name: &str) -> Result<&Section, DictError> {
        self.section(name)
            .ok_or_else(|| DictError::ConfigError(format!("missing section [{}]", name)))
    }
}

impl Section {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_str(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or(default).to_string()
    }

    pub fn get_int<T: std::str::FromStr>(&self, key: &str, default: T) -> Result<T, DictError> {
        match self.get(key) {
            Some(value) => value.parse().map_err(|_| {
                DictError::ConfigError(format!("invalid integer for {}: {}", key, value))
            }),
            None => Ok(default),
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, DictError> {
        match self.get(key) {
            Some(value) => match value.to_lowercase().as_str() {
                "1" | "yes" | "true" | "on" => Ok(true),
                "0" | "no" | "false" | "off" => Ok(false),
                other => Err(DictError::ConfigError(format!(
                    "invalid boolean for {}: {}",
                    key, other
                ))),
            },
            None => Ok(default),
        }
    }
}
