use crate::errors::DictError;

type StrategyTest = fn(&str, &str) -> bool;

fn match_exact(word: &str, headword: &str) -> bool {
    headword == word
}

fn match_prefix(word: &str, headword: &str) -> bool {
    headword.starts_with(word)
}

const BUILTIN_STRATEGIES: &[(&str, &str, StrategyTest)] = &[
    ("exact", "Match headwords exactly", match_exact),
    ("prefix", "Match prefixes", match_prefix),
];

const DEFAULT_STRATEGY: &str = "prefix";

/// Normalizes a headword or query for matching: ASCII punctuation is
/// stripped, whitespace runs collapse to single spaces, the result is
/// lowercased. Pure and idempotent.
pub fn preprocess(word: &str) -> String {
    let stripped: String = word.chars().filter(|c| !c.is_ascii_punctuation()).collect();
    stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Preprocessed forms aligned index-wise with the input.
pub fn preprocessed(headwords: &[String]) -> Vec<String> {
    headwords.iter().map(|word| preprocess(word)).collect()
}

pub struct WordFilter {
    test: StrategyTest,
}

impl WordFilter {
    /// Selects the original headwords whose preprocessed form passes the
    /// strategy test against the preprocessed query. Order is preserved.
    pub fn filter(&self, word: &str, headwords: &[String], preprocessed: &[String]) -> Vec<String> {
        let word = preprocess(word);
        headwords
            .iter()
            .zip(preprocessed.iter())
            .filter(|(_, prepared)| (self.test)(&word, prepared))
            .map(|(headword, _)| headword.clone())
            .collect()
    }
}

/// Ordered strategy registry with a designated default. Configuration may
/// narrow the advertised set and re-designate the default.
pub struct StrategyRegistry {
    strategies: Vec<(&'static str, &'static str, StrategyTest)>,
    default: &'static str,
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        StrategyRegistry::new()
    }
}

impl StrategyRegistry {
    pub fn new() -> StrategyRegistry {
        StrategyRegistry {
            strategies: BUILTIN_STRATEGIES.to_vec(),
            default: DEFAULT_STRATEGY,
        }
    }

    /// Builds a registry from the `strategies` configuration value, format
    /// `default:name1,name2,...`. An empty value keeps the built-in set.
    pub fn from_config(spec: &str) -> Result<StrategyRegistry, DictError> {
        let mut registry = StrategyRegistry::new();
        if spec.is_empty() {
            return Ok(registry);
        }

        let mut parts = spec.splitn(2, ':');
        let default = parts.next().unwrap_or("").trim();
        let names = parts.next().ok_or_else(|| {
            DictError::ConfigError(format!("invalid strategies format: {}", spec))
        })?;

        let mut selected = Vec::new();
        for name in names.split(',') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            match BUILTIN_STRATEGIES.iter().find(|(n, _, _)| *n == name) {
                Some(strat) => selected.push(*strat),
                None => {
                    return Err(DictError::ConfigError(format!(
                        "unsupported strategy: {}",
                        name
                    )))
                }
            }
        }
        registry.strategies = selected;

        match registry.strategies.iter().position(|(n, _, _)| *n == default) {
            Some(index) => registry.default = registry.strategies[index].0,
            None => {
                return Err(DictError::ConfigError(
                    "default strategy not in list of advertised strategies".to_string(),
                ))
            }
        }
        Ok(registry)
    }

    /// Looks up a strategy's filter; `None` selects the default.
    pub fn get_filter(&self, strategy: Option<&str>) -> Result<WordFilter, DictError> {
        let name = strategy.unwrap_or(self.default);
        match self.strategies.iter().find(|(n, _, _)| *n == name) {
            Some((_, _, test)) => Ok(WordFilter { test: *test }),
            None => Err(DictError::InvalidStrategy(name.to_string())),
        }
    }

    /// The advertised strategies in registry order.
    pub fn list(&self) -> Vec<(&'static str, &'static str)> {
        self.strategies
            .iter()
            .map(|(name, desc, _)| (*name, *desc))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn preprocess_strips_punctuation_and_case() {
        assert_eq!(preprocess("Foo, Bar!"), "foo bar");
        assert_eq!(preprocess("don't"), "dont");
    }

    #[test]
    fn preprocess_collapses_whitespace() {
        assert_eq!(preprocess("  a \t b ? c  "), "a b c");
        assert_eq!(preprocess("one  two   three"), "one two three");
    }

    #[test]
    fn preprocess_is_idempotent() {
        for s in &["Foo, Bar!", "  a \t b  ", "plain", "", "A--B"] {
            let once = preprocess(s);
            assert_eq!(preprocess(&once), once);
        }
    }

    #[test]
    fn preprocessed_is_index_aligned() {
        let headwords = words(&["The Cat", "dog!"]);
        let prepared = preprocessed(&headwords);
        assert_eq!(prepared, vec!["the cat".to_string(), "dog".to_string()]);
    }

    #[test]
    fn exact_filter() {
        let registry = StrategyRegistry::new();
        let filter = registry.get_filter(Some("exact")).unwrap();
        let headwords = words(&["The", "theme", "the"]);
        let prepared = preprocessed(&headwords);
        assert_eq!(
            filter.filter("THE!", &headwords, &prepared),
            words(&["The", "the"])
        );
    }

    #[test]
    fn prefix_filter_preserves_order() {
        let registry = StrategyRegistry::new();
        let filter = registry.get_filter(Some("prefix")).unwrap();
        let headwords = words(&["the", "cat", "thesis", "throne"]);
        let prepared = preprocessed(&headwords);
        assert_eq!(
            filter.filter("th", &headwords, &prepared),
            words(&["the", "thesis", "throne"])
        );
    }

    #[test]
    fn default_filter_is_prefix() {
        let registry = StrategyRegistry::new();
        let filter = registry.get_filter(None).unwrap();
        let headwords = words(&["the", "thesis"]);
        let prepared = preprocessed(&headwords);
        assert_eq!(filter.filter("the", &headwords, &prepared).len(), 2);
    }

    #[test]
    fn unknown_strategy_is_an_error() {
        let registry = StrategyRegistry::new();
        match registry.get_filter(Some("soundex")) {
            Err(DictError::InvalidStrategy(name)) => assert_eq!(name, "soundex"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn configure_narrows_and_redesignates() {
        let registry = StrategyRegistry::from_config("exact:exact").unwrap();
        assert_eq!(registry.list(), vec![("exact", "Match headwords exactly")]);
        assert!(registry.get_filter(None).is_ok());
        assert!(registry.get_filter(Some("prefix")).is_err());
    }

    #[test]
    fn configure_keeps_builtins_when_empty() {
        let registry = StrategyRegistry::from_config("").unwrap();
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn configure_rejects_unknown_strategy() {
        assert!(StrategyRegistry::from_config("exact:exact,soundex").is_err());
    }

    #[test]
    fn configure_rejects_foreign_default() {
        assert!(StrategyRegistry::from_config("prefix:exact").is_err());
    }
}
