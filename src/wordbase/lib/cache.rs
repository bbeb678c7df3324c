use crate::errors::DictError;

/// Memoisation front for word lists. Misses and errors are equivalent to
/// callers; a failing cache never breaks a query.
pub trait Cache {
    fn connect(&mut self) -> Result<(), DictError>;
    fn close(&mut self) -> Result<(), DictError>;
    fn get(&mut self, key: &str) -> Result<Option<Vec<u8>>, DictError>;
    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), DictError>;
}

/// The configured-off cache: stores nothing, always misses.
pub struct NullCache;

impl Cache for NullCache {
    fn connect(&mut self) -> Result<(), DictError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), DictError> {
        Ok(())
    }

    fn get(&mut self, _key: &str) -> Result<Option<Vec<u8>>, DictError> {
        Ok(None)
    }

    fn set(&mut self, _key: &str, _value: &[u8]) -> Result<(), DictError> {
        Ok(())
    }
}

pub fn words_key(database: &str) -> String {
    format!("words:{}", database)
}

pub fn preproc_key(database: &str) -> String {
    format!("preproc:{}", database)
}

/// Newline-joins a word list. Splitting drops a trailing empty element, so
/// when the final headword is empty a sentinel newline is appended to keep
/// the round trip exact. The format is shared with pre-existing caches.
pub fn format_list(items: &[String]) -> Vec<u8> {
    let mut formatted = items.join("\n");
    if items.last().map(|item| item.is_empty()).unwrap_or(false) {
        formatted.push('\n');
    }
    formatted.into_bytes()
}

pub fn parse_list(data: &[u8]) -> Result<Vec<String>, DictError> {
    let text = String::from_utf8(data.to_vec())
        .map_err(|e| DictError::CacheError(format!("corrupt cached list: {}", e)))?;
    Ok(text.lines().map(|line| line.to_string()).collect())
}
