use crate::errors::DictError;

/// One row of the dictionary catalog, in `db_order`.
#[derive(Debug, Clone)]
pub struct DatabaseEntry {
    pub name: String,
    pub is_virtual: bool,
    pub short_desc: String,
}

/// Database-agnostic query surface for the definition store. A backend is
/// owned by one session; opening may be deferred to the first query.
pub trait Backend {
    fn connect(&mut self) -> Result<(), DictError>;
    fn close(&mut self) -> Result<(), DictError>;

    /// All dictionaries in `db_order`.
    fn get_databases(&mut self) -> Result<Vec<DatabaseEntry>, DictError>;

    /// Virtual flag and optional info text for one dictionary.
    fn get_database_info(&mut self, database: &str) -> Result<(bool, Option<String>), DictError>;

    /// Headwords of a real dictionary.
    fn get_words(&mut self, database: &str) -> Result<Vec<String>, DictError>;

    /// Member names of a virtual dictionary, in `db_order`.
    fn get_virtual_database(&mut self, database: &str) -> Result<Vec<String>, DictError>;

    fn get_definitions(&mut self, database: &str, word: &str) -> Result<Vec<String>, DictError>;
}

pub fn invalid_db(name: &str) -> DictError {
    DictError::InvalidDatabase(name.to_string())
}
