use log::{debug, error};
use postgres::{Client, NoTls};

use crate::config::Section;
use crate::db::{invalid_db, Backend, DatabaseEntry};
use crate::errors::DictError;

#[derive(Debug, Clone)]
pub struct PgSettings {
    host: String,
    port: u16,
    user: String,
    password: String,
    database: String,
    schema: String,
}

impl PgSettings {
    pub fn from_config(section: Option<&Section>) -> Result<PgSettings, DictError> {
        let empty = Section::default();
        let section = section.unwrap_or(&empty);
        let schema = section.get_str("schema", "");
        Ok(PgSettings {
            host: section.get_str("host", "localhost"),
            port: section.get_int("port", 5432u16)?,
            user: section.get_str("user", "nobody"),
            password: section.get_str("password", ""),
            database: section.get_str("database", "wordbase"),
            schema: if schema.is_empty() {
                "public".to_string()
            } else {
                schema
            },
        })
    }
}

fn pg_err(err: postgres::Error) -> DictError {
    error!("{}", err);
    DictError::BackendError(err.to_string())
}

/// PostgreSQL definition store. The connection is opened on first query, so
/// connect errors surface there rather than at session start.
pub struct PgBackend {
    settings: PgSettings,
    client: Option<Client>,
}

impl PgBackend {
    pub fn new(settings: PgSettings) -> PgBackend {
        PgBackend {
            settings,
            client: None,
        }
    }

    fn client(&mut self) -> Result<&mut Client, DictError> {
        if self.client.is_none() {
            let mut config = postgres::Config::new();
            config
                .host(&self.settings.host)
                .port(self.settings.port)
                .user(&self.settings.user)
                .dbname(&self.settings.database);
            if !self.settings.password.is_empty() {
                config.password(&self.settings.password);
            }
            let client = config.connect(NoTls).map_err(pg_err)?;
            debug!("connected to pgsql");
            self.client = Some(client);
        }
        match self.client.as_mut() {
            Some(client) => Ok(client),
            None => Err(DictError::BackendError("connection unavailable".to_string())),
        }
    }

    /// `(dict_id, virt_id)` for a dictionary; exactly one is populated.
    fn get_ids(&mut self, database: &str) -> Result<(Option<i32>, Option<i32>), DictError> {
        let stmt = format!(
            "SELECT dict_id, virt_id FROM {}.dictionaries WHERE name = $1;",
            self.settings.schema
        );
        let rows = self
            .client()?
            .query(stmt.as_str(), &[&database])
            .map_err(pg_err)?;
        if let Some(row) = rows.get(0) {
            let dict_id: Option<i32> = row.get(0);
            let virt_id: Option<i32> = row.get(1);
            if dict_id.is_some() || virt_id.is_some() {
                return Ok((dict_id, virt_id));
            }
        }
        Err(invalid_db(database))
    }
}

impl Backend for PgBackend {
    fn connect(&mut self) -> Result<(), DictError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), DictError> {
        if let Some(client) = self.client.take() {
            client.close().map_err(pg_err)?;
            debug!("closed the pgsql connection");
        }
        Ok(())
    }

    fn get_databases(&mut self) -> Result<Vec<DatabaseEntry>, DictError> {
        let stmt = format!(
            "SELECT name, (virt_id IS NOT NULL) AS virtual, short_desc \
             FROM {}.dictionaries ORDER BY db_order;",
            self.settings.schema
        );
        let rows = self.client()?.query(stmt.as_str(), &[]).map_err(pg_err)?;
        Ok(rows
            .iter()
            .map(|row| DatabaseEntry {
                name: row.get(0),
                is_virtual: row.get(1),
                short_desc: row.get(2),
            })
            .collect())
    }

    fn get_database_info(&mut self, database: &str) -> Result<(bool, Option<String>), DictError> {
        let stmt = format!(
            "SELECT (virt_id IS NOT NULL) AS virtual, info FROM {}.dictionaries WHERE name = $1;",
            self.settings.schema
        );
        let rows = self
            .client()?
            .query(stmt.as_str(), &[&database])
            .map_err(pg_err)?;
        match rows.get(0) {
            Some(row) => Ok((row.get(0), row.get(1))),
            None => Err(invalid_db(database)),
        }
    }

    fn get_words(&mut self, database: &str) -> Result<Vec<String>, DictError> {
        let (dict_id, _) = self.get_ids(database)?;
        let dict_id = dict_id.ok_or_else(|| {
            DictError::VirtualDatabase(format!("database {} is not real", database))
        })?;
        let stmt = format!(
            "SELECT DISTINCT word FROM {}.definitions WHERE dict_id = $1 ORDER BY word;",
            self.settings.schema
        );
        let rows = self
            .client()?
            .query(stmt.as_str(), &[&dict_id])
            .map_err(pg_err)?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    fn get_virtual_database(&mut self, database: &str) -> Result<Vec<String>, DictError> {
        let (_, virt_id) = self.get_ids(database)?;
        let virt_id = virt_id.ok_or_else(|| {
            DictError::VirtualDatabase(format!("database {} is not virtual", database))
        })?;
        let stmt = format!(
            "SELECT name FROM {0}.dictionaries INNER JOIN {0}.virtual_dictionaries USING (dict_id) \
             WHERE {0}.virtual_dictionaries.virt_id = $1 ORDER BY db_order;",
            self.settings.schema
        );
        let rows = self
            .client()?
            .query(stmt.as_str(), &[&virt_id])
            .map_err(pg_err)?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }

    fn get_definitions(&mut self, database: &str, word: &str) -> Result<Vec<String>, DictError> {
        let stmt = format!(
            "SELECT definition FROM {0}.definitions \
             WHERE dict_id = (SELECT dict_id FROM {0}.dictionaries WHERE name = $1) \
             AND word = $2;",
            self.settings.schema
        );
        let rows = self
            .client()?
            .query(stmt.as_str(), &[&database, &word])
            .map_err(pg_err)?;
        Ok(rows.iter().map(|row| row.get(0)).collect())
    }
}
