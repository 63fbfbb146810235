use anyhow::Context;
use postgres::{Client, NoTls, Statement};
use std::collections::HashMap;

use super::{layer_table_name, IfExists, OsmSink};
use crate::{
    config::DatabaseConfig,
    osm::data::{FeatureRecord, OsmData},
};

/// PostgreSQL truncates identifiers longer than this many bytes.
const MAX_IDENTIFIER_BYTES: usize = 63;

const LAYER_COLUMNS: &str = "id BIGINT, geometry JSONB, properties JSONB";
const EXTRACT_COLUMNS: &str = "layer TEXT, id BIGINT, geometry JSONB, properties JSONB";

pub struct PostgresOsmDatabase {
    client: Client,
    insert_statements: HashMap<String, Statement>,
}

impl PostgresOsmDatabase {
    /// Connect to the configured database, creating it first if it does not exist.
    pub fn connect(config: &DatabaseConfig) -> anyhow::Result<Self> {
        log::info!(
            "Connecting to {}@{}:{}",
            config.user,
            config.host,
            config.port
        );
        let mut maintenance_client = connection_config(config, &config.maintenance_database)
            .connect(NoTls)
            .with_context(|| format!("Connecting to database {}", config.maintenance_database))?;
        let exists = maintenance_client
            .query_opt(
                "SELECT 1 FROM pg_database WHERE datname = $1",
                &[&config.database_name],
            )?
            .is_some();
        if !exists {
            log::info!("Creating database {}", config.database_name);
            maintenance_client
                .batch_execute(&format!(
                    "CREATE DATABASE {}",
                    quote_identifier(&config.database_name)
                ))
                .with_context(|| format!("Creating database {}", config.database_name))?;
        }
        maintenance_client.close()?;

        let client = connection_config(config, &config.database_name)
            .connect(NoTls)
            .with_context(|| format!("Connecting to database {}", config.database_name))?;
        Ok(Self {
            client,
            insert_statements: HashMap::new(),
        })
    }
}

fn connection_config(config: &DatabaseConfig, database_name: &str) -> postgres::Config {
    let mut pg_config = postgres::Config::new();
    pg_config
        .host(&config.host)
        .port(config.port)
        .user(&config.user)
        .dbname(database_name);
    if let Some(password) = &config.password {
        pg_config.password(password);
    }
    pg_config
}

impl OsmSink for PostgresOsmDatabase {
    fn dump_data(&mut self, data: &OsmData, table_name: &str) -> anyhow::Result<()> {
        let table = quote_identifier(table_name);
        log::info!(
            "Dumping {} features of {:?} to table {}",
            data.feature_count(),
            data.subregion,
            table
        );
        // Committing all rows at once instead of per row is a massive speedup.
        let mut transaction = self.client.transaction()?;
        transaction.batch_execute(&replace_table_sql(&table, EXTRACT_COLUMNS))?;
        let statement = transaction.prepare(&format!(
            "INSERT INTO {} (layer, id, geometry, properties) VALUES ($1, $2, $3, $4)",
            table
        ))?;
        for layer in &data.layers {
            for feature in &layer.features {
                transaction.execute(
                    &statement,
                    &[
                        &layer.name,
                        &feature.id,
                        &feature.geometry_json(),
                        &feature.properties_json(),
                    ],
                )?;
            }
        }
        transaction
            .commit()
            .with_context(|| format!("Writing table {}", table))?;
        self.insert_statements.remove(&table);
        Ok(())
    }

    fn dump_layer_record(
        &mut self,
        record: &FeatureRecord,
        subregion: &str,
        layer: &str,
        if_exists: IfExists,
    ) -> anyhow::Result<()> {
        let table = quote_identifier(&layer_table_name(subregion, layer));
        if if_exists == IfExists::Replace {
            self.insert_statements.remove(&table);
        }
        if let Some(sql) = layer_table_setup_sql(
            &table,
            if_exists,
            self.insert_statements.contains_key(&table),
        ) {
            self.client.batch_execute(&sql)?;
        }
        let statement = match self.insert_statements.get(&table) {
            Some(statement) => statement.clone(),
            None => {
                let statement = self.client.prepare(&format!(
                    "INSERT INTO {} (id, geometry, properties) VALUES ($1, $2, $3)",
                    table
                ))?;
                self.insert_statements
                    .insert(table.clone(), statement.clone());
                statement
            }
        };
        self.client
            .execute(
                &statement,
                &[
                    &record.id,
                    &record.geometry_json(),
                    &record.properties_json(),
                ],
            )
            .with_context(|| format!("Inserting feature {:?} into {}", record.id, table))?;
        Ok(())
    }

    fn release_buffers(&mut self) {
        log::debug!(
            "Releasing {} cached insert statements",
            self.insert_statements.len()
        );
        self.insert_statements = HashMap::new();
    }
}

/// SQL to run before inserting a row into a layer table. An append to a table whose insert
/// statement is cached needs none, since the table was created earlier in the run.
fn layer_table_setup_sql(
    quoted_table: &str,
    if_exists: IfExists,
    statement_cached: bool,
) -> Option<String> {
    match if_exists {
        IfExists::Replace => Some(replace_table_sql(quoted_table, LAYER_COLUMNS)),
        IfExists::Append if statement_cached => None,
        IfExists::Append => Some(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quoted_table, LAYER_COLUMNS
        )),
    }
}

fn replace_table_sql(quoted_table: &str, columns: &str) -> String {
    format!(
        "DROP TABLE IF EXISTS {table}; CREATE TABLE {table} ({columns})",
        table = quoted_table,
        columns = columns
    )
}

/// Quote a name for use as an SQL identifier, truncating it the way PostgreSQL would.
pub fn quote_identifier(name: &str) -> String {
    let mut end = name.len().min(MAX_IDENTIFIER_BYTES);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    format!("\"{}\"", name[..end].replace('"', "\"\""))
}
