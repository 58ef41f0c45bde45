//! Loading of the crawler's INI configuration file.
//!
//! Every other component takes a [`Config`] by value (or a borrow of one)
//! rather than reaching for a global. This replaces the original
//! implementation's module-level `ConfigParser` singleton, imported and
//! read from ad hoc by every script.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{format_err, Context};
use ini::Ini;

use crate::Result;

/// Which upstream map-provider search API we crawl against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataSource {
    Baidu,
    Gaode,
}

impl DataSource {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "baidu" => Ok(DataSource::Baidu),
            "gaode" => Ok(DataSource::Gaode),
            other => Err(format_err!("unknown data_source {:?}", other)),
        }
    }
}

/// Which mode the task seeder operates in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SeedMode {
    /// Enqueue one task per named city (or, for `region == "*"`, every
    /// configured city).
    City,
    /// Tile a configured grid file's polygons into geohash cells.
    Grid,
}

impl SeedMode {
    fn parse(s: &str) -> Result<Self> {
        match s {
            "city" => Ok(SeedMode::City),
            "grid" => Ok(SeedMode::Grid),
            other => Err(format_err!("unknown mode {:?}", other)),
        }
    }
}

/// Coordination-store (Redis) connection details and the names of the five
/// collections it hosts.
#[derive(Clone, Debug)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub ak_db: String,
    pub task_db: String,
    pub result_db: String,
    pub visit_db: String,
}

impl RedisConfig {
    /// Build a `redis://` URL suitable for `CoordinationStore::new_from_url`.
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

/// Downstream (Postgres) connection details for the Poi table.
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    /// The table the persistence worker upserts into.
    pub table: String,
}

impl DatabaseConfig {
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

/// The crawler's full, value-typed configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub data_source: DataSource,
    pub proxy: bool,
    /// Re-fetch and re-store POIs already marked visited, without
    /// duplicating their result-queue entry.
    pub update: bool,
    /// Which mode the task seeder operates in.
    pub mode: SeedMode,
    /// Geohash precision the task seeder tiles grid-mode polygons at.
    pub geohash_length: usize,
    /// Path to the `PROV_CITY|WKT` grid file, required in grid mode.
    pub city_file: Option<PathBuf>,
    pub redis: RedisConfig,
    pub database: DatabaseConfig,
    /// Maps an upstream tag string to the normalized category name used in
    /// the Poi table, loaded from the `[category]` section.
    pub categories: HashMap<String, String>,
    /// Nationwide list of city names, loaded from the `[city]` section, used
    /// by the task seeder's city mode.
    pub cities: Vec<String>,
}

impl Config {
    /// Load configuration from an INI file at `path`.
    pub fn from_path(path: &Path) -> Result<Config> {
        let ini = Ini::load_from_file(path)
            .with_context(|| format!("could not read config file {}", path.display()))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Config> {
        let common = section(ini, "common")?;
        let data_source = DataSource::parse(get(common, "data_source")?)?;
        let serialize_db = get(common, "serialize_db")?.to_owned();
        let proxy = get(common, "proxy")
            .ok()
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let update = get(common, "update")
            .ok()
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        let mode = SeedMode::parse(get(common, "mode")?)?;
        let geohash_length = get(common, "geohash_length")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(6);
        let city_file = get(common, "city_file").ok().map(PathBuf::from);

        let redis_section = section(ini, "redis")?;
        let redis = RedisConfig {
            host: get(redis_section, "host")?.to_owned(),
            port: get(redis_section, "port")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(6379),
            ak_db: get(redis_section, "ak_db")?.to_owned(),
            task_db: get(redis_section, "task_db")?.to_owned(),
            result_db: get(redis_section, "result_db")?.to_owned(),
            visit_db: get(redis_section, "visit_db")?.to_owned(),
        };

        let db_section = section(ini, &serialize_db)?;
        let database = DatabaseConfig {
            host: get(db_section, "host")?.to_owned(),
            port: get(db_section, "port")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5432),
            database: get(db_section, "database")?.to_owned(),
            username: get(db_section, "username")?.to_owned(),
            password: get(db_section, "password")?.to_owned(),
            table: get(db_section, "table")?.to_owned(),
        };

        let categories = ini
            .section(Some("category"))
            .map(|props| {
                props
                    .iter()
                    .map(|(k, v)| (k.to_owned(), v.to_owned()))
                    .collect()
            })
            .unwrap_or_default();

        let cities = ini
            .section(Some("city"))
            .map(|props| props.iter().map(|(k, _v)| k.to_owned()).collect())
            .unwrap_or_default();

        Ok(Config {
            data_source,
            proxy,
            update,
            mode,
            geohash_length,
            city_file,
            redis,
            database,
            categories,
            cities,
        })
    }
}

fn section<'a>(ini: &'a Ini, name: &str) -> Result<&'a ini::Properties> {
    ini.section(Some(name))
        .ok_or_else(|| format_err!("config file is missing section [{}]", name))
}

fn get<'a>(props: &'a ini::Properties, key: &str) -> Result<&'a str> {
    props
        .get(key)
        .ok_or_else(|| format_err!("config section is missing key {:?}", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Ini {
        let text = "\
[common]
data_source = baidu
serialize_db = postgresql
proxy = false
update = false
mode = city
geohash_length = 6
city_file = grid.txt

[redis]
host = 127.0.0.1
port = 6379
ak_db = ak_set
task_db = task_list
result_db = result_list
visit_db = visited_set

[postgresql]
host = 127.0.0.1
port = 5432
database = poi
username = poi_user
password = secret
table = poi

[category]
美食 = food
医疗 = medical

[city]
北京市 =
上海市 =
";
        Ini::load_from_str(text).unwrap()
    }

    #[test]
    fn parses_all_sections() {
        let config = Config::from_ini(&sample()).unwrap();
        assert_eq!(config.data_source, DataSource::Baidu);
        assert!(!config.proxy);
        assert!(!config.update);
        assert_eq!(config.mode, SeedMode::City);
        assert_eq!(config.geohash_length, 6);
        assert_eq!(config.city_file, Some(PathBuf::from("grid.txt")));
        assert_eq!(config.database.table, "poi");
        assert_eq!(config.redis.ak_db, "ak_set");
        assert_eq!(config.database.database, "poi");
        assert_eq!(config.categories.get("美食"), Some(&"food".to_owned()));
        assert_eq!(config.cities.len(), 2);
    }

    #[test]
    fn missing_section_is_an_error() {
        let text = "[common]\ndata_source = baidu\nserialize_db = postgresql\n";
        let ini = Ini::load_from_str(text).unwrap();
        assert!(Config::from_ini(&ini).is_err());
    }

    #[test]
    fn unknown_data_source_is_an_error() {
        let text = "[common]\ndata_source = nonsense\nserialize_db = postgresql\n\
                     [redis]\nhost=h\nak_db=a\ntask_db=b\nresult_db=c\nvisit_db=d\n\
                     [postgresql]\nhost=h\ndatabase=d\nusername=u\npassword=p\n";
        let ini = Ini::load_from_str(text).unwrap();
        assert!(Config::from_ini(&ini).is_err());
    }
}
