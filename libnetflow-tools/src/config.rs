use std::io;

pub struct Config {
    value: toml::Value,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            value: toml::Value::Table(toml::map::Map::new()),
        }
    }
}

impl Config {
    fn lookup(&self, k: &str) -> Option<&toml::Value> {
        let mut item = &self.value;
        for key in k.split('.') {
            item = item.get(key)?;
        }
        Some(item)
    }

    /// Get an entry by path. If the input argument contains dots, the path is split
    /// into keys, each key being requested recursively.
    pub fn get<T: AsRef<str>>(&self, k: T) -> Option<&str> {
        self.lookup(k.as_ref())?.as_str()
    }

    /// Get an entry of type integer by path, without range conversion
    pub fn get_i64<T: AsRef<str>>(&self, k: T) -> Option<i64> {
        self.lookup(k.as_ref())?.as_integer()
    }

    /// Get an entry of type integer by path
    pub fn get_usize<T: AsRef<str>>(&self, k: T) -> Option<usize> {
        self.lookup(k.as_ref())?
            .as_integer()
            .and_then(|i| usize::try_from(i).ok())
    }

    /// Get an entry of type boolean by path
    pub fn get_bool<T: AsRef<str>>(&self, k: T) -> Option<bool> {
        self.lookup(k.as_ref())?.as_bool()
    }

    /// Set an entry by path, creating intermediate tables if needed.
    ///
    /// An intermediate key holding a non-table value is replaced by a table.
    pub fn set<T: AsRef<str>, V: Into<toml::Value>>(&mut self, k: T, v: V) {
        let keys: Vec<&str> = k.as_ref().split('.').collect();
        let (last, parents) = match keys.split_last() {
            Some(split) => split,
            None => return,
        };
        let mut table = match &mut self.value {
            toml::Value::Table(t) => t,
            _ => return,
        };
        for key in parents {
            let entry = table
                .entry(*key)
                .or_insert(toml::Value::Table(toml::map::Map::new()));
            if !entry.is_table() {
                *entry = toml::Value::Table(toml::map::Map::new());
            }
            table = match entry {
                toml::Value::Table(t) => t,
                _ => return,
            };
        }
        table.insert((*last).to_owned(), v.into());
    }

    /// Load configuration from input object. If keys are already present, they are overwritten
    pub fn load_config<R: io::Read>(&mut self, mut config: R) -> Result<(), io::Error> {
        let mut s = String::new();
        config.read_to_string(&mut s)?;
        match toml::from_str::<toml::Table>(&s) {
            Ok(table) => {
                self.value = toml::Value::Table(table);
                Ok(())
            }
            Err(e) => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("Load configuration failed: {e}"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Config;

    const CONFIG: &str = r#"
num_workers = 8
log_file = "bridge.log"

[listen]
port = 2055
reuse = true
"#;

    #[test]
    fn config_load_and_get() {
        let mut config = Config::default();
        config.load_config(CONFIG.as_bytes()).expect("load");
        assert_eq!(config.get_usize("num_workers"), Some(8));
        assert_eq!(config.get("log_file"), Some("bridge.log"));
        assert_eq!(config.get_usize("listen.port"), Some(2055));
        assert_eq!(config.get_bool("listen.reuse"), Some(true));
        assert_eq!(config.get("listen.address"), None);
        // wrong type
        assert_eq!(config.get("num_workers"), None);
    }

    #[test]
    fn config_set_overrides() {
        let mut config = Config::default();
        config.load_config(CONFIG.as_bytes()).expect("load");
        config.set("listen.port", 9995_i64);
        config.set("publish.endpoint", "tcp://127.0.0.1:6000");
        config.set("log_file.name", "x");
        assert_eq!(config.get_usize("listen.port"), Some(9995));
        assert_eq!(config.get_bool("listen.reuse"), Some(true));
        assert_eq!(config.get("publish.endpoint"), Some("tcp://127.0.0.1:6000"));
        assert_eq!(config.get("log_file.name"), Some("x"));
    }

    #[test]
    fn config_negative_integer() {
        let mut config = Config::default();
        config.set("num_workers", -1_i64);
        assert_eq!(config.get_usize("num_workers"), None);
        assert_eq!(config.get_i64("num_workers"), Some(-1));
    }

    #[test]
    fn config_invalid() {
        let mut config = Config::default();
        assert!(config.load_config("num_workers = ".as_bytes()).is_err());
    }
}
