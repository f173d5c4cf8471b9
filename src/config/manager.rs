//! Configuration file wrangling
// (c) 2024 Ross Younger

use std::fmt::{Display, Write as _};
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use figment::{
    Figment, Metadata, Profile, Provider,
    providers::{Env, Format as _, Serialized, Toml},
    value::{Dict, Map, Value},
};
use struct_field_names_as_array::FieldNamesAsSlice as _;
use tracing::debug;

use super::{ConfigOverrides, Configuration};

/// Prefix for configuration environment variables
const ENV_PREFIX: &str = "COPYBENCH_";
/// Name of the configuration file, in both locations
const CONFIG_FILE: &str = "copybench.toml";

impl Provider for Configuration {
    fn metadata(&self) -> Metadata {
        Metadata::named("default")
    }

    fn data(&self) -> figment::Result<Map<Profile, Dict>> {
        Serialized::defaults(self).data()
    }
}

impl Provider for ConfigOverrides {
    fn metadata(&self) -> Metadata {
        Metadata::named("command line")
    }

    fn data(&self) -> figment::Result<Map<Profile, Dict>> {
        Serialized::defaults(self).data()
    }
}

/// Processes and merges all possible configuration sources.
///
/// To see which files apply on the current platform, run `copybench --config-files`.
#[derive(Debug, Clone)]
pub struct Manager {
    /// Configuration data
    data: Figment,
}

impl Manager {
    fn new(apply_config_files: bool, apply_env: bool) -> Self {
        let mut new1 = Self {
            data: Figment::from(Configuration::default()),
        };
        if apply_config_files {
            new1.merge_file(Self::system_config_path());
            if let Some(p) = Self::user_config_path() {
                new1.merge_file(p);
            }
        }
        if apply_env {
            new1.merge_provider(Env::prefixed(ENV_PREFIX));
        }
        new1
    }

    /// General constructor for production use
    ///
    /// Reads the configuration files appropriate to the platform and the current user,
    /// then the environment.
    #[must_use]
    pub fn standard() -> Self {
        Self::new(true, true)
    }

    /// Testing/internal constructor; applies the hard-wired defaults only.
    #[must_use]
    pub fn without_files() -> Self {
        Self::new(false, false)
    }

    /// The system-wide configuration file
    #[must_use]
    pub fn system_config_path() -> PathBuf {
        PathBuf::from("/etc").join(CONFIG_FILE)
    }

    /// The current user's configuration file, if we can work out where it lives
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("copybench").join(CONFIG_FILE))
    }

    /// Returns the list of configuration files we read.
    ///
    /// This is a function of platform and the current user.
    #[must_use]
    pub fn config_files() -> Vec<String> {
        std::iter::once(Self::system_config_path())
            .chain(Self::user_config_path())
            .map(|p| p.to_string_lossy().to_string())
            .collect()
    }

    /// Merges in a data set, which is some sort of [figment::Provider](https://docs.rs/figment/latest/figment/trait.Provider.html).
    /// This uses figment's `merge` operation, which prefers to _replace_ existing items.
    pub fn merge_provider<T>(&mut self, provider: T)
    where
        T: Provider,
    {
        let f = std::mem::take(&mut self.data);
        self.data = f.merge(provider); // in the error case, this leaves the provider in a fused state
    }

    /// Merges in a TOML configuration file. A file that does not exist is skipped.
    pub fn merge_file<P>(&mut self, path: P)
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        if !path.exists() {
            debug!("configuration file {path:?} not present");
            return;
        }
        self.merge_provider(Toml::file(path));
    }

    /// Extracts and validates the merged configuration
    pub fn get(&self) -> Result<Configuration> {
        self.data
            .extract::<Configuration>()
            .context("failed to read configuration")?
            .validate()
    }
}

fn render_source(meta: Option<&Metadata>) -> String {
    meta.map_or_else(String::new, |m| {
        m.source
            .as_ref()
            .map_or_else(|| m.name.to_string(), figment::Source::to_string)
    })
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(_tag, s) => s.to_string(),
        Value::Char(_tag, c) => c.to_string(),
        Value::Bool(_tag, b) => b.to_string(),
        Value::Num(_tag, num) => num
            .to_u128()
            .map(|u| u.to_string())
            .or_else(|| num.to_i128().map(|i| i.to_string()))
            .or_else(|| num.to_f64().map(|f| f.to_string()))
            .unwrap_or_default(),
        Value::Empty(_tag, _) => "<empty>".into(),
        Value::Dict(_tag, _) => "<table>".into(),
        Value::Array(_tag, vec) => format!(
            "[{}]",
            vec.iter().map(render_value).collect::<Vec<_>>().join(",")
        ),
    }
}

impl Display for Manager {
    /// Renders every configuration field with its value and where that value came from
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = String::new();
        writeln!(out, "{:<26} {:<24} {}", "Field", "Value", "Source")?;
        for field in Configuration::FIELD_NAMES_AS_SLICE {
            let value = self
                .data
                .find_value(field)
                .map(|v| render_value(&v))
                .unwrap_or_default();
            let source = render_source(self.data.find_metadata(field));
            writeln!(out, "{field:<26} {value:<24} {source}")?;
        }
        f.write_str(&out)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod test {
    use super::Manager;
    use crate::config::{ConfigOverrides, Configuration};
    use crate::strategy::Strategy;
    use crate::util::TimeFormat;
    use assertables::assert_contains;
    use pretty_assertions::assert_eq;
    use std::io::Write as _;

    fn toml_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults() {
        let mgr = Manager::without_files();
        assert_eq!(mgr.get().unwrap(), Configuration::default());
    }

    #[test]
    fn file_values() {
        let file = toml_file(
            r#"
            strategy = "ZERO-COPY"
            backlog = 5
            time_format = "utc"
            "#,
        );
        let mut mgr = Manager::without_files();
        mgr.merge_file(file.path());
        let c = mgr.get().unwrap();
        assert_eq!(c.strategy, Strategy::ZeroCopy);
        assert_eq!(c.backlog, 5);
        assert_eq!(c.time_format, TimeFormat::Utc);
        assert_eq!(c.sink_buffer, Configuration::default().sink_buffer);
    }

    #[test]
    fn cli_beats_config_file() {
        let file = toml_file("strategy = \"one-copy\"\nmax_payload = 99\n");
        let entered = ConfigOverrides {
            strategy: Some(Strategy::TwoCopy),
            ..Default::default()
        };
        let mut mgr = Manager::without_files();
        mgr.merge_file(file.path());
        mgr.merge_provider(entered);
        let c = mgr.get().unwrap();
        assert_eq!(c.strategy, Strategy::TwoCopy);
        assert_eq!(c.max_payload, 99);
    }

    #[test]
    fn missing_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = Manager::without_files();
        mgr.merge_file(dir.path().join("nope.toml"));
        assert_eq!(mgr.get().unwrap(), Configuration::default());
    }

    #[test]
    fn invalid_enum() {
        let file = toml_file("strategy = \"wombat\"\n");
        let mut mgr = Manager::without_files();
        mgr.merge_file(file.path());
        let err = format!("{:#}", mgr.get().unwrap_err());
        assert_contains!(err, "wombat");
        assert_contains!(err, "zero-copy");
    }

    #[test]
    fn invalid_value_fails_validation() {
        let mut mgr = Manager::without_files();
        mgr.merge_provider(ConfigOverrides {
            backlog: Some(0),
            ..Default::default()
        });
        assert!(mgr.get().is_err());
    }

    #[test]
    fn display_shows_sources() {
        let mut mgr = Manager::without_files();
        mgr.merge_provider(ConfigOverrides {
            backlog: Some(64),
            ..Default::default()
        });
        let out = mgr.to_string();
        assert_contains!(out, "backlog");
        assert_contains!(out, "64");
        assert_contains!(out, "command line");
        assert_contains!(out, "127.0.0.1:8080");
        assert_contains!(out, "default");
    }

    #[test]
    fn display_covers_every_field() {
        use figment::Provider as _;
        use struct_field_names_as_array::FieldNamesAsSlice as _;
        let out = Manager::without_files().to_string();
        let defaults = Configuration::default().data().unwrap();
        for key in defaults.values().flat_map(|dict| dict.keys()) {
            assert_contains!(out, key.as_str());
        }
        // one header line, then one line per field
        assert_eq!(
            out.lines().count(),
            Configuration::FIELD_NAMES_AS_SLICE.len() + 1
        );
    }

    #[test]
    fn config_file_list() {
        let files = Manager::config_files();
        assert!(!files.is_empty());
        assert_contains!(files[0], "copybench.toml");
    }
}
