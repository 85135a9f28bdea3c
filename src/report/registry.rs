//! Resolution of locally installed modules.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::Deserialize;
use strum::IntoEnumIterator;

use super::{
    schema::{Level, RawColumnDef},
    summary::{ColumnAggregator, GeneSummarizer},
};

/// Kind of a module, also the name of its directory in the module store.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    serde::Serialize,
    serde::Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModuleType {
    Annotator,
    Postaggregator,
    Mapper,
    Reporter,
}

/// The parts of a module's YAML configuration used for reporting.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ModuleConf {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "type")]
    pub module_type: Option<ModuleType>,
    #[serde(default)]
    pub level: Option<Level>,
    /// Set if the key is present with any value but `false` or null.
    #[serde(default, deserialize_with = "deserialize_capability")]
    pub can_summarize_by_gene: bool,
    #[serde(default)]
    pub gene_summary_output_columns: Vec<RawColumnDef>,
    /// Columns a reporter needs in the result database.
    #[serde(default)]
    pub mandatory_columns: Vec<String>,
}

fn deserialize_capability<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_yaml::Value>::deserialize(deserializer)?;
    Ok(!matches!(
        value,
        None | Some(serde_yaml::Value::Null) | Some(serde_yaml::Value::Bool(false))
    ))
}

/// A module found in the local module store.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalModuleInfo {
    pub name: String,
    pub module_type: ModuleType,
    pub title: String,
    pub dir: PathBuf,
    pub conf: ModuleConf,
}

/// Resolves modules by name.
pub trait ModuleRegistry {
    /// Information on the locally installed module `name`, if any.
    fn local_module_info(&self, name: &str) -> Result<Option<LocalModuleInfo>, anyhow::Error>;

    /// The gene summarizer of a module, if it has one.
    fn summarizer(&self, info: &LocalModuleInfo) -> Option<Arc<dyn GeneSummarizer>>;
}

/// Module store on the local file system.
///
/// Modules live in `<root>/<type>s/<name>/<name>.yml`.
#[derive(Debug, Clone, Default)]
pub struct LocalModuleStore {
    root: Option<PathBuf>,
}

impl LocalModuleStore {
    pub fn new<P: AsRef<Path>>(root: Option<P>) -> Self {
        Self {
            root: root.map(|p| p.as_ref().to_path_buf()),
        }
    }

    fn load(path: &Path) -> Result<ModuleConf, anyhow::Error> {
        let file = std::fs::File::open(path)
            .map_err(|e| anyhow::anyhow!("could not open {:?}: {}", path, e))?;
        serde_yaml::from_reader(file)
            .map_err(|e| anyhow::anyhow!("could not parse module config {:?}: {}", path, e))
    }
}

impl ModuleRegistry for LocalModuleStore {
    fn local_module_info(&self, name: &str) -> Result<Option<LocalModuleInfo>, anyhow::Error> {
        let Some(root) = &self.root else {
            return Ok(None);
        };
        for module_type in ModuleType::iter() {
            let dir = root.join(format!("{}s", module_type)).join(name);
            let path = dir.join(format!("{}.yml", name));
            if !path.is_file() {
                continue;
            }
            let conf = match Self::load(&path) {
                Ok(conf) => conf,
                Err(e) => {
                    tracing::warn!("skipping module {}: {}", name, e);
                    return Ok(None);
                }
            };
            return Ok(Some(LocalModuleInfo {
                name: name.to_string(),
                module_type: conf.module_type.unwrap_or(module_type),
                title: conf.title.clone().unwrap_or_else(|| name.to_string()),
                dir,
                conf,
            }));
        }
        Ok(None)
    }

    fn summarizer(&self, info: &LocalModuleInfo) -> Option<Arc<dyn GeneSummarizer>> {
        let capable =
            info.conf.can_summarize_by_gene || info.module_type == ModuleType::Mapper;
        if capable && !info.conf.gene_summary_output_columns.is_empty() {
            Some(Arc::new(ColumnAggregator))
        } else {
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod test {
    use indexmap::IndexMap;
    use pretty_assertions::assert_eq;

    use super::*;

    /// Registry with modules given in code.
    #[derive(Default)]
    pub struct StaticRegistry {
        modules: IndexMap<String, (LocalModuleInfo, Option<Arc<dyn GeneSummarizer>>)>,
    }

    impl StaticRegistry {
        /// Register a module using the built-in column aggregator.
        pub fn with_module(
            self,
            name: &str,
            module_type: ModuleType,
            can_summarize: bool,
            summary_columns: &[&str],
        ) -> Self {
            let summarizer: Option<Arc<dyn GeneSummarizer>> = if can_summarize {
                Some(Arc::new(ColumnAggregator))
            } else {
                None
            };
            self.with_summarizer(name, module_type, can_summarize, summary_columns, summarizer)
        }

        /// Register a module with the given summarizer.
        pub fn with_summarizer(
            mut self,
            name: &str,
            module_type: ModuleType,
            can_summarize: bool,
            summary_columns: &[&str],
            summarizer: Option<Arc<dyn GeneSummarizer>>,
        ) -> Self {
            let conf = ModuleConf {
                title: Some(format!("{} title", name)),
                module_type: Some(module_type),
                can_summarize_by_gene: can_summarize,
                gene_summary_output_columns: summary_columns
                    .iter()
                    .map(|c| RawColumnDef {
                        name: c.to_string(),
                        title: Some(c.to_uppercase()),
                        col_type: Some("int".into()),
                        category: Some("single".into()),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            };
            let info = LocalModuleInfo {
                name: name.into(),
                module_type,
                title: format!("{} title", name),
                dir: PathBuf::from(name),
                conf,
            };
            self.modules.insert(name.into(), (info, summarizer));
            self
        }

        /// Register a reporter declaring mandatory columns.
        pub fn with_reporter(mut self, name: &str, mandatory_columns: &[&str]) -> Self {
            let info = LocalModuleInfo {
                name: name.into(),
                module_type: ModuleType::Reporter,
                title: name.into(),
                dir: PathBuf::from(name),
                conf: ModuleConf {
                    mandatory_columns: mandatory_columns.iter().map(|c| c.to_string()).collect(),
                    ..Default::default()
                },
            };
            self.modules.insert(name.into(), (info, None));
            self
        }
    }

    impl ModuleRegistry for StaticRegistry {
        fn local_module_info(&self, name: &str) -> Result<Option<LocalModuleInfo>, anyhow::Error> {
            Ok(self.modules.get(name).map(|(info, _)| info.clone()))
        }

        fn summarizer(&self, info: &LocalModuleInfo) -> Option<Arc<dyn GeneSummarizer>> {
            self.modules
                .get(&info.name)
                .and_then(|(_, summarizer)| summarizer.clone())
        }
    }

    #[rstest::rstest]
    #[case::absent("title: x\n", false)]
    #[case::null("can_summarize_by_gene:\n", false)]
    #[case::falsy("can_summarize_by_gene: false\n", false)]
    #[case::truthy("can_summarize_by_gene: true\n", true)]
    #[case::mapping("can_summarize_by_gene:\n  mode: all\n", true)]
    fn capability(#[case] yaml: &str, #[case] expected: bool) -> Result<(), anyhow::Error> {
        let conf: ModuleConf = serde_yaml::from_str(yaml)?;
        assert_eq!(conf.can_summarize_by_gene, expected);
        Ok(())
    }

    #[test]
    fn local_store_lookup() -> Result<(), anyhow::Error> {
        let store = LocalModuleStore::new(Some("tests/report/modules"));

        let info = store
            .local_module_info("summarymod")?
            .expect("summarymod installed");
        assert_eq!(info.module_type, ModuleType::Annotator);
        assert_eq!(info.title, "Summary Module");
        assert!(info.conf.can_summarize_by_gene);
        assert_eq!(
            info.conf
                .gene_summary_output_columns
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>(),
            vec!["count", "maxscore"]
        );
        assert!(store.summarizer(&info).is_some());

        let reporter = store
            .local_module_info("tsvreporter")?
            .expect("tsvreporter installed");
        assert_eq!(reporter.module_type, ModuleType::Reporter);
        assert_eq!(reporter.conf.mandatory_columns, vec!["base__uid"]);
        assert!(store.summarizer(&reporter).is_none());

        assert!(store.local_module_info("missing")?.is_none());
        assert!(LocalModuleStore::default()
            .local_module_info("summarymod")?
            .is_none());

        Ok(())
    }
}
