use std::env;
use std::path::PathBuf;

/// One retrieval corpus: where its documents live, how its tool is
/// described to the router, and how many snippets a query returns.
#[derive(Debug, Clone)]
pub struct CorpusConfig {
    pub name: String,
    pub description: String,
    /// Subdirectory of the data dir holding the corpus documents.
    pub subdir: String,
    pub top_k: u64,
}

/// Application configuration: the document base directory and the corpora
/// served from it.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub corpora: Vec<CorpusConfig>,
}

impl AppConfig {
    /// Create the configuration from environment variables, with the two
    /// built-in corpora. `ATELIER_DATA_DIR` overrides the document base
    /// directory (default `./data`).
    pub fn from_env() -> Self {
        let data_dir = env::var("ATELIER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("data"));

        AppConfig {
            data_dir,
            corpora: default_corpora(),
        }
    }

    /// Look up a corpus by name.
    pub fn corpus(&self, name: &str) -> Option<&CorpusConfig> {
        self.corpora.iter().find(|c| c.name == name)
    }
}

/// The two corpora the assistant serves. The FAQ corpus is small and
/// precise (top 2), the supplier directory is larger and benefits from a
/// wider net (top 5).
fn default_corpora() -> Vec<CorpusConfig> {
    vec![
        CorpusConfig {
            name: "faq".into(),
            description: "Useful for general information about the Atelier \
                marketplace. Do not use for looking up specific suppliers."
                .into(),
            subdir: "faq".into(),
            top_k: 2,
        },
        CorpusConfig {
            name: "supplier".into(),
            description: "Useful for supplier recommendations on Atelier. \
                Covers every category of supplier; each supplier has a name, \
                country, bio, notable works, attributes, customizations and \
                item information."
                .into(),
            subdir: "supplier".into(),
            top_k: 5,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_corpora_have_unique_names_and_descriptions() {
        let corpora = default_corpora();
        assert_eq!(corpora.len(), 2);
        assert_ne!(corpora[0].name, corpora[1].name);
        for corpus in &corpora {
            assert!(!corpus.description.is_empty());
            assert!(corpus.top_k > 0);
        }
    }

    #[test]
    fn corpus_lookup_by_name() {
        let config = AppConfig {
            data_dir: PathBuf::from("data"),
            corpora: default_corpora(),
        };
        assert_eq!(config.corpus("faq").map(|c| c.top_k), Some(2));
        assert_eq!(config.corpus("supplier").map(|c| c.top_k), Some(5));
        assert!(config.corpus("pricing").is_none());
    }
}
