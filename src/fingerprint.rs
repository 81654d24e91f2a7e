//! Creation request model and content-addressed fingerprints
//!
//! Two requests that mean the same thing (different casing, ordering, default
//! ports, trailing slashes, fragments) canonicalize to the same value and hash
//! to the same fingerprint. No filesystem or network access happens here.

use crate::error::StoreError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One content source of a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RepoSpec {
    Github {
        /// `owner/repo`
        repo: String,
        #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
        git_ref: Option<String>,
    },
    Web {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<CrawlConfig>,
    },
}

/// Crawl limits attached to a web source; part of the fingerprint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_patterns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_patterns: Option<Vec<String>>,
}

/// A bundle creation request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationInput {
    pub repos: Vec<RepoSpec>,
    #[serde(default)]
    pub libraries: Vec<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl RepoSpec {
    pub fn github(repo: impl Into<String>) -> Self {
        RepoSpec::Github {
            repo: repo.into(),
            git_ref: None,
        }
    }

    pub fn github_at(repo: impl Into<String>, git_ref: impl Into<String>) -> Self {
        RepoSpec::Github {
            repo: repo.into(),
            git_ref: Some(git_ref.into()),
        }
    }

    pub fn web(url: impl Into<String>) -> Self {
        RepoSpec::Web {
            url: url.into(),
            config: None,
        }
    }

    /// Short human-readable label, e.g. `github:owner/repo@main`
    pub fn label(&self) -> String {
        match self {
            RepoSpec::Github { repo, git_ref: Some(r) } => format!("github:{}@{}", repo, r),
            RepoSpec::Github { repo, git_ref: None } => format!("github:{}", repo),
            RepoSpec::Web { url, .. } => format!("web:{}", url),
        }
    }

    fn canonical(&self) -> RepoSpec {
        match self {
            RepoSpec::Github { repo, git_ref } => RepoSpec::Github {
                repo: repo.trim().to_lowercase(),
                git_ref: git_ref
                    .as_deref()
                    .map(str::trim)
                    .filter(|r| !r.is_empty())
                    .map(str::to_string),
            },
            RepoSpec::Web { url, config } => RepoSpec::Web {
                url: normalize_web_url(url),
                config: config.as_ref().and_then(CrawlConfig::canonical),
            },
        }
    }

    /// Composite sort key; only meaningful on canonical specs
    fn sort_key(&self) -> String {
        match self {
            RepoSpec::Github { repo, git_ref } => {
                format!("github:{}@{}", repo, git_ref.as_deref().unwrap_or(""))
            }
            RepoSpec::Web { url, config } => {
                let config = config
                    .as_ref()
                    .and_then(|c| serde_json::to_string(c).ok())
                    .unwrap_or_default();
                format!("web:{}#{}", url, config)
            }
        }
    }
}

impl CrawlConfig {
    /// Sorted patterns, empty fields dropped; `None` when nothing is left
    fn canonical(&self) -> Option<CrawlConfig> {
        let sorted = |patterns: &Option<Vec<String>>| {
            patterns.as_ref().filter(|p| !p.is_empty()).map(|p| {
                let mut p = p.clone();
                p.sort();
                p
            })
        };

        let config = CrawlConfig {
            max_pages: self.max_pages,
            max_depth: self.max_depth,
            include_patterns: sorted(&self.include_patterns),
            exclude_patterns: sorted(&self.exclude_patterns),
        };

        if config == CrawlConfig::default() {
            None
        } else {
            Some(config)
        }
    }
}

impl CreationInput {
    pub fn new(repos: Vec<RepoSpec>) -> Self {
        Self {
            repos,
            ..Default::default()
        }
    }

    pub fn with_libraries<I: IntoIterator<Item = S>, S: Into<String>>(mut self, libraries: I) -> Self {
        self.libraries = libraries.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_topics<I: IntoIterator<Item = S>, S: Into<String>>(mut self, topics: I) -> Self {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }

    /// Reject requests that can never produce a complete bundle
    pub fn validate(&self) -> Result<()> {
        if self.repos.is_empty() {
            return Err(StoreError::InvalidInput("at least one repo is required".to_string()).into());
        }
        for spec in &self.repos {
            match spec {
                RepoSpec::Github { repo, .. } => {
                    let mut parts = repo.trim().split('/');
                    let valid = matches!(
                        (parts.next(), parts.next(), parts.next()),
                        (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty()
                    );
                    if !valid {
                        return Err(StoreError::InvalidInput(format!(
                            "github repo must be 'owner/repo', got '{}'",
                            repo
                        ))
                        .into());
                    }
                }
                RepoSpec::Web { url, .. } => {
                    if url.trim().is_empty() {
                        return Err(StoreError::InvalidInput("web url must not be empty".to_string()).into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Canonical form: normalized fields, sorted lists
    pub fn canonicalize(&self) -> CreationInput {
        let mut repos: Vec<RepoSpec> = self.repos.iter().map(RepoSpec::canonical).collect();
        repos.sort_by_cached_key(RepoSpec::sort_key);

        CreationInput {
            repos,
            libraries: normalize_names(&self.libraries),
            topics: normalize_names(&self.topics),
        }
    }

    /// Labels of every repo, for lease bookkeeping
    pub fn repo_labels(&self) -> Vec<String> {
        self.repos.iter().map(RepoSpec::label).collect()
    }
}

/// SHA-256 (hex) of the canonical JSON form of `input`
pub fn fingerprint(input: &CreationInput) -> String {
    let canonical = input.canonicalize();
    // Serializing plain strings, integers and vectors cannot fail
    let json = serde_json::to_string(&canonical).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Lowercase scheme/host, drop default port and fragment, trim one trailing slash
pub fn normalize_web_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match url::Url::parse(trimmed) {
        Ok(mut url) => {
            // Scheme/host case and default ports are normalized by the parser
            url.set_fragment(None);
            let path = url.path().to_string();
            if path.len() > 1 && path.ends_with('/') {
                url.set_path(&path[..path.len() - 1]);
            }
            url.to_string()
        }
        Err(_) => {
            // No scheme: the part before the first '/' is the host
            let without_fragment = trimmed.split('#').next().unwrap_or(trimmed);
            let (host, rest) = match without_fragment.find('/') {
                Some(i) => without_fragment.split_at(i),
                None => (without_fragment, ""),
            };
            format!("{}{}", host.to_lowercase(), rest.strip_suffix('/').unwrap_or(rest))
        }
    }
}

fn normalize_names(names: &[String]) -> Vec<String> {
    let mut out: Vec<String> = names
        .iter()
        .map(|n| n.trim().to_lowercase())
        .filter(|n| !n.is_empty())
        .collect();
    out.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web_with(config: CrawlConfig) -> RepoSpec {
        RepoSpec::Web {
            url: "https://docs.example.com/guide".to_string(),
            config: Some(config),
        }
    }

    #[test]
    fn test_schemeless_url_host_is_case_insensitive() {
        assert_eq!(normalize_web_url("Docs.Example.com/guide/"), "docs.example.com/guide");
        assert_eq!(normalize_web_url("docs.example.com/guide#intro"), "docs.example.com/guide");
        // Paths keep their case
        assert_eq!(normalize_web_url("DOCS.example.com/Guide"), "docs.example.com/Guide");

        let a = CreationInput::new(vec![RepoSpec::web("Docs.Example.com/guide")]);
        let b = CreationInput::new(vec![RepoSpec::web("docs.example.com/guide")]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_github_case_and_order_insensitive() {
        let a = CreationInput::new(vec![RepoSpec::github("Owner/Repo"), RepoSpec::github("acme/Widgets")]);
        let b = CreationInput::new(vec![RepoSpec::github("acme/widgets"), RepoSpec::github("owner/repo")]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_empty_ref_is_absent() {
        let a = CreationInput::new(vec![RepoSpec::github("owner/repo")]);
        let b = CreationInput::new(vec![RepoSpec::github_at("owner/repo", "  ")]);
        assert_eq!(fingerprint(&a), fingerprint(&b));

        let c = CreationInput::new(vec![RepoSpec::github_at("owner/repo", " main ")]);
        let d = CreationInput::new(vec![RepoSpec::github_at("owner/repo", "main")]);
        assert_eq!(fingerprint(&c), fingerprint(&d));
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[test]
    fn test_web_url_equivalences() {
        let variants = [
            "https://Docs.Example.com/guide",
            "https://docs.example.com:443/guide",
            "https://docs.example.com/guide/",
            "HTTPS://docs.example.com/guide#install",
        ];
        let expected = fingerprint(&CreationInput::new(vec![RepoSpec::web("https://docs.example.com/guide")]));
        for v in variants {
            assert_eq!(
                fingerprint(&CreationInput::new(vec![RepoSpec::web(v)])),
                expected,
                "{} should match",
                v
            );
        }

        assert_eq!(normalize_web_url("http://example.com:80/"), "http://example.com/");
        assert_eq!(normalize_web_url("http://example.com:8080/a/"), "http://example.com:8080/a");
    }

    #[test]
    fn test_crawl_config_participates() {
        let small = CreationInput::new(vec![web_with(CrawlConfig {
            max_pages: Some(10),
            ..Default::default()
        })]);
        let large = CreationInput::new(vec![web_with(CrawlConfig {
            max_pages: Some(500),
            ..Default::default()
        })]);
        assert_ne!(fingerprint(&small), fingerprint(&large));

        let p1 = CreationInput::new(vec![web_with(CrawlConfig {
            include_patterns: Some(vec!["/b/*".into(), "/a/*".into()]),
            ..Default::default()
        })]);
        let p2 = CreationInput::new(vec![web_with(CrawlConfig {
            include_patterns: Some(vec!["/a/*".into(), "/b/*".into()]),
            ..Default::default()
        })]);
        assert_eq!(fingerprint(&p1), fingerprint(&p2));

        let bare = CreationInput::new(vec![RepoSpec::web("https://docs.example.com/guide")]);
        let empty_config = CreationInput::new(vec![web_with(CrawlConfig::default())]);
        assert_eq!(fingerprint(&bare), fingerprint(&empty_config));
    }

    #[test]
    fn test_libraries_and_topics() {
        let base = CreationInput::new(vec![RepoSpec::github("owner/repo")]);
        let a = base.clone().with_libraries(["React", " zod ", ""]);
        let b = base.clone().with_libraries(["zod", "react"]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&base));

        let t = base.clone().with_topics(["routing"]);
        assert_ne!(fingerprint(&t), fingerprint(&base));
        assert_ne!(fingerprint(&t), fingerprint(&a));
    }

    #[test]
    fn test_fingerprint_is_hex_sha256() {
        let fp = fingerprint(&CreationInput::new(vec![RepoSpec::github("owner/repo")]));
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_serde_shape() {
        let json = r#"{"repos":[{"kind":"github","repo":"Owner/Repo","ref":"v1"},{"kind":"web","url":"https://x.dev","config":{"maxPages":5}}],"topics":["a"]}"#;
        let input: CreationInput = serde_json::from_str(json).unwrap();
        assert_eq!(input.repos[0], RepoSpec::github_at("Owner/Repo", "v1"));
        assert!(input.libraries.is_empty());
        assert_eq!(input.repo_labels()[1], "web:https://x.dev");
    }

    #[test]
    fn test_validate() {
        assert!(CreationInput::default().validate().is_err());
        assert!(CreationInput::new(vec![RepoSpec::github("just-a-name")]).validate().is_err());
        assert!(CreationInput::new(vec![RepoSpec::web("  ")]).validate().is_err());
        assert!(CreationInput::new(vec![RepoSpec::github("owner/repo")]).validate().is_ok());
    }
}
