// Shared helpers for CLI commands

use anyhow::{Context, Result};
use bundlestore::{BundleStore, CrawlConfig, CreationInput, Pipeline, RepoSpec, StoreOptions};
use clap::{Args, ValueHint};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Global storage flags, resolved against config file and environment
pub struct StoreArgs {
    pub storage_dirs: Vec<PathBuf>,
    pub config: Option<PathBuf>,
    pub lease_timeout_ms: Option<u64>,
}

impl StoreArgs {
    /// Flags override the config file, which overrides the environment
    pub fn options(&self) -> Result<StoreOptions> {
        let env = StoreOptions::from_env()?;
        let mut options = match &self.config {
            Some(path) => {
                let mut file = StoreOptions::load(path)?;
                if file.storage_dirs.is_empty() {
                    file.storage_dirs = env.storage_dirs.clone();
                }
                file
            }
            None => env,
        };

        if !self.storage_dirs.is_empty() {
            options.storage_dirs = self.storage_dirs.clone();
        }
        if let Some(ms) = self.lease_timeout_ms {
            options.lease_timeout = Duration::from_millis(ms);
        }

        options.validate().context(
            "No storage configured: pass --storage-dir, --config, or set BUNDLESTORE_STORAGE_DIRS",
        )?;
        Ok(options)
    }

    pub fn open(&self, pipeline: Pipeline) -> Result<BundleStore> {
        BundleStore::new(self.options()?, pipeline)
    }
}

/// Creation input given either as a JSON document or as flags
#[derive(Args, Debug, Default)]
pub struct InputArgs {
    /// Creation input as JSON ("-" reads stdin)
    #[arg(short, long, value_hint = ValueHint::FilePath, conflicts_with_all = ["repos", "urls"])]
    pub input: Option<PathBuf>,

    /// GitHub repository as owner/repo or owner/repo@ref (repeatable)
    #[arg(long = "repo")]
    pub repos: Vec<String>,

    /// Website to crawl (repeatable)
    #[arg(long = "url")]
    pub urls: Vec<String>,

    /// Maximum pages to crawl per website
    #[arg(long)]
    pub max_pages: Option<u32>,

    /// Library name (repeatable)
    #[arg(long = "library")]
    pub libraries: Vec<String>,

    /// Topic (repeatable)
    #[arg(long = "topic")]
    pub topics: Vec<String>,
}

impl InputArgs {
    pub fn is_empty(&self) -> bool {
        self.input.is_none() && self.repos.is_empty() && self.urls.is_empty()
    }

    pub fn to_input(&self) -> Result<CreationInput> {
        if let Some(path) = &self.input {
            return read_input(path);
        }

        let mut repos: Vec<RepoSpec> = self
            .repos
            .iter()
            .map(|r| match r.split_once('@') {
                Some((repo, git_ref)) => RepoSpec::github_at(repo, git_ref),
                None => RepoSpec::github(r.as_str()),
            })
            .collect();
        repos.extend(self.urls.iter().map(|u| match self.max_pages {
            Some(max_pages) => RepoSpec::Web {
                url: u.clone(),
                config: Some(CrawlConfig {
                    max_pages: Some(max_pages),
                    ..Default::default()
                }),
            },
            None => RepoSpec::web(u.as_str()),
        }));

        let input = CreationInput::new(repos)
            .with_libraries(self.libraries.iter().cloned())
            .with_topics(self.topics.iter().cloned());
        input.validate()?;
        Ok(input)
    }
}

fn read_input(path: &Path) -> Result<CreationInput> {
    let data = if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf).context("Failed to read input from stdin")?;
        buf
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read input: {}", path.display()))?
    };
    let input: CreationInput = serde_json::from_str(&data).context("Failed to parse creation input")?;
    input.validate()?;
    Ok(input)
}

/// Accepts "90", "90s", "15m", "2h", "500ms"
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (num, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(i) => s.split_at(i),
        None => (s, "s"),
    };
    let n: u64 = num.parse().map_err(|e| format!("invalid duration '{}': {}", s, e))?;
    match unit {
        "ms" => Ok(Duration::from_millis(n)),
        "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        other => Err(format!("unknown duration unit '{}'", other)),
    }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Absolute form of a path for display
pub fn display_path(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

pub fn confirm(prompt: &str) -> Result<bool> {
    use std::io::Write;
    print!("{} [y/N]: ", prompt);
    std::io::stdout().flush()?;

    let mut response = String::new();
    std::io::stdin().read_line(&mut response)?;
    let response = response.trim().to_lowercase();
    Ok(response == "y" || response == "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("abc").is_err());
    }

    #[test]
    fn test_input_from_flags() {
        let args = InputArgs {
            repos: vec!["Owner/Repo@v1".to_string(), "a/b".to_string()],
            urls: vec!["https://docs.rs/".to_string()],
            max_pages: Some(10),
            ..Default::default()
        };
        let input = args.to_input().unwrap();
        assert_eq!(input.repos.len(), 3);
        assert_eq!(input.repos[0], RepoSpec::github_at("Owner/Repo", "v1"));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
    }
}
