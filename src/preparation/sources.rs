//! Reading knowledge sources into plain-text documents.
//!
//! A source is an `http(s)://` URL (scraped, following same-host links), a
//! path to a file or directory, or otherwise inline text. Every document read
//! consumes one unit of the shared scraping budget.

use regex::Regex;
use reqwest::Url;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

use super::fetcher::KnowledgeFetcher;
use super::PrepareOptions;
use crate::error::KnowledgeError;

const TEXT_EXTENSIONS: &[&str] = &["md", "markdown", "txt", "text", "rst", "html", "htm", "csv", "json", "yaml", "yml"];

/// What kind of reference a knowledge source is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Url(String),
    Path(PathBuf),
    Inline(String),
}

impl SourceKind {
    /// Paths are resolved against `root` when relative; nonexistent paths are inline text.
    pub fn classify(source_content: &str, root: Option<&Path>) -> Self {
        let trimmed = source_content.trim();
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return SourceKind::Url(trimmed.to_string());
        }
        if !trimmed.contains('\n') && !trimmed.is_empty() {
            let path = match root {
                Some(root) if Path::new(trimmed).is_relative() => root.join(trimmed),
                _ => PathBuf::from(trimmed),
            };
            if path.exists() {
                return SourceKind::Path(path);
            }
        }
        SourceKind::Inline(source_content.to_string())
    }
}

/// Text read from one origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDocument {
    pub origin: String,
    pub title: Option<String>,
    pub content: String,
}

/// Documents-left counter shared across all sources of one preparation.
#[derive(Debug)]
pub struct ScrapingBudget {
    remaining: usize,
}

impl ScrapingBudget {
    pub fn new(total: usize) -> Self {
        Self { remaining: total }
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    fn take(&mut self) -> bool {
        if self.remaining == 0 {
            false
        } else {
            self.remaining -= 1;
            true
        }
    }
}

/// Read every document reachable from `source_content`, within the budget.
pub async fn read_source(
    source_content: &str,
    fetcher: &dyn KnowledgeFetcher,
    options: &PrepareOptions,
    budget: &mut ScrapingBudget,
) -> Result<Vec<RawDocument>, KnowledgeError> {
    match SourceKind::classify(source_content, options.root_dir.as_deref()) {
        SourceKind::Url(url) => scrape(&url, fetcher, options.max_scraping_depth, budget).await,
        SourceKind::Path(path) if path.is_dir() => read_directory(&path, options.max_scraping_depth, budget).await,
        SourceKind::Path(path) => {
            if !budget.take() {
                return Ok(Vec::new());
            }
            Ok(vec![read_file(&path).await?])
        }
        SourceKind::Inline(text) => {
            if text.trim().is_empty() {
                return Err(KnowledgeError::EmptyContent(source_content.to_string()));
            }
            if !budget.take() {
                return Ok(Vec::new());
            }
            Ok(vec![RawDocument {
                origin: "inline".to_string(),
                title: None,
                content: text.trim().to_string(),
            }])
        }
    }
}

/// Breadth-first crawl from `root`. Only the root page failing is an error.
async fn scrape(
    root: &str,
    fetcher: &dyn KnowledgeFetcher,
    max_depth: usize,
    budget: &mut ScrapingBudget,
) -> Result<Vec<RawDocument>, KnowledgeError> {
    let root_url = Url::parse(root).map_err(|e| KnowledgeError::Fetch {
        source_name: root.to_string(),
        message: e.to_string(),
    })?;

    let mut documents = Vec::new();
    let mut visited = HashSet::new();
    let mut queue = VecDeque::from([(root_url.clone(), 1usize)]);
    visited.insert(root_url.to_string());

    while let Some((url, depth)) = queue.pop_front() {
        if !budget.take() {
            tracing::info!(url = %url, "Scraping budget exhausted");
            break;
        }

        let fetched = match fetcher.fetch(url.as_str()).await {
            Ok(fetched) => fetched,
            Err(e) if url == root_url => return Err(e),
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Skipping linked page");
                continue;
            }
        };

        let (title, content) = if fetched.is_html() {
            (html_title(&fetched.body), html_to_text(&fetched.body))
        } else {
            (None, fetched.body.trim().to_string())
        };

        if depth < max_depth && fetched.is_html() {
            for link in same_host_links(&fetched.body, &url) {
                if visited.insert(link.to_string()) {
                    queue.push_back((link, depth + 1));
                }
            }
        }

        if content.is_empty() {
            continue;
        }
        documents.push(RawDocument {
            origin: url.to_string(),
            title,
            content,
        });
    }

    Ok(documents)
}

async fn read_file(path: &Path) -> Result<RawDocument, KnowledgeError> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| KnowledgeError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let is_html = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("html") | Some("htm")
    );
    let (title, content) = if is_html {
        (html_title(&text), html_to_text(&text))
    } else {
        (markdown_title(&text), text.trim().to_string())
    };

    Ok(RawDocument {
        origin: path.display().to_string(),
        title: title.or_else(|| path.file_stem().map(|stem| stem.to_string_lossy().into_owned())),
        content,
    })
}

async fn read_directory(
    dir: &Path,
    max_depth: usize,
    budget: &mut ScrapingBudget,
) -> Result<Vec<RawDocument>, KnowledgeError> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| TEXT_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        })
        .collect();
    files.sort();

    let mut documents = Vec::new();
    for path in files {
        if !budget.take() {
            tracing::info!(dir = %dir.display(), "Scraping budget exhausted");
            break;
        }
        match read_file(&path).await {
            Ok(document) if !document.content.is_empty() => documents.push(document),
            Ok(_) => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable file"),
        }
    }
    Ok(documents)
}

fn markdown_title(text: &str) -> Option<String> {
    text.lines()
        .find_map(|line| line.strip_prefix("# "))
        .map(|title| title.trim().to_string())
}

fn html_title(html: &str) -> Option<String> {
    static TITLE: OnceLock<Regex> = OnceLock::new();
    let re = TITLE.get_or_init(|| Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("Invalid regex for HTML title"));
    re.captures(html)
        .map(|caps| decode_entities(caps[1].trim()))
        .filter(|title| !title.is_empty())
}

/// Visible text of an HTML page, one block per line.
pub fn html_to_text(html: &str) -> String {
    static HIDDEN: OnceLock<Regex> = OnceLock::new();
    static BLOCK: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    static SPACES: OnceLock<Regex> = OnceLock::new();

    let hidden = HIDDEN.get_or_init(|| {
        Regex::new(r"(?is)<(script|style|noscript|head|template)\b.*?</(script|style|noscript|head|template)>")
            .expect("Invalid regex for hidden HTML blocks")
    });
    let block = BLOCK.get_or_init(|| {
        Regex::new(r"(?i)</?(p|div|br|li|ul|ol|h[1-6]|tr|section|article|header|footer|pre|blockquote)\b[^>]*>")
            .expect("Invalid regex for HTML block tags")
    });
    let tag = TAG.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("Invalid regex for HTML tags"));
    let spaces = SPACES.get_or_init(|| Regex::new(r"[ \t\r\f]+").expect("Invalid regex for whitespace runs"));

    let text = hidden.replace_all(html, " ");
    let text = block.replace_all(&text, "\n");
    let text = tag.replace_all(&text, " ");
    let text = decode_entities(&text);

    text.lines()
        .map(|line| spaces.replace_all(line, " ").trim().to_string())
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Absolute links on the page pointing to the same host, fragments dropped.
pub fn same_host_links(html: &str, base: &Url) -> Vec<Url> {
    static HREF: OnceLock<Regex> = OnceLock::new();
    let re = HREF.get_or_init(|| Regex::new(r#"(?i)href\s*=\s*["']([^"'#]+)"#).expect("Invalid regex for links"));

    let mut links = Vec::new();
    for caps in re.captures_iter(html) {
        let Ok(mut link) = base.join(caps[1].trim()) else {
            continue;
        };
        link.set_fragment(None);
        if matches!(link.scheme(), "http" | "https") && link.host_str() == base.host_str() && !links.contains(&link) {
            links.push(link);
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preparation::fetcher::StaticFetcher;

    #[test]
    fn test_classify() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "# Notes\nhello").unwrap();

        assert_eq!(
            SourceKind::classify("https://example.com/a", None),
            SourceKind::Url("https://example.com/a".into())
        );
        assert_eq!(
            SourceKind::classify("notes.md", Some(dir.path())),
            SourceKind::Path(dir.path().join("notes.md"))
        );
        assert!(matches!(SourceKind::classify("Rust is a language.", None), SourceKind::Inline(_)));
    }

    #[test]
    fn test_html_to_text() {
        let html = "<html><head><title>T</title></head><body><script>x()</script><h1>Hello &amp; welcome</h1><p>First   line</p><p>Second</p></body></html>";
        assert_eq!(html_to_text(html), "Hello & welcome\nFirst line\nSecond");
        assert_eq!(html_title(html).as_deref(), Some("T"));
    }

    #[test]
    fn test_same_host_links() {
        let base = Url::parse("https://example.com/docs/").unwrap();
        let html = r##"<a href="intro">i</a><a href="/about#team">a</a><a href="https://other.org/x">o</a><a href="mailto:x@y.z">m</a><a href="#top">t</a>"##;
        let links: Vec<String> = same_host_links(html, &base).iter().map(|u| u.to_string()).collect();
        assert_eq!(links, vec!["https://example.com/docs/intro", "https://example.com/about"]);
    }

    #[tokio::test]
    async fn test_scrape_follows_links_until_depth() {
        let fetcher = StaticFetcher::default()
            .with_page("https://example.com/", r#"<p>Root</p><a href="/a">a</a>"#)
            .with_page("https://example.com/a", r#"<p>Page A</p><a href="/b">b</a>"#)
            .with_page("https://example.com/b", "<p>Page B</p>");
        let options = PrepareOptions::default().with_max_scraping_depth(2);
        let mut budget = ScrapingBudget::new(10);

        let documents = read_source("https://example.com/", &fetcher, &options, &mut budget)
            .await
            .unwrap();
        let first_lines: Vec<&str> = documents.iter().filter_map(|d| d.content.lines().next()).collect();
        assert_eq!(first_lines, vec!["Root", "Page A"]);
        assert_eq!(fetcher.requested().len(), 2);
    }

    #[tokio::test]
    async fn test_broken_link_is_skipped_but_root_failure_is_not() {
        let fetcher = StaticFetcher::default().with_page("https://example.com/", r#"<p>Root</p><a href="/gone">x</a>"#);
        let options = PrepareOptions::default();
        let mut budget = ScrapingBudget::new(10);

        let documents = read_source("https://example.com/", &fetcher, &options, &mut budget)
            .await
            .unwrap();
        assert_eq!(documents.len(), 1);

        let err = read_source("https://example.com/missing", &fetcher, &options, &mut budget)
            .await
            .unwrap_err();
        assert!(matches!(err, KnowledgeError::Fetch { .. }));
    }

    #[tokio::test]
    async fn test_directory_respects_budget() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["a.md", "b.txt", "c.md", "image.png"] {
            std::fs::write(dir.path().join(name), format!("content of {name}")).unwrap();
        }
        let fetcher = StaticFetcher::default();
        let options = PrepareOptions::default();
        let mut budget = ScrapingBudget::new(2);

        let documents = read_source(dir.path().to_str().unwrap(), &fetcher, &options, &mut budget)
            .await
            .unwrap();
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].title.as_deref(), Some("a"));
        assert!(budget.is_exhausted());
    }
}
