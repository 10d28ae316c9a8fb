//! Source adapter contract + the job-board adapters RFJD ships with.

use async_trait::async_trait;
use rfjd_core::Job;
use rfjd_storage::{FetchError, HttpFetcher};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

pub const CRATE_NAME: &str = "rfjd-adapters";

/// Upper bound on postings any single board contributes to a digest.
pub const MAX_JOBS_PER_SOURCE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Crawlability {
    PublicHtml,
    Api,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub body: String,
}

impl FetchedPage {
    pub fn new(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid JSON payload from {source_id}: {error}")]
    Json {
        source_id: &'static str,
        #[source]
        error: serde_json::Error,
    },
    #[error("{source_id} listing is missing `{selector}`")]
    MissingSelector {
        source_id: &'static str,
        selector: &'static str,
    },
    #[error("{0}")]
    Message(String),
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;
    fn display_name(&self) -> &'static str;
    fn crawlability(&self) -> Crawlability;
    fn listing_url(&self) -> &'static str;

    async fn fetch_listing(&self, http: &HttpFetcher) -> Result<FetchedPage, AdapterError> {
        let resp = http.fetch_text(self.source_id(), self.listing_url()).await?;
        Ok(FetchedPage {
            url: resp.final_url,
            body: resp.body,
        })
    }

    /// Map a fetched page to jobs. Implementations return at most
    /// [`MAX_JOBS_PER_SOURCE`] entries.
    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<Job>, AdapterError>;

    async fn collect(&self, http: &HttpFetcher) -> Result<Vec<Job>, AdapterError> {
        let page = self.fetch_listing(http).await?;
        let mut jobs = self.parse_listing(&page)?;
        jobs.truncate(MAX_JOBS_PER_SOURCE);
        debug!(source_id = self.source_id(), url = %page.url, jobs = jobs.len(), "parsed listing");
        Ok(jobs)
    }
}

fn mentions_any(haystack: &str, needles: &[&str]) -> bool {
    let lower = haystack.to_lowercase();
    needles.iter().any(|needle| lower.contains(needle))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn selector(css: &'static str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(format!("bad selector `{css}`: {e}")))
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn select_first_text(element: ElementRef<'_>, sel: &Selector) -> Option<String> {
    element
        .select(sel)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty())
}

/// Resolve `href` against the board origin; `None` for empty or unresolvable links.
fn absolute_link(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    Url::parse(base)
        .and_then(|b| b.join(href))
        .ok()
        .map(String::from)
}

fn parse_json<T: for<'de> Deserialize<'de>>(
    source_id: &'static str,
    page: &FetchedPage,
) -> Result<T, AdapterError> {
    serde_json::from_str(&page.body).map_err(|error| AdapterError::Json { source_id, error })
}

#[derive(Debug, Deserialize)]
struct ArbeitnowResponse {
    #[serde(default)]
    data: Vec<ArbeitnowPosting>,
}

#[derive(Debug, Deserialize)]
struct ArbeitnowPosting {
    title: Option<String>,
    company_name: Option<String>,
    url: Option<String>,
    tags: Option<Vec<String>>,
    location: Option<String>,
    remote: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ArbeitnowAdapter;

impl ArbeitnowAdapter {
    const KEYWORDS: &'static [&'static str] = &[
        "frontend",
        "front-end",
        "react",
        "vue",
        "angular",
        "javascript",
        "web developer",
    ];
}

#[async_trait]
impl SourceAdapter for ArbeitnowAdapter {
    fn source_id(&self) -> &'static str {
        "arbeitnow"
    }

    fn display_name(&self) -> &'static str {
        "Arbeitnow"
    }

    fn crawlability(&self) -> Crawlability {
        Crawlability::Api
    }

    fn listing_url(&self) -> &'static str {
        "https://www.arbeitnow.com/api/job-board-api"
    }

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<Job>, AdapterError> {
        let response: ArbeitnowResponse = parse_json(self.source_id(), page)?;
        let jobs = response
            .data
            .into_iter()
            .filter_map(|posting| {
                let title = non_blank(posting.title)?;
                let tags = posting.tags.unwrap_or_default().join(" ");
                if !mentions_any(&title, Self::KEYWORDS) && !mentions_any(&tags, Self::KEYWORDS) {
                    return None;
                }
                // Postings without a location are treated as remote.
                let location = posting.location.unwrap_or_else(|| "Remote".to_string());
                if !location.to_lowercase().contains("remote") && !posting.remote.unwrap_or(false) {
                    return None;
                }
                let link = non_blank(posting.url)?;
                Some(Job::new(
                    self.source_id(),
                    posting.company_name.unwrap_or_default(),
                    title,
                    link,
                    &["remote", "frontend", "web"],
                    &["JavaScript", "React", "CSS"],
                ))
            })
            .take(MAX_JOBS_PER_SOURCE)
            .collect();
        Ok(jobs)
    }
}

#[derive(Debug, Deserialize)]
struct RemotiveResponse {
    #[serde(default)]
    jobs: Vec<RemotivePosting>,
}

#[derive(Debug, Deserialize)]
struct RemotivePosting {
    title: Option<String>,
    company_name: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemotiveAdapter;

impl RemotiveAdapter {
    const KEYWORDS: &'static [&'static str] =
        &["frontend", "front-end", "ui", "react", "vue", "web"];
}

#[async_trait]
impl SourceAdapter for RemotiveAdapter {
    fn source_id(&self) -> &'static str {
        "remotive"
    }

    fn display_name(&self) -> &'static str {
        "Remotive"
    }

    fn crawlability(&self) -> Crawlability {
        Crawlability::Api
    }

    fn listing_url(&self) -> &'static str {
        "https://remotive.com/api/remote-jobs?category=software-dev"
    }

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<Job>, AdapterError> {
        let response: RemotiveResponse = parse_json(self.source_id(), page)?;
        let jobs = response
            .jobs
            .into_iter()
            .filter_map(|posting| {
                let title = non_blank(posting.title)?;
                if !mentions_any(&title, Self::KEYWORDS) {
                    return None;
                }
                let link = non_blank(posting.url)?;
                Some(Job::new(
                    self.source_id(),
                    posting.company_name.unwrap_or_default(),
                    title,
                    link,
                    &["remote", "frontend", "web", "developer"],
                    &["React", "Vue", "CSS", "HTML"],
                ))
            })
            .take(MAX_JOBS_PER_SOURCE)
            .collect();
        Ok(jobs)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WeWorkRemotelyAdapter;

impl WeWorkRemotelyAdapter {
    const ORIGIN: &'static str = "https://weworkremotely.com";
    const MAX_SECTIONS: usize = 3;
    const MAX_LINKS_PER_SECTION: usize = 5;
}

#[async_trait]
impl SourceAdapter for WeWorkRemotelyAdapter {
    fn source_id(&self) -> &'static str {
        "weworkremotely"
    }

    fn display_name(&self) -> &'static str {
        "We Work Remotely"
    }

    fn crawlability(&self) -> Crawlability {
        Crawlability::PublicHtml
    }

    fn listing_url(&self) -> &'static str {
        "https://weworkremotely.com/categories/remote-front-end-programming-jobs"
    }

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<Job>, AdapterError> {
        let document = Html::parse_document(&page.body);
        let sections = selector("section.jobs")?;
        let anchors = selector("li a")?;
        let title_sel = selector("span.title")?;
        let company_sel = selector("span.company")?;

        let mut jobs = Vec::new();
        for section in document.select(&sections).take(Self::MAX_SECTIONS) {
            for anchor in section.select(&anchors).take(Self::MAX_LINKS_PER_SECTION) {
                let Some(title) = select_first_text(anchor, &title_sel) else {
                    continue;
                };
                let href = anchor.value().attr("href").unwrap_or_default();
                let Some(link) = absolute_link(Self::ORIGIN, href) else {
                    continue;
                };
                let company = select_first_text(anchor, &company_sel).unwrap_or_default();
                jobs.push(Job::new(
                    self.source_id(),
                    company,
                    title,
                    link,
                    &["frontend", "remote", "javascript"],
                    &["React", "Vue", "CSS", "HTML"],
                ));
            }
        }
        jobs.truncate(MAX_JOBS_PER_SOURCE);
        Ok(jobs)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsJobbsAdapter;

impl JsJobbsAdapter {
    const ORIGIN: &'static str = "https://jsjobbs.com";
}

#[async_trait]
impl SourceAdapter for JsJobbsAdapter {
    fn source_id(&self) -> &'static str {
        "jsjobbs"
    }

    fn display_name(&self) -> &'static str {
        "JSJobbs"
    }

    fn crawlability(&self) -> Crawlability {
        Crawlability::PublicHtml
    }

    fn listing_url(&self) -> &'static str {
        "https://jsjobbs.com/jobs/remote"
    }

    /// Every card must carry a title, a company and a link; one malformed
    /// card fails the whole listing.
    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<Job>, AdapterError> {
        let document = Html::parse_document(&page.body);
        let cards = selector(".job-card")?;
        let title_sel = selector(".job-title")?;
        let company_sel = selector(".company-name")?;
        let anchor_sel = selector("a")?;
        let missing = |selector: &'static str| AdapterError::MissingSelector {
            source_id: self.source_id(),
            selector,
        };

        let mut jobs = Vec::new();
        for card in document.select(&cards).take(MAX_JOBS_PER_SOURCE) {
            let title = card
                .select(&title_sel)
                .next()
                .map(element_text)
                .ok_or_else(|| missing(".job-title"))?;
            let company = card
                .select(&company_sel)
                .next()
                .map(element_text)
                .ok_or_else(|| missing(".company-name"))?;
            let href = card
                .select(&anchor_sel)
                .next()
                .and_then(|a| a.value().attr("href"))
                .ok_or_else(|| missing("a[href]"))?;
            let Some(link) = absolute_link(Self::ORIGIN, href) else {
                continue;
            };
            if title.is_empty() {
                continue;
            }
            jobs.push(Job::new(
                self.source_id(),
                company,
                title,
                link,
                &["remote", "frontend", "javascript"],
                &["JavaScript", "React", "Vue", "Angular"],
            ));
        }
        Ok(jobs)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RemoteOkAdapter;

impl RemoteOkAdapter {
    const ORIGIN: &'static str = "https://remoteok.io";
}

#[async_trait]
impl SourceAdapter for RemoteOkAdapter {
    fn source_id(&self) -> &'static str {
        "remoteok"
    }

    fn display_name(&self) -> &'static str {
        "Remote OK"
    }

    fn crawlability(&self) -> Crawlability {
        Crawlability::PublicHtml
    }

    fn listing_url(&self) -> &'static str {
        "https://remoteok.io/remote-frontend-jobs"
    }

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<Job>, AdapterError> {
        let document = Html::parse_document(&page.body);
        let rows = selector(".job")?;
        let title_sel = selector("h2")?;
        let company_sel = selector("h3")?;
        let link_sel = selector("a.preventLink")?;

        let jobs = document
            .select(&rows)
            .take(MAX_JOBS_PER_SOURCE)
            .filter_map(|row| {
                let title = select_first_text(row, &title_sel)?;
                let company = select_first_text(row, &company_sel)?;
                let href = row.select(&link_sel).next()?.value().attr("href")?;
                let link = absolute_link(Self::ORIGIN, href)?;
                Some(Job::new(
                    self.source_id(),
                    company,
                    title,
                    link,
                    &["remote", "frontend", "developer"],
                    &["JavaScript", "React", "HTML", "CSS"],
                ))
            })
            .collect();
        Ok(jobs)
    }
}

pub fn arbeitnow_adapter() -> impl SourceAdapter {
    ArbeitnowAdapter
}

pub fn remotive_adapter() -> impl SourceAdapter {
    RemotiveAdapter
}

pub fn weworkremotely_adapter() -> impl SourceAdapter {
    WeWorkRemotelyAdapter
}

pub fn jsjobbs_adapter() -> impl SourceAdapter {
    JsJobbsAdapter
}

pub fn remoteok_adapter() -> impl SourceAdapter {
    RemoteOkAdapter
}

/// Registry order; earlier sources win link collisions during dedupe.
pub const SOURCE_IDS: &[&str] = &[
    "arbeitnow",
    "remotive",
    "weworkremotely",
    "jsjobbs",
    "remoteok",
];

pub fn adapter_for_source(source_id: &str) -> Option<Box<dyn SourceAdapter>> {
    match source_id {
        "arbeitnow" => Some(Box::new(ArbeitnowAdapter)),
        "remotive" => Some(Box::new(RemotiveAdapter)),
        "weworkremotely" => Some(Box::new(WeWorkRemotelyAdapter)),
        "jsjobbs" => Some(Box::new(JsJobbsAdapter)),
        "remoteok" => Some(Box::new(RemoteOkAdapter)),
        _ => None,
    }
}

pub fn default_adapters() -> Vec<Box<dyn SourceAdapter>> {
    SOURCE_IDS
        .iter()
        .filter_map(|id| adapter_for_source(id))
        .collect()
}
