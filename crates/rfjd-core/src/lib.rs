//! Core domain model for RFJD: job postings, the seen-link set and apply-host classification.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use url::Url;

pub const CRATE_NAME: &str = "rfjd-core";

/// Company name used when a board omits or blanks the employer.
pub const UNKNOWN_COMPANY: &str = "Unknown";

/// Job-board domains known to accept applications without a paid account.
pub const FREE_DOMAINS: &[&str] = &[
    "remotive.com",
    "remotive.io",
    "weworkremotely.com",
    "wellfound.com",
    "angel.co",
    "jobspresso.co",
    "indeed.com",
    "glassdoor.com",
    "builtin.com",
    "linkedin.com",
    "stackoverflow.com",
    "arbeitnow.com",
    "flexjobs.com",
    "remoteco.com",
    "workingnotworking.com",
];

const PAID_HOST_MARKERS: &[&str] = &["premium", "pay", "subscription"];

/// A single posting found during one run.
///
/// `apply_host` and `free_to_apply` are derived from `link` at construction
/// time and cannot be set independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    source_id: String,
    company: String,
    title: String,
    link: String,
    keywords: Vec<String>,
    skills: Vec<String>,
    apply_host: String,
    free_to_apply: bool,
}

impl Job {
    pub fn new(
        source_id: impl Into<String>,
        company: impl Into<String>,
        title: impl Into<String>,
        link: impl Into<String>,
        keywords: &[&str],
        skills: &[&str],
    ) -> Self {
        let link = link.into();
        let company = company.into();
        let company = if company.trim().is_empty() {
            UNKNOWN_COMPANY.to_string()
        } else {
            company.trim().to_string()
        };
        Self {
            source_id: source_id.into(),
            company,
            title: title.into().trim().to_string(),
            apply_host: apply_host_from_url(&link),
            free_to_apply: is_likely_free_apply(&link),
            link,
            keywords: keywords.iter().map(ToString::to_string).collect(),
            skills: skills.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn company(&self) -> &str {
        &self.company
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn link(&self) -> &str {
        &self.link
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn skills(&self) -> &[String] {
        &self.skills
    }

    pub fn apply_host(&self) -> &str {
        &self.apply_host
    }

    pub fn free_to_apply(&self) -> bool {
        self.free_to_apply
    }
}

/// Links already notified in earlier runs. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeenSet {
    links: BTreeSet<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, link: &str) -> bool {
        self.links.contains(link)
    }

    pub fn insert(&mut self, link: impl Into<String>) -> bool {
        self.links.insert(link.into())
    }

    pub fn extend_from_jobs<'a>(&mut self, jobs: impl IntoIterator<Item = &'a Job>) {
        self.links
            .extend(jobs.into_iter().map(|job| job.link().to_string()));
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for SeenSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            links: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Normalized network location of `url`: lowercased, one leading `www.` removed.
///
/// Returns an empty string when the URL cannot be parsed or has no host.
pub fn apply_host_from_url(url: &str) -> String {
    let Ok(parsed) = Url::parse(url.trim()) else {
        return String::new();
    };
    let Some(host) = parsed.host_str() else {
        return String::new();
    };
    let mut host = host.to_ascii_lowercase();
    if let Some(port) = parsed.port() {
        host = format!("{host}:{port}");
    }
    match host.strip_prefix("www.") {
        Some(rest) => rest.to_string(),
        None => host,
    }
}

/// Heuristic: can this posting be applied to without a paid account?
///
/// The allow-list is consulted before the paid markers, so
/// `paycompany.indeed.com` is still free.
pub fn is_likely_free_apply(url: &str) -> bool {
    let host = apply_host_from_url(url);
    if host.is_empty() {
        return false;
    }
    if FREE_DOMAINS.iter().any(|domain| host.contains(domain)) {
        return true;
    }
    if PAID_HOST_MARKERS.iter().any(|marker| host.contains(marker)) {
        return false;
    }
    true
}
