//! HTML digest rendering for RFJD (askama, auto-escaped).

use std::cmp::Ordering;

use askama::Template;
use chrono::NaiveDate;
use rfjd_core::Job;
use thiserror::Error;

pub const CRATE_NAME: &str = "rfjd-digest";

pub const DIGEST_SUBJECT: &str = "Daily Remote Frontend Jobs Digest";

const FREE_COLOR: &str = "#28a745";
const MAYBE_PAID_COLOR: &str = "#ffc107";

#[derive(Debug, Error)]
pub enum DigestError {
    #[error("rendering digest template: {0}")]
    Template(#[from] askama::Error),
}

/// A rendered, ready-to-send digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest {
    pub subject: String,
    pub html: String,
    pub job_count: usize,
}

#[derive(Debug, Clone)]
struct DigestRow {
    index: usize,
    company: String,
    title: String,
    link: String,
    keywords: String,
    skills: String,
    apply_host: String,
    badge: &'static str,
    badge_color: &'static str,
}

#[derive(Template)]
#[template(path = "digest.html")]
struct DigestTemplate {
    generated_on: String,
    job_count: usize,
    rows: Vec<DigestRow>,
}

/// Free-to-apply first, then company name (byte order). Stable.
pub fn digest_order(a: &Job, b: &Job) -> Ordering {
    (!a.free_to_apply(), a.company()).cmp(&(!b.free_to_apply(), b.company()))
}

pub fn sort_for_digest(jobs: &[Job]) -> Vec<&Job> {
    let mut sorted = jobs.iter().collect::<Vec<_>>();
    sorted.sort_by(|a, b| digest_order(a, b));
    sorted
}

pub fn render_digest(jobs: &[Job], generated_on: NaiveDate) -> Result<Digest, DigestError> {
    let rows = sort_for_digest(jobs)
        .into_iter()
        .enumerate()
        .map(|(i, job)| DigestRow {
            index: i + 1,
            company: job.company().to_string(),
            title: job.title().to_string(),
            link: job.link().to_string(),
            keywords: job.keywords().join(", "),
            skills: job.skills().join(", "),
            apply_host: job.apply_host().to_string(),
            badge: if job.free_to_apply() { "Free" } else { "Maybe Paid" },
            badge_color: if job.free_to_apply() {
                FREE_COLOR
            } else {
                MAYBE_PAID_COLOR
            },
        })
        .collect::<Vec<_>>();

    let template = DigestTemplate {
        generated_on: generated_on.format("%Y-%m-%d").to_string(),
        job_count: rows.len(),
        rows,
    };
    let html = template.render()?;
    Ok(Digest {
        subject: DIGEST_SUBJECT.to_string(),
        html,
        job_count: jobs.len(),
    })
}
