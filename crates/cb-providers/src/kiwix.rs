//! Kiwix library scraper.
//!
//! Reads the OPDS catalog served by `kiwix-serve` at
//! `{base_url}/catalog/v2/entries` and upserts one library per entry.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use cb_core::work::WorkUnitsExt;
use cb_core::{ContentProviderId, Error, Result};
use cb_db::models::NewLibrary;
use cb_db::pool::{get_conn, DbPool};
use cb_db::queries::{content_providers, libraries};

use crate::http::ProviderClient;
use crate::service::ImportSummary;

const THUMBNAIL_REL: &str = "http://opds-spec.org/image/thumbnail";
const HTML_TYPE: &str = "text/html";

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(rename = "entry", default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: String,
    title: String,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    name: String,
    #[serde(rename = "link", default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(rename = "@rel", default)]
    rel: String,
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@type", default)]
    media_type: String,
}

impl Entry {
    fn link(&self, pred: impl Fn(&Link) -> bool) -> Option<&str> {
        self.links.iter().find(|l| pred(l)).map(|l| l.href.as_str())
    }

    fn into_library(self, provider: ContentProviderId, base_url: &str) -> Option<NewLibrary> {
        let url = self.link(|l| l.media_type == HTML_TYPE)?;
        let url = absolute(base_url, url);
        let image_url = self
            .link(|l| l.rel == THUMBNAIL_REL)
            .map(|href| absolute(base_url, href))
            .unwrap_or_default();
        let external_id = self.id.trim_start_matches("urn:uuid:").to_string();
        let name = if self.title.is_empty() { self.name } else { self.title };

        Some(NewLibrary {
            open_content_provider_id: provider,
            external_id,
            name,
            language: self.language,
            description: self.summary,
            url,
            image_url,
        })
    }
}

fn absolute(base_url: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{}/{}", base_url.trim_end_matches('/'), href.trim_start_matches('/'))
    }
}

fn parse_feed(xml: &str) -> Result<Vec<Entry>> {
    quick_xml::de::from_str::<Feed>(xml)
        .map(|f| f.entries)
        .map_err(|e| Error::Transfer(format!("unreadable OPDS catalog: {e}")))
}

pub struct KiwixScraper {
    client: ProviderClient,
    db: DbPool,
}

impl KiwixScraper {
    pub fn new(client: ProviderClient, db: DbPool) -> Self {
        Self { client, db }
    }

    pub async fn scrape_libraries(
        &self,
        provider: ContentProviderId,
        cancel: &CancellationToken,
    ) -> Result<ImportSummary> {
        let base_url = {
            let conn = get_conn(&self.db)?;
            content_providers::get_content_provider(&conn, provider)?
                .ok_or_else(|| Error::not_found("content provider", provider))?
                .base_url
        };

        let url = format!("{}/catalog/v2/entries", base_url.trim_end_matches('/'));
        let resp = self
            .client
            .send(|http| http.get(&url))
            .await
            .map_err(|e| Error::Transfer(format!("catalog request failed: {e}")))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Transfer(format!("catalog returned {status}")));
        }
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Transfer(format!("catalog download failed: {e}")))?;

        let entries = parse_feed(&body)?;
        let mut summary = ImportSummary::default();

        for entry in entries.units(cancel) {
            let entry = entry?;
            let entry_id = entry.id.clone();
            let Some(library) = entry.into_library(provider, &base_url) else {
                tracing::debug!(entry = %entry_id, "Catalog entry has no HTML link");
                summary.rejected += 1;
                continue;
            };
            summary.accepted += 1;

            match get_conn(&self.db).and_then(|conn| libraries::upsert_library(&conn, &library)) {
                Ok((_, outcome)) => summary.record(outcome),
                Err(e) => summary.row_failed(&e),
            }
        }

        tracing::info!(
            provider = %provider,
            created = summary.created,
            updated = summary.updated,
            "Scraped Kiwix libraries"
        );
        summary.into_result()
    }
}
