//! Persistent-store contract and shared HTTP fetch utilities.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use opencall_core::{
    infer_language, CrawledOpenCall, DirectoryCandidate, DirectoryEntry, EmailSource,
    OpenCallRecord,
};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::info_span;
use uuid::Uuid;

pub const CRATE_NAME: &str = "opencall-storage";

// ---------------------------------------------------------------------------
// HTTP fetcher

/// Accept header covering the HTML and XML payloads the fetchers consume.
const ACCEPT_HTML_XML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
    pub global_concurrency: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: "opencall-crawler/0.1 (gallery open-call aggregator)".to_string(),
            global_concurrency: 8,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Shared outbound HTTP client. Every fetch carries the configured timeout
/// and user agent; a non-2xx response is treated identically to a network
/// failure. No retries — a failed fetch is abandoned for the rest of the run.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML_XML));

        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
        })
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .expect("semaphore not closed");
        let span = info_span!("http_fetch", url);
        let _guard = span.enter();

        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: resp.url().to_string(),
            });
        }
        Ok(resp.text().await?)
    }
}

// ---------------------------------------------------------------------------
// Store contract

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistent store of open-call and directory records. Inserts are keyed
/// by identity (external URL / directory email) with upsert semantics, so
/// concurrent writers need no application-level locking.
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Insert an externally-sourced open call. A collision on the canonical
    /// source URL is expected steady-state behavior and returns the already
    /// persisted record.
    async fn create_open_call(
        &self,
        call: &CrawledOpenCall,
        now: DateTime<Utc>,
    ) -> Result<OpenCallRecord, StoreError>;

    async fn list_open_calls(&self) -> Result<Vec<OpenCallRecord>, StoreError>;

    async fn delete_open_calls(&self, ids: &[Uuid]) -> Result<u64, StoreError>;

    /// Blank matching `external_email` values on open-call rows; used by the
    /// synthetic-placeholder purge.
    async fn clear_external_emails(&self, emails: &[String]) -> Result<u64, StoreError>;

    /// Gallery records our own users maintain (source `internal_gallery`).
    async fn internal_gallery_candidates(&self) -> Result<Vec<DirectoryCandidate>, StoreError>;

    /// Rows from the previously-synced external directory table.
    async fn external_directory_candidates(&self) -> Result<Vec<DirectoryCandidate>, StoreError>;

    /// Upsert keyed on email; see [`apply_directory_upsert`] for the merge
    /// rule. A candidate without an email is a no-op.
    async fn upsert_directory_entry(
        &self,
        candidate: &DirectoryCandidate,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn list_directory(&self) -> Result<Vec<DirectoryEntry>, StoreError>;

    async fn deactivate_directory_entry(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Hard delete; reserved for synthetic placeholder emails.
    async fn delete_directory_entries(&self, emails: &[String]) -> Result<u64, StoreError>;
}

/// Build a fresh directory entry from a candidate that carries an email.
pub fn entry_from_candidate(
    candidate: &DirectoryCandidate,
    email: &str,
    now: DateTime<Utc>,
) -> DirectoryEntry {
    DirectoryEntry {
        email: email.to_string(),
        gallery_name: candidate.gallery_name.clone(),
        country: candidate.country.clone(),
        city: candidate.city.clone(),
        language: infer_language(candidate.country.as_deref()).to_string(),
        source: candidate.source,
        gallery_id: candidate.gallery_id.clone(),
        website: candidate.website.clone(),
        quality_score: candidate.quality_score,
        is_active: true,
        is_blocked: false,
        last_seen_at: now,
        created_at: now,
        updated_at: now,
    }
}

/// Directory upsert merge rule, shared by both store implementations:
/// a higher-or-equal-priority candidate overwrites fields it actually has
/// values for; a weaker candidate only fills gaps. A null never replaces a
/// present value. `quality_score` is bumped to the maximum seen and
/// `last_seen_at` to now; a reappearing entry is reactivated.
pub fn apply_directory_upsert(
    existing: &mut DirectoryEntry,
    candidate: &DirectoryCandidate,
    now: DateTime<Utc>,
) {
    let candidate_wins = candidate.source.rank() >= existing.source.rank();

    fn merge_field(slot: &mut Option<String>, incoming: &Option<String>, overwrite: bool) {
        match incoming {
            Some(value) if overwrite || slot.is_none() => *slot = Some(value.clone()),
            _ => {}
        }
    }

    if candidate_wins {
        if !candidate.gallery_name.trim().is_empty() {
            existing.gallery_name = candidate.gallery_name.clone();
        }
        existing.source = candidate.source;
    }
    merge_field(&mut existing.country, &candidate.country, candidate_wins);
    merge_field(&mut existing.city, &candidate.city, candidate_wins);
    merge_field(&mut existing.gallery_id, &candidate.gallery_id, candidate_wins);
    merge_field(&mut existing.website, &candidate.website, candidate_wins);

    existing.language = infer_language(existing.country.as_deref()).to_string();
    existing.quality_score = existing.quality_score.max(candidate.quality_score);
    existing.is_active = true;
    existing.last_seen_at = now;
    existing.updated_at = now;
}

// ---------------------------------------------------------------------------
// In-memory store (tests + local runs without a database)

#[derive(Debug, Default)]
pub struct MemoryStore {
    calls: Mutex<Vec<OpenCallRecord>>,
    directory: Mutex<BTreeMap<String, DirectoryEntry>>,
    internal: Mutex<Vec<DirectoryCandidate>>,
    external: Mutex<Vec<DirectoryCandidate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_internal_candidates(&self, candidates: Vec<DirectoryCandidate>) {
        *self.internal.lock().expect("mutex poisoned") = candidates;
    }

    pub fn seed_external_candidates(&self, candidates: Vec<DirectoryCandidate>) {
        *self.external.lock().expect("mutex poisoned") = candidates;
    }

    /// Seed pre-existing rows, including internally created ones that
    /// `create_open_call` (external ingestion only) can never produce.
    pub fn seed_open_calls(&self, records: Vec<OpenCallRecord>) {
        self.calls.lock().expect("mutex poisoned").extend(records);
    }
}

#[async_trait]
impl CallStore for MemoryStore {
    async fn create_open_call(
        &self,
        call: &CrawledOpenCall,
        now: DateTime<Utc>,
    ) -> Result<OpenCallRecord, StoreError> {
        let mut calls = self.calls.lock().expect("mutex poisoned");
        if let Some(url) = call.external_url.as_deref() {
            if let Some(existing) = calls
                .iter()
                .find(|rec| rec.call.external_url.as_deref() == Some(url))
            {
                return Ok(existing.clone());
            }
        }
        let record = OpenCallRecord {
            id: Uuid::new_v4(),
            is_external: true,
            created_at: now,
            call: call.clone(),
        };
        calls.push(record.clone());
        Ok(record)
    }

    async fn list_open_calls(&self) -> Result<Vec<OpenCallRecord>, StoreError> {
        Ok(self.calls.lock().expect("mutex poisoned").clone())
    }

    async fn delete_open_calls(&self, ids: &[Uuid]) -> Result<u64, StoreError> {
        let mut calls = self.calls.lock().expect("mutex poisoned");
        let before = calls.len();
        calls.retain(|rec| !ids.contains(&rec.id));
        Ok((before - calls.len()) as u64)
    }

    async fn clear_external_emails(&self, emails: &[String]) -> Result<u64, StoreError> {
        let mut calls = self.calls.lock().expect("mutex poisoned");
        let mut cleared = 0u64;
        for rec in calls.iter_mut() {
            if let Some(email) = rec.call.external_email.as_deref() {
                if emails.iter().any(|e| e.eq_ignore_ascii_case(email)) {
                    rec.call.external_email = None;
                    cleared += 1;
                }
            }
        }
        Ok(cleared)
    }

    async fn internal_gallery_candidates(&self) -> Result<Vec<DirectoryCandidate>, StoreError> {
        Ok(self.internal.lock().expect("mutex poisoned").clone())
    }

    async fn external_directory_candidates(&self) -> Result<Vec<DirectoryCandidate>, StoreError> {
        Ok(self.external.lock().expect("mutex poisoned").clone())
    }

    async fn upsert_directory_entry(
        &self,
        candidate: &DirectoryCandidate,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let Some(email) = candidate.email.as_deref() else {
            return Ok(());
        };
        let key = email.to_lowercase();
        let mut directory = self.directory.lock().expect("mutex poisoned");
        match directory.get_mut(&key) {
            Some(existing) => apply_directory_upsert(existing, candidate, now),
            None => {
                directory.insert(key.clone(), entry_from_candidate(candidate, &key, now));
            }
        }
        Ok(())
    }

    async fn list_directory(&self) -> Result<Vec<DirectoryEntry>, StoreError> {
        Ok(self
            .directory
            .lock()
            .expect("mutex poisoned")
            .values()
            .cloned()
            .collect())
    }

    async fn deactivate_directory_entry(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut directory = self.directory.lock().expect("mutex poisoned");
        match directory.get_mut(&email.to_lowercase()) {
            Some(entry) => {
                entry.is_active = false;
                entry.updated_at = now;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_directory_entries(&self, emails: &[String]) -> Result<u64, StoreError> {
        let mut directory = self.directory.lock().expect("mutex poisoned");
        let before = directory.len();
        directory.retain(|key, _| !emails.iter().any(|e| e.eq_ignore_ascii_case(key)));
        Ok((before - directory.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Postgres store

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|err| StoreError::Unavailable(err.to_string()))?;
        Ok(Self { pool })
    }

    /// Create the tables this crate owns if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS open_calls (
                id UUID PRIMARY KEY,
                is_external BOOLEAN NOT NULL DEFAULT TRUE,
                created_at TIMESTAMPTZ NOT NULL,
                source TEXT NOT NULL,
                gallery TEXT NOT NULL,
                gallery_id TEXT NOT NULL,
                city TEXT NOT NULL,
                country TEXT NOT NULL,
                theme TEXT NOT NULL,
                deadline DATE NOT NULL,
                external_email TEXT,
                external_url TEXT UNIQUE,
                gallery_website TEXT,
                gallery_description TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS gallery_email_directory (
                email TEXT PRIMARY KEY,
                gallery_name TEXT NOT NULL,
                country TEXT,
                city TEXT,
                language TEXT NOT NULL,
                source TEXT NOT NULL,
                gallery_id TEXT,
                website TEXT,
                quality_score INT NOT NULL,
                is_active BOOLEAN NOT NULL DEFAULT TRUE,
                is_blocked BOOLEAN NOT NULL DEFAULT FALSE,
                last_seen_at TIMESTAMPTZ NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn record_from_row(row: &sqlx::postgres::PgRow) -> Result<OpenCallRecord, sqlx::Error> {
        Ok(OpenCallRecord {
            id: row.try_get("id")?,
            is_external: row.try_get("is_external")?,
            created_at: row.try_get("created_at")?,
            call: CrawledOpenCall {
                source: row.try_get("source")?,
                gallery: row.try_get("gallery")?,
                gallery_id: row.try_get("gallery_id")?,
                city: row.try_get("city")?,
                country: row.try_get("country")?,
                theme: row.try_get("theme")?,
                deadline: row.try_get("deadline")?,
                external_email: row.try_get("external_email")?,
                external_url: row.try_get("external_url")?,
                gallery_website: row.try_get("gallery_website")?,
                gallery_description: row.try_get("gallery_description")?,
            },
        })
    }

    fn entry_from_row(row: &sqlx::postgres::PgRow) -> Result<DirectoryEntry, sqlx::Error> {
        let source: String = row.try_get("source")?;
        Ok(DirectoryEntry {
            email: row.try_get("email")?,
            gallery_name: row.try_get("gallery_name")?,
            country: row.try_get("country")?,
            city: row.try_get("city")?,
            language: row.try_get("language")?,
            source: EmailSource::from_str_loose(&source).unwrap_or(EmailSource::ExternalDirectory),
            gallery_id: row.try_get("gallery_id")?,
            website: row.try_get("website")?,
            quality_score: row.try_get("quality_score")?,
            is_active: row.try_get("is_active")?,
            is_blocked: row.try_get("is_blocked")?,
            last_seen_at: row.try_get("last_seen_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn write_entry(&self, entry: &DirectoryEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO gallery_email_directory
                (email, gallery_name, country, city, language, source, gallery_id,
                 website, quality_score, is_active, is_blocked, last_seen_at,
                 created_at, updated_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
            ON CONFLICT (email) DO UPDATE SET
                gallery_name = EXCLUDED.gallery_name,
                country = EXCLUDED.country,
                city = EXCLUDED.city,
                language = EXCLUDED.language,
                source = EXCLUDED.source,
                gallery_id = EXCLUDED.gallery_id,
                website = EXCLUDED.website,
                quality_score = EXCLUDED.quality_score,
                is_active = EXCLUDED.is_active,
                last_seen_at = EXCLUDED.last_seen_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&entry.email)
        .bind(&entry.gallery_name)
        .bind(&entry.country)
        .bind(&entry.city)
        .bind(&entry.language)
        .bind(entry.source.as_str())
        .bind(&entry.gallery_id)
        .bind(&entry.website)
        .bind(entry.quality_score)
        .bind(entry.is_active)
        .bind(entry.is_blocked)
        .bind(entry.last_seen_at)
        .bind(entry.created_at)
        .bind(entry.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CallStore for PgStore {
    async fn create_open_call(
        &self,
        call: &CrawledOpenCall,
        now: DateTime<Utc>,
    ) -> Result<OpenCallRecord, StoreError> {
        let id = Uuid::new_v4();
        let result = sqlx::query(
            r#"
            INSERT INTO open_calls
                (id, is_external, created_at, source, gallery, gallery_id, city,
                 country, theme, deadline, external_email, external_url,
                 gallery_website, gallery_description)
            VALUES ($1, TRUE, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (external_url) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(&call.source)
        .bind(&call.gallery)
        .bind(&call.gallery_id)
        .bind(&call.city)
        .bind(&call.country)
        .bind(&call.theme)
        .bind(call.deadline)
        .bind(&call.external_email)
        .bind(&call.external_url)
        .bind(&call.gallery_website)
        .bind(&call.gallery_description)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            // URL collision: the opportunity is already known.
            let row = sqlx::query("SELECT * FROM open_calls WHERE external_url = $1")
                .bind(&call.external_url)
                .fetch_one(&self.pool)
                .await?;
            return Ok(Self::record_from_row(&row)?);
        }

        Ok(OpenCallRecord {
            id,
            is_external: true,
            created_at: now,
            call: call.clone(),
        })
    }

    async fn list_open_calls(&self) -> Result<Vec<OpenCallRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM open_calls ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(Self::record_from_row(row)?);
        }
        Ok(out)
    }

    async fn delete_open_calls(&self, ids: &[Uuid]) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM open_calls WHERE id = ANY($1)")
            .bind(ids)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn clear_external_emails(&self, emails: &[String]) -> Result<u64, StoreError> {
        if emails.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE open_calls SET external_email = NULL WHERE LOWER(external_email) = ANY($1)",
        )
        .bind(emails.iter().map(|e| e.to_lowercase()).collect::<Vec<_>>())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn internal_gallery_candidates(&self) -> Result<Vec<DirectoryCandidate>, StoreError> {
        let rows = sqlx::query(
            "SELECT gallery_id, name, email, country, city, website FROM internal_galleries",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(DirectoryCandidate {
                gallery_name: row.try_get("name")?,
                email: row.try_get("email")?,
                country: row.try_get("country")?,
                city: row.try_get("city")?,
                source: EmailSource::InternalGallery,
                gallery_id: row.try_get("gallery_id")?,
                website: row.try_get("website")?,
                quality_score: EmailSource::InternalGallery.default_quality_score(),
            });
        }
        Ok(out)
    }

    async fn external_directory_candidates(&self) -> Result<Vec<DirectoryCandidate>, StoreError> {
        let rows = sqlx::query(
            "SELECT gallery_name, email, country, city, website, quality_score \
             FROM external_gallery_directory",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let quality: Option<i32> = row.try_get("quality_score")?;
            out.push(DirectoryCandidate {
                gallery_name: row.try_get("gallery_name")?,
                email: row.try_get("email")?,
                country: row.try_get("country")?,
                city: row.try_get("city")?,
                source: EmailSource::ExternalDirectory,
                gallery_id: None,
                website: row.try_get("website")?,
                quality_score: quality
                    .unwrap_or_else(|| EmailSource::ExternalDirectory.default_quality_score()),
            });
        }
        Ok(out)
    }

    async fn upsert_directory_entry(
        &self,
        candidate: &DirectoryCandidate,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let Some(email) = candidate.email.as_deref() else {
            return Ok(());
        };
        let key = email.to_lowercase();
        let existing = sqlx::query("SELECT * FROM gallery_email_directory WHERE email = $1")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await?;

        let entry = match existing {
            Some(row) => {
                let mut entry = Self::entry_from_row(&row)?;
                apply_directory_upsert(&mut entry, candidate, now);
                entry
            }
            None => entry_from_candidate(candidate, &key, now),
        };
        self.write_entry(&entry).await
    }

    async fn list_directory(&self) -> Result<Vec<DirectoryEntry>, StoreError> {
        let rows = sqlx::query("SELECT * FROM gallery_email_directory ORDER BY email")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(Self::entry_from_row(row)?);
        }
        Ok(out)
    }

    async fn deactivate_directory_entry(
        &self,
        email: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE gallery_email_directory SET is_active = FALSE, updated_at = $2 \
             WHERE email = $1",
        )
        .bind(email.to_lowercase())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_directory_entries(&self, emails: &[String]) -> Result<u64, StoreError> {
        if emails.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query("DELETE FROM gallery_email_directory WHERE email = ANY($1)")
            .bind(emails.iter().map(|e| e.to_lowercase()).collect::<Vec<_>>())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap()
    }

    fn sample_call(url: Option<&str>) -> CrawledOpenCall {
        CrawledOpenCall {
            source: "kr_rss".into(),
            gallery: "Seoul Art Space".into(),
            gallery_id: "__external_kr_rss_seoul-art-space".into(),
            city: "Seoul".into(),
            country: "KR".into(),
            theme: "2026 Emerging Artists Open Call".into(),
            deadline: NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            external_email: Some("contact@seoulart.example".into()),
            external_url: url.map(ToString::to_string),
            gallery_website: None,
            gallery_description: None,
        }
    }

    #[tokio::test]
    async fn url_collision_returns_existing_record() {
        let store = MemoryStore::new();
        let first = store
            .create_open_call(&sample_call(Some("https://a.example/call/1")), now())
            .await
            .unwrap();
        let second = store
            .create_open_call(&sample_call(Some("https://a.example/call/1")), now())
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.list_open_calls().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn clear_external_emails_blanks_matching_rows() {
        let store = MemoryStore::new();
        store.create_open_call(&sample_call(None), now()).await.unwrap();
        let cleared = store
            .clear_external_emails(&["CONTACT@seoulart.example".to_string()])
            .await
            .unwrap();
        assert_eq!(cleared, 1);
        let calls = store.list_open_calls().await.unwrap();
        assert!(calls[0].call.external_email.is_none());
    }

    #[tokio::test]
    async fn weaker_candidate_never_overwrites_internal_fields() {
        let store = MemoryStore::new();
        let internal = DirectoryCandidate {
            email: Some("info@gallery.example".into()),
            country: Some("DE".into()),
            city: Some("Berlin".into()),
            website: Some("https://gallery.example".into()),
            ..DirectoryCandidate::from_source("Galerie Mitte", EmailSource::InternalGallery)
        };
        store.upsert_directory_entry(&internal, now()).await.unwrap();

        let discovered = DirectoryCandidate {
            email: Some("info@gallery.example".into()),
            city: Some("Hamburg".into()),
            ..DirectoryCandidate::from_source("scraped name", EmailSource::WebsiteDiscovery)
        };
        store.upsert_directory_entry(&discovered, now()).await.unwrap();

        let entries = store.list_directory().await.unwrap();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.gallery_name, "Galerie Mitte");
        assert_eq!(entry.city.as_deref(), Some("Berlin"));
        assert_eq!(entry.country.as_deref(), Some("DE"));
        assert_eq!(entry.source, EmailSource::InternalGallery);
        // quality still bumps to the maximum seen
        assert_eq!(entry.quality_score, 100);
    }

    #[tokio::test]
    async fn weaker_candidate_fills_gaps() {
        let store = MemoryStore::new();
        let open_call = DirectoryCandidate {
            email: Some("mail@kunsthalle.example".into()),
            ..DirectoryCandidate::from_source("Kunsthalle", EmailSource::OpenCall)
        };
        store.upsert_directory_entry(&open_call, now()).await.unwrap();

        let discovered = DirectoryCandidate {
            email: Some("mail@kunsthalle.example".into()),
            website: Some("https://kunsthalle.example".into()),
            ..DirectoryCandidate::from_source("Kunsthalle", EmailSource::WebsiteDiscovery)
        };
        store.upsert_directory_entry(&discovered, now()).await.unwrap();

        let entry = &store.list_directory().await.unwrap()[0];
        assert_eq!(entry.website.as_deref(), Some("https://kunsthalle.example"));
        assert_eq!(entry.source, EmailSource::OpenCall);
        assert_eq!(entry.quality_score, 70);
    }

    #[tokio::test]
    async fn deactivate_is_soft_delete_is_hard() {
        let store = MemoryStore::new();
        let cand = DirectoryCandidate {
            email: Some("a@b.example".into()),
            ..DirectoryCandidate::from_source("G", EmailSource::OpenCall)
        };
        store.upsert_directory_entry(&cand, now()).await.unwrap();

        assert!(store.deactivate_directory_entry("a@b.example", now()).await.unwrap());
        assert!(!store.list_directory().await.unwrap()[0].is_active);

        let deleted = store
            .delete_directory_entries(&["a@b.example".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert!(store.list_directory().await.unwrap().is_empty());
    }
}
