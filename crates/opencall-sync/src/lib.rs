//! Crawl orchestration: configuration, dedup identity, the run state
//! machine, gallery identity merging, website email discovery, and the
//! directory synchronizer. The cron scheduler lives here too so the CLI and
//! the web trigger share one entry point.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use opencall_adapters::{
    european_seed_calls, host_of, japanese_seed_calls, korean_seed_calls, HtmlLinkFetcher,
    InstagramConfig, InstagramFetcher, Locale, RssFetcher, SourceDefaults, SourceFetcher,
};
use opencall_core::{is_deadline_active, normalize, CrawledOpenCall, DirectoryCandidate, EmailSource};
use opencall_storage::{
    CallStore, HttpClientConfig, HttpFetcher, MemoryStore, PgStore, StoreError,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinSet;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "opencall-sync";

// ---------------------------------------------------------------------------
// Configuration

const DEFAULT_KR_FEEDS: &[&str] = &[
    "https://www.neolook.com/rss",
    "https://www.artbava.com/feed/opencall",
];
const DEFAULT_JP_FEEDS: &[&str] = &[
    "https://bijutsutecho.com/feed",
    "https://www.tokyoartbeat.com/en/articles/feed",
];
const DEFAULT_JP_PAGES: &[&str] = &["https://www.koubo.co.jp/category/art/"];

const DEFAULT_CRON_PRIMARY: &str = "0 0 6 * * *";
const DEFAULT_CRON_SECONDARY: &str = "0 0 18 * * *";

#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub crawl_enabled: bool,
    pub instagram_enabled: bool,
    pub database_url: Option<String>,
    pub user_agent: String,
    pub fetch_timeout: Duration,
    pub discovery_timeout: Duration,
    pub discovery_budget: usize,
    pub korean_feed_urls: Vec<String>,
    pub japanese_feed_urls: Vec<String>,
    pub japanese_page_urls: Vec<String>,
    pub korean_defaults: SourceDefaults,
    pub japanese_defaults: SourceDefaults,
    pub instagram: InstagramConfig,
    pub scheduler_enabled: bool,
    pub cron_primary: String,
    pub cron_secondary: String,
    pub workspace_root: PathBuf,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            crawl_enabled: true,
            instagram_enabled: false,
            database_url: None,
            user_agent: HttpClientConfig::default().user_agent,
            fetch_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_millis(1500),
            discovery_budget: 12,
            korean_feed_urls: Vec::new(),
            japanese_feed_urls: Vec::new(),
            japanese_page_urls: Vec::new(),
            korean_defaults: default_korean_source_defaults(),
            japanese_defaults: default_japanese_source_defaults(),
            instagram: InstagramConfig::default(),
            scheduler_enabled: false,
            cron_primary: DEFAULT_CRON_PRIMARY.to_string(),
            cron_secondary: DEFAULT_CRON_SECONDARY.to_string(),
            workspace_root: PathBuf::from("."),
        }
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(value) => value
            .split(',')
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => default.iter().map(|v| v.to_string()).collect(),
    }
}

impl CrawlConfig {
    pub fn from_env() -> Self {
        let instagram = InstagramConfig {
            access_token: std::env::var("OPENCALL_INSTAGRAM_TOKEN").ok().filter(|v| !v.is_empty()),
            account_ids: env_list("OPENCALL_INSTAGRAM_ACCOUNTS", &[]),
            accounts: std::env::var("OPENCALL_INSTAGRAM_ACCOUNT_META")
                .ok()
                .and_then(|raw| match serde_json::from_str(&raw) {
                    Ok(map) => Some(map),
                    Err(err) => {
                        warn!(%err, "ignoring unparseable OPENCALL_INSTAGRAM_ACCOUNT_META");
                        None
                    }
                })
                .unwrap_or_default(),
            api_base: env_string(
                "OPENCALL_INSTAGRAM_API_BASE",
                "https://graph.facebook.com/v19.0",
            ),
        };

        let mut config = Self {
            crawl_enabled: env_flag("OPENCALL_CRAWL_ENABLED", true),
            instagram_enabled: env_flag("OPENCALL_INSTAGRAM_ENABLED", false),
            database_url: std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty()),
            user_agent: env_string("OPENCALL_USER_AGENT", &HttpClientConfig::default().user_agent),
            fetch_timeout: Duration::from_secs(env_u64("OPENCALL_FETCH_TIMEOUT_SECS", 10)),
            discovery_timeout: Duration::from_millis(env_u64(
                "OPENCALL_DISCOVERY_TIMEOUT_MILLIS",
                1500,
            )),
            discovery_budget: env_u64("OPENCALL_DISCOVERY_BUDGET", 12) as usize,
            korean_feed_urls: env_list("OPENCALL_KR_FEEDS", DEFAULT_KR_FEEDS),
            japanese_feed_urls: env_list("OPENCALL_JP_FEEDS", DEFAULT_JP_FEEDS),
            japanese_page_urls: env_list("OPENCALL_JP_PAGES", DEFAULT_JP_PAGES),
            korean_defaults: source_defaults_from_env("KR", default_korean_source_defaults()),
            japanese_defaults: source_defaults_from_env("JP", default_japanese_source_defaults()),
            instagram,
            scheduler_enabled: env_flag("OPENCALL_SCHEDULER_ENABLED", false),
            cron_primary: env_string("OPENCALL_CRON_PRIMARY", DEFAULT_CRON_PRIMARY),
            cron_secondary: env_string("OPENCALL_CRON_SECONDARY", DEFAULT_CRON_SECONDARY),
            workspace_root: PathBuf::from(env_string("OPENCALL_WORKSPACE_ROOT", ".")),
        };

        if let Some(registry) = load_source_registry(&config.workspace_root) {
            config.apply_registry(registry);
        }
        config
    }

    /// Registry URLs extend (not replace) the configured lists; duplicates
    /// are dropped.
    pub fn apply_registry(&mut self, registry: SourceRegistry) {
        extend_unique(&mut self.korean_feed_urls, registry.korean_feeds);
        extend_unique(&mut self.japanese_feed_urls, registry.japanese_feeds);
        extend_unique(&mut self.japanese_page_urls, registry.japanese_pages);
    }
}

fn extend_unique(target: &mut Vec<String>, extra: Vec<String>) {
    for url in extra {
        if !target.contains(&url) {
            target.push(url);
        }
    }
}

/// Optional operator-maintained feed registry next to the binary.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceRegistry {
    #[serde(default)]
    pub korean_feeds: Vec<String>,
    #[serde(default)]
    pub japanese_feeds: Vec<String>,
    #[serde(default)]
    pub japanese_pages: Vec<String>,
}

pub fn load_source_registry(root: &Path) -> Option<SourceRegistry> {
    let path = root.join("sources.yaml");
    let raw = std::fs::read_to_string(&path).ok()?;
    match serde_yaml::from_str(&raw) {
        Ok(registry) => {
            info!(path = %path.display(), "loaded source registry");
            Some(registry)
        }
        Err(err) => {
            warn!(path = %path.display(), %err, "ignoring malformed source registry");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Dedup identity

/// Content identity for a crawled listing: sha-256 over the source host,
/// deadline, and normalized theme. Listings without a URL fall back to the
/// normalized gallery/location tuple. Derived on the fly, never persisted.
pub fn dedup_key(call: &CrawledOpenCall) -> String {
    let theme_n = normalize(&call.theme);
    let payload = match call.external_url.as_deref().and_then(host_of) {
        Some(host) => format!("{host}|{}|{theme_n}", call.deadline),
        None => format!(
            "{}|{}|{}|{}|{theme_n}",
            normalize(&call.gallery),
            normalize(&call.country),
            normalize(&call.city),
            call.deadline
        ),
    };
    hex::encode(Sha256::digest(payload.as_bytes()))
}

// ---------------------------------------------------------------------------
// Run reports

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportedCall {
    pub id: Uuid,
    pub source: String,
    pub gallery: String,
    pub country: String,
    pub theme: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectorySyncOutcome {
    pub collected: usize,
    pub merged: usize,
    pub discovered: usize,
    pub upserted: usize,
    pub purged: usize,
    pub deactivated: usize,
}

/// Structured result of one crawl run, returned to every trigger caller.
/// Per-source failures are listed, not fatal; only a store failure aborts
/// a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlReport {
    pub run_id: Uuid,
    pub enabled: bool,
    pub message: String,
    pub imported: Vec<ImportedCall>,
    pub skipped: usize,
    pub dropped_expired: usize,
    pub cleaned: usize,
    pub cleaned_expired: usize,
    pub sources: Vec<String>,
    pub source_errors: Vec<String>,
    pub email_directory: Option<DirectorySyncOutcome>,
}

// ---------------------------------------------------------------------------
// Orchestrator

/// Themes carrying exhibition-notice vocabulary that slipped past earlier
/// classifier revisions; removed from storage at the start of each run.
const MISCLASSIFIED_THEME_MARKERS: &[&str] = &["신규전시", "전시 안내", "個展", "展覧会"];

/// Sources retired from the adapter set whose rows should no longer be
/// served.
const RETIRED_SOURCE_PREFIXES: &[&str] = &["legacy_", "test_"];

pub struct CrawlOrchestrator {
    config: CrawlConfig,
    store: Arc<dyn CallStore>,
    fetchers: Vec<Arc<dyn SourceFetcher>>,
    http: HttpFetcher,
    discovery_http: HttpFetcher,
}

impl CrawlOrchestrator {
    pub fn new(config: CrawlConfig, store: Arc<dyn CallStore>) -> anyhow::Result<Self> {
        let fetchers = default_fetchers(&config);
        Self::with_fetchers(config, store, fetchers)
    }

    pub fn with_fetchers(
        config: CrawlConfig,
        store: Arc<dyn CallStore>,
        fetchers: Vec<Arc<dyn SourceFetcher>>,
    ) -> anyhow::Result<Self> {
        let http = HttpFetcher::new(HttpClientConfig {
            timeout: config.fetch_timeout,
            user_agent: config.user_agent.clone(),
            ..HttpClientConfig::default()
        })?;
        let discovery_http = discovery_http(&config)?;
        Ok(Self {
            config,
            store,
            fetchers,
            http,
            discovery_http,
        })
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn CallStore> {
        Arc::clone(&self.store)
    }

    /// Synchronizer sharing this orchestrator's store and discovery client,
    /// for callers that want an email sync without a full crawl.
    pub fn synchronizer(&self) -> DirectorySynchronizer {
        DirectorySynchronizer::new(
            Arc::clone(&self.store),
            self.discovery_http.clone(),
            self.config.discovery_budget,
        )
    }

    /// One full crawl run. Always idempotent: re-running against an
    /// unchanged world imports nothing and removes nothing new.
    pub async fn run(&self) -> anyhow::Result<CrawlReport> {
        let run_id = Uuid::new_v4();
        let now = Utc::now();

        if !self.config.crawl_enabled {
            // Lifecycle maintenance still runs so stale listings are not
            // served while crawling is paused.
            let expired = self.expire_stale(now).await?;
            info!(%run_id, expired, "crawl disabled, expiry sweep only");
            return Ok(CrawlReport {
                run_id,
                enabled: false,
                message: "crawling disabled".to_string(),
                cleaned_expired: expired,
                ..CrawlReport::default()
            });
        }

        info!(%run_id, fetchers = self.fetchers.len(), "crawl run starting");
        let cleaned = self.cleanup_misclassified().await?;

        let mut join_set = JoinSet::new();
        for fetcher in &self.fetchers {
            let fetcher = Arc::clone(fetcher);
            let http = self.http.clone();
            join_set.spawn(async move {
                let source_id = fetcher.source_id();
                (source_id, fetcher.fetch(&http, now).await)
            });
        }

        let mut candidates = Vec::new();
        let mut sources = Vec::new();
        let mut source_errors = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((source_id, calls)) => {
                    debug!(source = source_id, count = calls.len(), "source fetched");
                    sources.push(source_id.to_string());
                    candidates.extend(calls);
                }
                Err(err) => {
                    warn!(%err, "source fetch task failed");
                    source_errors.push(format!("fetch task: {err}"));
                }
            }
        }
        sources.sort_unstable();

        let before_filter = candidates.len();
        candidates.retain(|call| is_deadline_active(call.deadline, now));
        let dropped_expired = before_filter - candidates.len();

        // Dedup barriers: everything already stored (by derived key and by
        // URL) plus everything persisted earlier in this batch.
        let existing = self.store.list_open_calls().await?;
        let mut seen_keys: HashSet<String> =
            existing.iter().map(|record| dedup_key(&record.call)).collect();
        let mut seen_urls: HashSet<String> = existing
            .iter()
            .filter_map(|record| record.call.external_url.clone())
            .collect();

        let mut imported = Vec::new();
        let mut skipped = 0usize;
        for call in candidates {
            let key = dedup_key(&call);
            let url_seen = call
                .external_url
                .as_ref()
                .is_some_and(|url| seen_urls.contains(url));
            if url_seen || seen_keys.contains(&key) {
                skipped += 1;
                continue;
            }

            match self.store.create_open_call(&call, now).await {
                Ok(record) => {
                    seen_keys.insert(key);
                    if let Some(url) = &record.call.external_url {
                        seen_urls.insert(url.clone());
                    }
                    if record.created_at == now {
                        imported.push(ImportedCall {
                            id: record.id,
                            source: record.call.source,
                            gallery: record.call.gallery,
                            country: record.call.country,
                            theme: record.call.theme,
                        });
                    } else {
                        // URL collision resolved to an already-known row.
                        skipped += 1;
                    }
                }
                Err(err) => {
                    warn!(source = %call.source, gallery = %call.gallery, %err, "failed to persist listing");
                    source_errors.push(format!("persist {}: {err}", call.source));
                }
            }
        }

        let synchronizer = DirectorySynchronizer::new(
            Arc::clone(&self.store),
            self.discovery_http.clone(),
            self.config.discovery_budget,
        );
        let email_directory = synchronizer.sync(now).await?;
        let cleaned_expired = self.expire_stale(now).await?;

        let message = format!(
            "imported {} listings ({} duplicates skipped)",
            imported.len(),
            skipped
        );
        info!(%run_id, imported = imported.len(), skipped, dropped_expired, cleaned, cleaned_expired, "crawl run finished");

        Ok(CrawlReport {
            run_id,
            enabled: true,
            message,
            imported,
            skipped,
            dropped_expired,
            cleaned,
            cleaned_expired,
            sources,
            source_errors,
            email_directory: Some(email_directory),
        })
    }

    /// Drops externally sourced rows from retired sources or with
    /// exhibition-notice themes that predate the current classifiers.
    async fn cleanup_misclassified(&self) -> anyhow::Result<usize> {
        let existing = self.store.list_open_calls().await?;
        let doomed: Vec<Uuid> = existing
            .iter()
            .filter(|record| record.is_external)
            .filter(|record| {
                let retired = RETIRED_SOURCE_PREFIXES
                    .iter()
                    .any(|prefix| record.call.source.starts_with(prefix));
                let theme_n = normalize(&record.call.theme);
                retired
                    || MISCLASSIFIED_THEME_MARKERS
                        .iter()
                        .any(|marker| theme_n.contains(marker))
            })
            .map(|record| record.id)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        let removed = self.store.delete_open_calls(&doomed).await?;
        info!(removed, "removed misclassified listings");
        Ok(removed as usize)
    }

    /// Deletes crawled rows whose deadline has passed. Scoped to external
    /// records; internally created open calls are not ours to expire.
    async fn expire_stale(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let existing = self.store.list_open_calls().await?;
        let doomed: Vec<Uuid> = existing
            .iter()
            .filter(|record| record.is_external)
            .filter(|record| !is_deadline_active(record.call.deadline, now))
            .map(|record| record.id)
            .collect();
        if doomed.is_empty() {
            return Ok(0);
        }
        let removed = self.store.delete_open_calls(&doomed).await?;
        info!(removed, "expired stale listings");
        Ok(removed as usize)
    }
}

fn default_korean_source_defaults() -> SourceDefaults {
    SourceDefaults {
        gallery_label: "한국 공모 소식".to_string(),
        city: "Seoul".to_string(),
        country: "KR".to_string(),
        contact_email: None,
    }
}

fn default_japanese_source_defaults() -> SourceDefaults {
    SourceDefaults {
        gallery_label: "日本公募情報".to_string(),
        city: "Tokyo".to_string(),
        country: "JP".to_string(),
        contact_email: None,
    }
}

/// Per-locale overrides: `OPENCALL_<LOCALE>_LABEL` / `_CITY` /
/// `_CONTACT_EMAIL`.
fn source_defaults_from_env(locale: &str, base: SourceDefaults) -> SourceDefaults {
    SourceDefaults {
        gallery_label: env_string(&format!("OPENCALL_{locale}_LABEL"), &base.gallery_label),
        city: env_string(&format!("OPENCALL_{locale}_CITY"), &base.city),
        country: base.country,
        contact_email: std::env::var(format!("OPENCALL_{locale}_CONTACT_EMAIL"))
            .ok()
            .filter(|v| !v.is_empty())
            .or(base.contact_email),
    }
}

fn default_fetchers(config: &CrawlConfig) -> Vec<Arc<dyn SourceFetcher>> {
    let korean_defaults = config.korean_defaults.clone();
    let japanese_defaults = config.japanese_defaults.clone();

    let mut fetchers: Vec<Arc<dyn SourceFetcher>> = vec![
        Arc::new(
            RssFetcher::new(
                "kr_rss",
                Locale::Korean,
                config.korean_feed_urls.clone(),
                korean_defaults,
            )
            .with_fallback(korean_seed_calls()),
        ),
        Arc::new(
            RssFetcher::new(
                "jp_rss",
                Locale::Japanese,
                config.japanese_feed_urls.clone(),
                japanese_defaults.clone(),
            )
            .with_fallback(japanese_seed_calls()),
        ),
        Arc::new(HtmlLinkFetcher::new(
            "jp_html",
            Locale::Japanese,
            config.japanese_page_urls.clone(),
            japanese_defaults,
        )),
        Arc::new(opencall_adapters::StaticListFetcher::new(
            "eu_static",
            european_seed_calls(),
        )),
    ];
    if config.instagram_enabled && config.instagram.is_configured() {
        fetchers.push(Arc::new(InstagramFetcher::new(config.instagram.clone())));
    }
    fetchers
}

fn discovery_http(config: &CrawlConfig) -> anyhow::Result<HttpFetcher> {
    HttpFetcher::new(HttpClientConfig {
        timeout: config.discovery_timeout,
        user_agent: config.user_agent.clone(),
        global_concurrency: 4,
    })
}

// ---------------------------------------------------------------------------
// Gallery identity merging

/// Identity for cross-source gallery matching: website host when known,
/// otherwise normalized name plus location.
pub fn gallery_identity_key(candidate: &DirectoryCandidate) -> String {
    if let Some(host) = candidate.website.as_deref().and_then(host_of) {
        return host;
    }
    format!(
        "{}|{}|{}",
        normalize(&candidate.gallery_name),
        normalize(candidate.country.as_deref().unwrap_or("")),
        normalize(candidate.city.as_deref().unwrap_or(""))
    )
}

fn fill_missing(slot: &mut Option<String>, value: Option<String>) {
    if slot.as_deref().map(str::trim).filter(|v| !v.is_empty()).is_none() {
        if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
            *slot = Some(value);
        }
    }
}

fn merge_pair(a: DirectoryCandidate, b: DirectoryCandidate) -> DirectoryCandidate {
    let b_wins = b.source.rank() > a.source.rank()
        || (b.source.rank() == a.source.rank() && b.quality_score > a.quality_score);
    let (mut winner, loser) = if b_wins { (b, a) } else { (a, b) };

    fill_missing(&mut winner.email, loser.email);
    fill_missing(&mut winner.website, loser.website);
    fill_missing(&mut winner.country, loser.country);
    fill_missing(&mut winner.city, loser.city);
    fill_missing(&mut winner.gallery_id, loser.gallery_id);
    winner.quality_score = winner.quality_score.max(loser.quality_score);
    winner
}

/// Folds candidates for the same gallery into one. The higher-priority
/// source keeps its fields; lower-priority candidates only fill gaps.
pub fn merge_gallery_candidates(candidates: Vec<DirectoryCandidate>) -> Vec<DirectoryCandidate> {
    let mut merged: HashMap<String, DirectoryCandidate> = HashMap::new();
    for candidate in candidates {
        match merged.entry(gallery_identity_key(&candidate)) {
            Entry::Occupied(mut slot) => {
                let current = slot.get_mut();
                *current = merge_pair(current.clone(), candidate);
            }
            Entry::Vacant(slot) => {
                slot.insert(candidate);
            }
        }
    }
    merged.into_values().collect()
}

// ---------------------------------------------------------------------------
// Email discovery

static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}").expect("valid regex")
});

/// Placeholder domains that template sites and directory imports leave
/// behind; never valid recipients.
pub const SYNTHETIC_EMAIL_DOMAINS: &[&str] = &[
    "gallery.art",
    "example.com",
    "yourdomain.com",
    "sentry.io",
    "wixpress.com",
];

pub fn is_synthetic_email(email: &str) -> bool {
    let email = email.to_lowercase();
    let Some((_, domain)) = email.split_once('@') else {
        return true;
    };
    SYNTHETIC_EMAIL_DOMAINS
        .iter()
        .any(|synthetic| domain == *synthetic || domain.ends_with(&format!(".{synthetic}")))
}

/// Synthetic or transactional addresses that must never enter the
/// directory.
pub fn is_discardable_email(email: &str) -> bool {
    let email = email.to_lowercase();
    email.starts_with("noreply@")
        || email.starts_with("no-reply@")
        || email.starts_with("donotreply@")
        || is_synthetic_email(&email)
}

/// First usable address in a page body, preferring addresses on the site's
/// own domain over third-party ones.
pub fn pick_email(body: &str, host: &str) -> Option<String> {
    let mut fallback = None;
    for found in EMAIL_RE.find_iter(body) {
        let email = found.as_str().to_lowercase();
        if is_discardable_email(&email) {
            continue;
        }
        let Some((_, domain)) = email.split_once('@') else {
            continue;
        };
        // Suffix matches must sit on a label boundary so an unrelated
        // domain sharing a suffix does not count as the site's own.
        if domain == host
            || host.ends_with(&format!(".{domain}"))
            || domain.ends_with(&format!(".{host}"))
        {
            return Some(email);
        }
        if fallback.is_none() {
            fallback = Some(email);
        }
    }
    fallback
}

fn discovery_page_url(website: &str, path: &str) -> Option<String> {
    let base = url::Url::parse(website).ok()?;
    if path.is_empty() {
        return Some(base.to_string());
    }
    base.join(path).ok().map(|u| u.to_string())
}

/// Best-effort contact scraping for galleries without a known address.
/// Scoped to one sync run: results (including misses) are cached per host
/// and a global page-fetch budget bounds total network cost.
pub struct EmailDiscovery {
    cache: HashMap<String, Option<String>>,
    attempts_left: usize,
}

impl EmailDiscovery {
    const PROBE_PATHS: [&'static str; 3] = ["", "contact", "about"];

    pub fn new(budget: usize) -> Self {
        Self {
            cache: HashMap::new(),
            attempts_left: budget,
        }
    }

    pub fn attempts_remaining(&self) -> usize {
        self.attempts_left
    }

    pub async fn discover(&mut self, http: &HttpFetcher, website: &str) -> Option<String> {
        let host = host_of(website)?;
        if let Some(cached) = self.cache.get(&host) {
            return cached.clone();
        }

        let mut found = None;
        for path in Self::PROBE_PATHS {
            if self.attempts_left == 0 {
                debug!(%host, "discovery budget exhausted");
                break;
            }
            self.attempts_left -= 1;
            let Some(url) = discovery_page_url(website, path) else {
                break;
            };
            match http.fetch_text(&url).await {
                Ok(body) => {
                    if let Some(email) = pick_email(&body, &host) {
                        found = Some(email);
                        break;
                    }
                }
                Err(err) => debug!(%host, path, %err, "discovery fetch failed"),
            }
        }

        self.cache.insert(host, found.clone());
        found
    }
}

// ---------------------------------------------------------------------------
// Directory synchronizer

/// Rebuilds the gallery email directory: purge placeholders, collect
/// candidates from every source, merge per gallery identity, discover
/// missing addresses, upsert.
pub struct DirectorySynchronizer {
    store: Arc<dyn CallStore>,
    http: HttpFetcher,
    discovery_budget: usize,
}

impl DirectorySynchronizer {
    pub fn new(store: Arc<dyn CallStore>, http: HttpFetcher, discovery_budget: usize) -> Self {
        Self {
            store,
            http,
            discovery_budget,
        }
    }

    pub async fn sync(&self, now: DateTime<Utc>) -> anyhow::Result<DirectorySyncOutcome> {
        let directory = self.store.list_directory().await?;
        let synthetic: Vec<String> = directory
            .iter()
            .filter(|entry| is_synthetic_email(&entry.email))
            .map(|entry| entry.email.clone())
            .collect();
        let mut purged = 0usize;
        if !synthetic.is_empty() {
            purged = self.store.delete_directory_entries(&synthetic).await? as usize;
            let cleared = self.store.clear_external_emails(&synthetic).await?;
            info!(purged, cleared, "purged placeholder directory emails");
        }

        let mut candidates = self.store.internal_gallery_candidates().await?;
        candidates.extend(self.store.external_directory_candidates().await?);
        candidates.extend(self.open_call_candidates().await?);
        let collected = candidates.len();

        let mut merged = merge_gallery_candidates(candidates);
        let merged_count = merged.len();

        let mut discovery = EmailDiscovery::new(self.discovery_budget);
        let mut discovered = 0usize;
        for candidate in merged.iter_mut() {
            let usable = candidate
                .email
                .as_deref()
                .map(|email| !is_discardable_email(email))
                .unwrap_or(false);
            if usable {
                continue;
            }
            let Some(website) = candidate.website.clone() else {
                continue;
            };
            if let Some(email) = discovery.discover(&self.http, &website).await {
                candidate.email = Some(email);
                candidate.source = EmailSource::WebsiteDiscovery;
                candidate.quality_score = candidate
                    .quality_score
                    .max(EmailSource::WebsiteDiscovery.default_quality_score());
                discovered += 1;
            }
        }

        let mut upserted = 0usize;
        let mut kept_emails: HashSet<String> = HashSet::new();
        for candidate in &merged {
            let usable = candidate
                .email
                .as_deref()
                .map(|email| !is_discardable_email(email))
                .unwrap_or(false);
            if !usable {
                continue;
            }
            self.store.upsert_directory_entry(candidate, now).await?;
            if let Some(email) = candidate.email.as_deref() {
                kept_emails.insert(email.to_lowercase());
            }
            upserted += 1;
        }

        // Soft retirement: an active entry no source vouched for this run
        // is deactivated, never deleted (hard deletes are for synthetic
        // placeholders only). Reappearing entries are reactivated by the
        // upsert merge rule.
        let mut deactivated = 0usize;
        for entry in &directory {
            let email = entry.email.to_lowercase();
            if !entry.is_active || synthetic.contains(&entry.email) || kept_emails.contains(&email) {
                continue;
            }
            if self.store.deactivate_directory_entry(&email, now).await? {
                deactivated += 1;
            }
        }

        info!(collected, merged = merged_count, discovered, upserted, purged, deactivated, "directory sync finished");
        Ok(DirectorySyncOutcome {
            collected,
            merged: merged_count,
            discovered,
            upserted,
            purged,
            deactivated,
        })
    }

    async fn open_call_candidates(&self) -> Result<Vec<DirectoryCandidate>, StoreError> {
        let records = self.store.list_open_calls().await?;
        Ok(records
            .into_iter()
            .filter(|record| record.is_external)
            .map(|record| DirectoryCandidate {
                gallery_name: record.call.gallery,
                email: record.call.external_email,
                country: non_empty(record.call.country),
                city: non_empty(record.call.city),
                source: EmailSource::OpenCall,
                gallery_id: Some(record.call.gallery_id),
                website: record.call.gallery_website,
                quality_score: EmailSource::OpenCall.default_quality_score(),
            })
            .collect())
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

// ---------------------------------------------------------------------------
// Scheduler and entry points

/// Two daily cron triggers sharing the orchestrator instance with the admin
/// endpoint. Runs are idempotent, so an overlapping manual trigger is safe.
pub async fn maybe_build_scheduler(
    orchestrator: Arc<CrawlOrchestrator>,
) -> anyhow::Result<Option<JobScheduler>> {
    if !orchestrator.config().scheduler_enabled {
        return Ok(None);
    }

    let scheduler = JobScheduler::new().await?;
    let crons = [
        orchestrator.config().cron_primary.clone(),
        orchestrator.config().cron_secondary.clone(),
    ];
    for cron in crons {
        let orchestrator = Arc::clone(&orchestrator);
        let job = Job::new_async(cron.as_str(), move |_id, _scheduler| {
            let orchestrator = Arc::clone(&orchestrator);
            Box::pin(async move {
                match orchestrator.run().await {
                    Ok(report) => info!(run_id = %report.run_id, "scheduled crawl finished"),
                    Err(err) => warn!(%err, "scheduled crawl failed"),
                }
            })
        })?;
        scheduler.add(job).await?;
    }
    scheduler.start().await?;
    info!("crawl scheduler started");
    Ok(Some(scheduler))
}

pub async fn build_store_from_env(config: &CrawlConfig) -> anyhow::Result<Arc<dyn CallStore>> {
    match &config.database_url {
        Some(database_url) => {
            let store = PgStore::connect(database_url).await?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
        None => {
            warn!("DATABASE_URL not set, falling back to the in-memory store");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

pub async fn run_crawl_once_from_env() -> anyhow::Result<CrawlReport> {
    let config = CrawlConfig::from_env();
    let store = build_store_from_env(&config).await?;
    let orchestrator = CrawlOrchestrator::new(config, store)?;
    orchestrator.run().await
}

pub async fn run_email_sync_once_from_env() -> anyhow::Result<DirectorySyncOutcome> {
    let config = CrawlConfig::from_env();
    let store = build_store_from_env(&config).await?;
    let synchronizer =
        DirectorySynchronizer::new(store, discovery_http(&config)?, config.discovery_budget);
    synchronizer.sync(Utc::now()).await
}
