//! Granule search and download against the gridded data archive

use super::SourceError;
use crate::auth::{Authenticator, BackoffPolicy, CredentialSource, UrsExchange};
use crate::config::SafeOutConfig;
use crate::error::SafeOutError;
use crate::http::build_login_client;
use crate::models::LocationQuery;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// Rel suffix CMR uses for downloadable data links
const DATA_REL_SUFFIX: &str = "/data#";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    feed: Feed,
}

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(default)]
    entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
struct Entry {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    time_start: Option<String>,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    #[serde(default)]
    rel: String,
    href: String,
    #[serde(default)]
    inherited: bool,
}

/// One archive search hit
#[derive(Debug, Clone, PartialEq)]
pub struct Granule {
    pub id: String,
    pub title: String,
    pub time_start: Option<String>,
    pub data_links: Vec<String>,
}

impl From<Entry> for Granule {
    fn from(entry: Entry) -> Self {
        let data_links = entry
            .links
            .into_iter()
            .filter(|link| !link.inherited && link.rel.ends_with(DATA_REL_SUFFIX))
            .map(|link| link.href)
            .filter(|href| href.starts_with("https://") || href.starts_with("http://"))
            .collect();
        Self {
            id: entry.id,
            title: entry.title,
            time_start: entry.time_start,
            data_links,
        }
    }
}

impl Granule {
    /// File name of the first data link, without query string
    #[must_use]
    pub fn file_name(&self) -> Option<String> {
        let link = self.data_links.first()?;
        let path = link.split(['?', '#']).next()?;
        let name = path.rsplit('/').next()?;
        (!name.is_empty()).then(|| sanitize(name))
    }

    /// Granule-unique local file name: `<id>-<file name>`
    #[must_use]
    pub fn local_name(&self) -> Option<String> {
        Some(format!("{}-{}", sanitize(&self.id), self.file_name()?))
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Authenticated search and download client shared by the gridded sources
pub struct ArchiveClient {
    client: ClientWithMiddleware,
    authenticator: Arc<Authenticator>,
    cmr_base_url: String,
    granule_dir: PathBuf,
    page_size: u32,
}

impl ArchiveClient {
    #[must_use]
    pub fn new(
        client: ClientWithMiddleware,
        authenticator: Arc<Authenticator>,
        cmr_base_url: &str,
        granule_dir: PathBuf,
        page_size: u32,
    ) -> Self {
        Self {
            client,
            authenticator,
            cmr_base_url: cmr_base_url.trim_end_matches('/').to_string(),
            granule_dir,
            page_size: page_size.max(1),
        }
    }

    /// Client with its own process-wide authenticator. Logins go through a
    /// separate client without retries.
    pub fn from_config(
        client: ClientWithMiddleware,
        config: &SafeOutConfig,
    ) -> Result<Self, SafeOutError> {
        let earthdata = &config.earthdata;
        let exchange = UrsExchange::new(
            build_login_client(&config.http)?,
            &earthdata.urs_base_url,
            &earthdata.cmr_base_url,
        );
        let authenticator = Authenticator::new(
            CredentialSource::from_config(earthdata),
            Arc::new(exchange),
            BackoffPolicy::from_config(earthdata),
        );
        Ok(Self::new(
            client,
            Arc::new(authenticator),
            &earthdata.cmr_base_url,
            config.granule_dir(),
            earthdata.search_page_size,
        ))
    }

    #[must_use]
    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.authenticator
    }

    async fn token(&self) -> Result<String, SourceError> {
        self.authenticator
            .session()
            .await
            .map(|session| session.token)
            .ok_or_else(|| {
                SourceError::Authentication("not authenticated with NASA Earthdata".to_string())
            })
    }

    fn search_url(
        &self,
        short_name: &str,
        query: &LocationQuery,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> String {
        let circle = format!(
            "{},{},{}",
            query.longitude, query.latitude, query.radius_meters
        );
        let temporal = format!("{},{}", format_instant(start), format_instant(end));
        format!(
            "{}/search/granules.json?short_name={}&circle%5B%5D={}&temporal%5B%5D={}&sort_key%5B%5D=-start_date&page_size={}",
            self.cmr_base_url,
            urlencoding::encode(short_name),
            urlencoding::encode(&circle),
            urlencoding::encode(&temporal),
            self.page_size
        )
    }

    /// Granules intersecting the query circle over the trailing `days`,
    /// most recent first.
    #[instrument(skip(self, query), fields(lat = query.latitude, lon = query.longitude))]
    pub async fn search(
        &self,
        short_name: &str,
        query: &LocationQuery,
        end: DateTime<Utc>,
        days: u32,
    ) -> Result<Vec<Granule>, SourceError> {
        let token = self.token().await?;
        let start = end - ChronoDuration::days(i64::from(days));
        let url = self.search_url(short_name, query, start, end);

        let response = self.client.get(&url).bearer_auth(&token).send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Authentication(
                    format!("archive search rejected the session token ({status})"),
                ),
                _ => SourceError::Network(format!("archive search error {status}: {error_text}")),
            });
        }

        let results: SearchResponse = response.json().await.map_err(|e| {
            SourceError::malformed(format!("Failed to parse granule search response: {e}"))
        })?;
        let granules: Vec<Granule> = results.feed.entry.into_iter().map(Granule::from).collect();
        info!("Found {} granules for {}", granules.len(), short_name);
        Ok(granules)
    }

    /// Most recent granule with a data link, downloaded into the cache
    pub async fn latest_granule(
        &self,
        short_name: &str,
        query: &LocationQuery,
        end: DateTime<Utc>,
        days: u32,
    ) -> Result<(Granule, PathBuf), SourceError> {
        let granule = self
            .search(short_name, query, end, days)
            .await?
            .into_iter()
            .find(|granule| !granule.data_links.is_empty())
            .ok_or_else(|| {
                SourceError::unavailable(format!(
                    "no {short_name} granules in the last {days} days"
                ))
            })?;
        let path = self.download(short_name, &granule).await?;
        Ok((granule, path))
    }

    fn target_path(&self, short_name: &str, granule: &Granule) -> Result<PathBuf, SourceError> {
        let name = granule.local_name().ok_or_else(|| {
            SourceError::unavailable(format!("granule {} has no data link", granule.id))
        })?;
        Ok(self.granule_dir.join(sanitize(short_name)).join(name))
    }

    /// Download the granule's first data link, reusing a previous download.
    ///
    /// Bytes go to a temporary file next to the target which is renamed
    /// into place once complete.
    #[instrument(skip(self, granule), fields(granule_id = %granule.id))]
    pub async fn download(&self, short_name: &str, granule: &Granule) -> Result<PathBuf, SourceError> {
        let target = self.target_path(short_name, granule)?;
        if tokio::fs::try_exists(&target).await? {
            debug!("Reusing downloaded granule {}", target.display());
            return Ok(target);
        }
        let dir = target
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.granule_dir.clone());
        tokio::fs::create_dir_all(&dir).await?;

        let token = self.token().await?;
        let link = &granule.data_links[0];
        let mut response = self.client.get(link).bearer_auth(&token).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SourceError::Authentication(
                    format!("granule download refused ({status})"),
                ),
                _ => SourceError::Network(format!("granule download error {status}")),
            });
        }

        let (file, temp_path) = tempfile::NamedTempFile::new_in(&dir)?.into_parts();
        let mut file = tokio::fs::File::from_std(file);
        let mut written = 0usize;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len();
        }
        file.flush().await?;
        drop(file);

        temp_path
            .persist(&target)
            .map_err(|e| SourceError::Io(e.error))?;
        info!("Downloaded {} ({} bytes)", target.display(), written);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{
        AuthError, AuthMethod, BackoffPolicy, CredentialExchange, CredentialMaterial,
        CredentialSource,
    };
    use async_trait::async_trait;
    use chrono::TimeZone;

    const FEED: &str = r#"{"feed":{"updated":"2026-10-14T12:00:00Z","entry":[
        {"id":"G3191234567-GES_DISC","title":"3B-HHR-E.MS.MRG.3IMERG.20261013-S233000-E235959.1410.V07B.HDF5",
         "time_start":"2026-10-13T23:30:00.000Z",
         "links":[
            {"rel":"http://esipfed.org/ns/fedsearch/1.1/data#","href":"https://gpm1.gesdisc.eosdis.nasa.gov/data/GPM_L3/3B-HHR-E.MS.MRG.3IMERG.20261013-S233000-E235959.1410.V07B.HDF5"},
            {"rel":"http://esipfed.org/ns/fedsearch/1.1/data#","href":"s3://gesdisc-cumulus-prod-protected/GPM_L3/file.HDF5"},
            {"rel":"http://esipfed.org/ns/fedsearch/1.1/metadata#","href":"https://cmr.earthdata.nasa.gov/search/concepts/G3191234567-GES_DISC.xml"},
            {"rel":"http://esipfed.org/ns/fedsearch/1.1/data#","href":"https://example.org/inherited","inherited":true}
         ]},
        {"id":"G2","title":"no links"}
    ]}}"#;

    struct NoLogin;

    #[async_trait]
    impl CredentialExchange for NoLogin {
        async fn login(
            &self,
            _method: AuthMethod,
            _material: &CredentialMaterial,
        ) -> Result<String, AuthError> {
            Err(AuthError::Rejected("unexpected login".to_string()))
        }
    }

    fn client(granule_dir: PathBuf) -> ArchiveClient {
        let authenticator = Authenticator::new(
            CredentialSource::default(),
            Arc::new(NoLogin),
            BackoffPolicy::default(),
        );
        let http = crate::http::build_client(&crate::config::HttpConfig::default()).unwrap();
        ArchiveClient::new(
            http,
            Arc::new(authenticator),
            "https://cmr.earthdata.nasa.gov/",
            granule_dir,
            10,
        )
    }

    #[test]
    fn test_parses_search_feed() {
        let response: SearchResponse = serde_json::from_str(FEED).unwrap();
        let granules: Vec<Granule> = response.feed.entry.into_iter().map(Granule::from).collect();

        assert_eq!(granules.len(), 2);
        assert_eq!(granules[0].data_links.len(), 1);
        assert_eq!(
            granules[0].time_start.as_deref(),
            Some("2026-10-13T23:30:00.000Z")
        );
        assert_eq!(
            granules[0].file_name().as_deref(),
            Some("3B-HHR-E.MS.MRG.3IMERG.20261013-S233000-E235959.1410.V07B.HDF5")
        );
        assert!(granules[1].data_links.is_empty());
        assert_eq!(granules[1].local_name(), None);
    }

    #[test]
    fn test_local_name_is_granule_unique() {
        let granule = Granule {
            id: "G1/odd id".to_string(),
            title: String::new(),
            time_start: None,
            data_links: vec!["https://data.example/path/MERRA2_400.inst1_2d_asm_Nx.20261013.nc4?x=1".to_string()],
        };
        assert_eq!(
            granule.local_name().as_deref(),
            Some("G1_odd_id-MERRA2_400.inst1_2d_asm_Nx.20261013.nc4")
        );
    }

    #[test]
    fn test_search_url() {
        let dir = tempfile::tempdir().unwrap();
        let archive = client(dir.path().to_path_buf());
        let query = LocationQuery::new(-27.5954, -48.548, 5000).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 10, 14, 12, 0, 0).unwrap();
        let url = archive.search_url("GPM_3IMERGHHE", &query, end - ChronoDuration::days(7), end);

        assert!(url.starts_with("https://cmr.earthdata.nasa.gov/search/granules.json?short_name=GPM_3IMERGHHE"));
        assert!(url.contains("circle%5B%5D=-48.548%2C-27.5954%2C5000"));
        assert!(url.contains("temporal%5B%5D=2026-10-07T12%3A00%3A00Z%2C2026-10-14T12%3A00%3A00Z"));
        assert!(url.contains("sort_key%5B%5D=-start_date"));
        assert!(url.ends_with("page_size=10"));
    }

    #[tokio::test]
    async fn test_existing_download_is_reused_without_session() {
        let dir = tempfile::tempdir().unwrap();
        let archive = client(dir.path().to_path_buf());
        let granule = Granule {
            id: "G42".to_string(),
            title: String::new(),
            time_start: None,
            data_links: vec!["https://data.example/M2I1NXASM/file.nc4".to_string()],
        };
        let expected = dir.path().join("M2I1NXASM").join("G42-file.nc4");
        std::fs::create_dir_all(expected.parent().unwrap()).unwrap();
        std::fs::write(&expected, b"granule").unwrap();

        let path = archive.download("M2I1NXASM", &granule).await.unwrap();
        assert_eq!(path, expected);
    }

    #[tokio::test]
    async fn test_search_without_session_is_authentication_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = client(dir.path().to_path_buf());
        let query = LocationQuery::new(10.0, 10.0, 1000).unwrap();
        let result = archive.search("GPM_3IMERGHHE", &query, Utc::now(), 7).await;
        assert!(matches!(result, Err(SourceError::Authentication(_))));
    }

    /// Answers every request with 503 and counts the requests it saw
    async fn unavailable_identity_provider() -> (String, Arc<std::sync::atomic::AtomicUsize>) {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                if request.starts_with(b"POST") {
                    seen.fetch_add(1, Ordering::SeqCst);
                }
                let _ = socket
                    .write_all(
                        b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                    )
                    .await;
            }
        });
        (base_url, requests)
    }

    #[tokio::test]
    async fn test_login_is_sent_once_despite_retry_policy() {
        let (urs_base_url, posts) = unavailable_identity_provider().await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = SafeOutConfig::default();
        config.cache.dir = dir.path().display().to_string();
        config.http.max_retries = 3;
        config.earthdata.urs_base_url = urs_base_url;
        config.earthdata.username = Some("alice".to_string());
        config.earthdata.password = Some("s3cret".to_string());
        config.earthdata.netrc_path = Some(dir.path().join("absent-netrc").display().to_string());

        let http = crate::http::build_client(&config.http).unwrap();
        let archive = ArchiveClient::from_config(http, &config).unwrap();

        assert!(!archive.authenticator().ensure_authenticated().await);
        assert_eq!(posts.load(std::sync::atomic::Ordering::SeqCst), 1);

        let status = archive.authenticator().status().await;
        assert_eq!(status.attempted, vec![AuthMethod::UsernamePassword]);
        assert!(status.last_error.unwrap().contains("503"));
    }
}
