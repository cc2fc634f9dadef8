//! Per-origin `robots.txt` fetch-and-cache, consulted by the crawl engine
//! (C4) before every fetch attempt regardless of which fetcher (HTTP or
//! browser) will actually perform it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use texting_robots::Robot;
use url::Url;

/// Origins beyond this count are evicted in insertion order. Not part of the
/// spec; guards against unbounded growth in a long-lived host process.
const MAX_CACHED_ORIGINS: usize = 1024;

const DEFAULT_USER_AGENT: &str = "fetchcorpus";

struct CachedRobot {
    robot: Option<Robot>,
}

/// Shared, lock-protected cache of one parsed `Robot` matcher per origin
/// (`scheme://host[:port]`).
pub struct RobotsCache {
    user_agent: String,
    client: reqwest::Client,
    entries: Mutex<HashMap<String, CachedRobot>>,
    insertion_order: Mutex<Vec<String>>,
}

impl RobotsCache {
    pub fn new(client: reqwest::Client) -> Arc<Self> {
        Self::with_user_agent(client, DEFAULT_USER_AGENT)
    }

    pub fn with_user_agent(client: reqwest::Client, user_agent: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            user_agent: user_agent.into(),
            client,
            entries: Mutex::new(HashMap::new()),
            insertion_order: Mutex::new(Vec::new()),
        })
    }

    fn origin_key(url: &Url) -> String {
        let scheme = url.scheme();
        let host = url.host_str().unwrap_or("");
        match url.port() {
            Some(port) => format!("{scheme}://{host}:{port}"),
            None => format!("{scheme}://{host}"),
        }
    }

    /// Returns `true` if `url` may be fetched by our user agent. Fails open
    /// (permits the fetch) when `robots.txt` is missing, unreachable, or
    /// fails to parse, per the usual crawler convention of treating an
    /// absent policy as "no restriction".
    pub async fn is_allowed(&self, url: &Url) -> bool {
        let key = Self::origin_key(url);

        {
            let entries = self.entries.lock().await;
            if let Some(cached) = entries.get(&key) {
                return match &cached.robot {
                    Some(robot) => robot.allowed(url.as_str()),
                    None => true,
                };
            }
        }

        let robot = self.fetch_and_parse(url, &key).await;
        let allowed = match &robot {
            Some(r) => r.allowed(url.as_str()),
            None => true,
        };

        self.insert(key, CachedRobot { robot }).await;
        allowed
    }

    async fn fetch_and_parse(&self, url: &Url, origin: &str) -> Option<Robot> {
        let robots_url = format!("{origin}/robots.txt");
        let resp = self.client.get(&robots_url).send().await.ok()?;
        if !resp.status().is_success() {
            return None;
        }
        let body = resp.bytes().await.ok()?;
        match Robot::new(&self.user_agent, &body) {
            Ok(robot) => Some(robot),
            Err(_) => {
                tracing::warn!(url = %url, "failed to parse robots.txt");
                None
            }
        }
    }

    async fn insert(&self, key: String, cached: CachedRobot) {
        let mut entries = self.entries.lock().await;
        let mut order = self.insertion_order.lock().await;

        if !entries.contains_key(&key) {
            order.push(key.clone());
        }
        entries.insert(key, cached);

        while order.len() > MAX_CACHED_ORIGINS {
            let oldest = order.remove(0);
            entries.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn disallowed_path_is_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"))
            .mount(&server)
            .await;

        let cache = RobotsCache::new(reqwest::Client::new());
        let allowed = Url::parse(&format!("{}/public/page", server.uri())).unwrap();
        let blocked = Url::parse(&format!("{}/private/page", server.uri())).unwrap();

        assert!(cache.is_allowed(&allowed).await);
        assert!(!cache.is_allowed(&blocked).await);
    }

    #[tokio::test]
    async fn missing_robots_txt_fails_open() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let cache = RobotsCache::new(reqwest::Client::new());
        let url = Url::parse(&format!("{}/anything", server.uri())).unwrap();
        assert!(cache.is_allowed(&url).await);
    }

    #[tokio::test]
    async fn second_lookup_for_same_origin_uses_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /x\n"))
            .expect(1)
            .mount(&server)
            .await;

        let cache = RobotsCache::new(reqwest::Client::new());
        let url_a = Url::parse(&format!("{}/a", server.uri())).unwrap();
        let url_b = Url::parse(&format!("{}/b", server.uri())).unwrap();
        assert!(cache.is_allowed(&url_a).await);
        assert!(cache.is_allowed(&url_b).await);
    }

    #[test]
    fn origin_key_ignores_path_and_includes_explicit_port() {
        let a = Url::parse("https://example.com:8443/a/b").unwrap();
        let b = Url::parse("https://example.com:8443/c").unwrap();
        assert_eq!(RobotsCache::origin_key(&a), RobotsCache::origin_key(&b));
        assert_eq!(RobotsCache::origin_key(&a), "https://example.com:8443");
    }
}
