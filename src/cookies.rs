//! Cookie-file lookup for the video fetcher

use crate::config::CookieConfig;
use std::collections::BTreeMap;
use std::path::PathBuf;
use url::Url;

/// Maps a URL to the cookie file of the platform that serves it
#[derive(Clone, Debug, Default)]
pub struct CookieJar {
    dir: Option<PathBuf>,
    platforms: BTreeMap<String, Vec<String>>,
}

impl CookieJar {
    /// Build a jar from configuration
    pub fn new(config: &CookieConfig) -> Self {
        Self {
            dir: config.cookies_dir.clone(),
            platforms: config.platforms.clone(),
        }
    }

    /// Jar that never returns a cookie file
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Platform whose domain list matches the URL host
    pub fn platform_for(&self, url: &str) -> Option<&str> {
        let parsed = Url::parse(url).ok()?;
        let host = parsed.host_str()?.to_ascii_lowercase();

        self.platforms
            .iter()
            .find(|(_, domains)| domains.iter().any(|d| host_matches(&host, d)))
            .map(|(platform, _)| platform.as_str())
    }

    /// `<dir>/<platform>.txt` for the URL's platform, if that file exists
    pub fn for_url(&self, url: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        let platform = self.platform_for(url)?;
        let path = dir.join(format!("{platform}.txt"));

        if path.is_file() {
            tracing::debug!(platform, path = %path.display(), "using cookie file");
            Some(path)
        } else {
            tracing::debug!(platform, path = %path.display(), "no cookie file for platform");
            None
        }
    }
}

/// `host` is `domain` itself or one of its subdomains
fn host_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim_start_matches('.').to_ascii_lowercase();
    host == domain
        || host
            .strip_suffix(domain.as_str())
            .is_some_and(|prefix| prefix.ends_with('.'))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn jar_in(dir: &TempDir) -> CookieJar {
        CookieJar::new(&CookieConfig {
            cookies_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        })
    }

    #[test]
    fn matches_host_and_subdomains_case_insensitively() {
        let jar = CookieJar::new(&CookieConfig::default());

        assert_eq!(
            jar.platform_for("https://WWW.YouTube.com/watch?v=abc"),
            Some("youtube")
        );
        assert_eq!(jar.platform_for("https://youtu.be/abc"), Some("youtube"));
        assert_eq!(jar.platform_for("https://x.com/user/status/1"), Some("twitter"));
        assert_eq!(jar.platform_for("https://fb.watch/xyz"), Some("facebook"));
        assert_eq!(jar.platform_for("https://vimeo.com/123"), None);
        assert_eq!(jar.platform_for("not a url"), None);
    }

    #[test]
    fn domains_match_on_label_boundaries_only() {
        let jar = CookieJar::new(&CookieConfig::default());

        assert_eq!(jar.platform_for("https://www.x.com/user/status/1"), Some("twitter"));
        assert_eq!(jar.platform_for("https://vm.tiktok.com/abc"), Some("tiktok"));
        assert_eq!(jar.platform_for("https://dropbox.com/s/abc/clip.mp4"), None);
        assert_eq!(jar.platform_for("https://www.netflix.com/watch/1"), None);
        assert_eq!(jar.platform_for("https://notyoutube.com/watch?v=abc"), None);
        assert_eq!(jar.platform_for("https://youtube.com.evil.example/abc"), None);
    }

    #[test]
    fn returns_path_only_when_file_exists() {
        let dir = TempDir::new().unwrap();
        let jar = jar_in(&dir);

        assert_eq!(jar.for_url("https://www.tiktok.com/@a/video/1"), None);

        let file = dir.path().join("tiktok.txt");
        std::fs::write(&file, "# Netscape HTTP Cookie File\n").unwrap();
        assert_eq!(jar.for_url("https://www.tiktok.com/@a/video/1"), Some(file));
        assert_eq!(jar.for_url("https://www.instagram.com/p/1"), None);
    }

    #[test]
    fn disabled_jar_never_matches() {
        let jar = CookieJar::disabled();
        assert_eq!(jar.for_url("https://www.youtube.com/watch?v=abc"), None);
    }
}
