//! 社交平台识别：平台检测、handle 提取、文章 URL 过滤

pub mod schema;

use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub use schema::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SocialPlatform {
    Instagram,
    Tiktok,
    Twitter,
    Youtube,
    Linkedin,
}

impl SocialPlatform {
    pub const ALL: [SocialPlatform; 5] = [
        SocialPlatform::Instagram,
        SocialPlatform::Tiktok,
        SocialPlatform::Twitter,
        SocialPlatform::Youtube,
        SocialPlatform::Linkedin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SocialPlatform::Instagram => "instagram",
            SocialPlatform::Tiktok => "tiktok",
            SocialPlatform::Twitter => "twitter",
            SocialPlatform::Youtube => "youtube",
            SocialPlatform::Linkedin => "linkedin",
        }
    }

    /// handle 取各模式最后一个捕获组
    fn patterns(&self) -> &'static [&'static str] {
        match self {
            SocialPlatform::Instagram => &[r"(?i)instagram\.com/([^/?]+)", r"(?i)instagr\.am/([^/?]+)"],
            SocialPlatform::Tiktok => &[r"(?i)tiktok\.com/@?([^/?]+)"],
            SocialPlatform::Twitter => &[r"(?i)twitter\.com/([^/?]+)", r"(?i)x\.com/([^/?]+)"],
            SocialPlatform::Youtube => &[
                r"(?i)youtube\.com/(channel/|c/|user/|@)?([^/?]+)",
                r"(?i)youtu\.be/([^/?]+)",
            ],
            SocialPlatform::Linkedin => &[r"(?i)linkedin\.com/(in|company)/([^/?]+)"],
        }
    }

    fn regexes(&self) -> &'static [Regex] {
        static COMPILED: OnceLock<Vec<Vec<Regex>>> = OnceLock::new();
        let all = COMPILED.get_or_init(|| {
            SocialPlatform::ALL
                .iter()
                .map(|p| p.patterns().iter().filter_map(|re| Regex::new(re).ok()).collect())
                .collect()
        });
        let idx = SocialPlatform::ALL
            .iter()
            .position(|p| p == self)
            .unwrap_or_default();
        all.get(idx).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl std::fmt::Display for SocialPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 按固定平台顺序匹配，第一个命中的平台胜出
pub fn detect_platform(url: &str) -> Option<SocialPlatform> {
    SocialPlatform::ALL
        .into_iter()
        .find(|p| p.regexes().iter().any(|re| re.is_match(url)))
}

pub fn extract_handle(url: &str, platform: SocialPlatform) -> Option<String> {
    platform.regexes().iter().find_map(|re| {
        let caps = re.captures(url)?;
        caps.get(caps.len() - 1)
            .map(|m| m.as_str().to_string())
            .filter(|h| !h.is_empty())
    })
}

/// 文章 URL：丢弃社交平台链接，最多保留 max 个
pub fn filter_article_urls(urls: &[String], max: usize) -> Vec<String> {
    static SOCIAL: OnceLock<Option<Regex>> = OnceLock::new();
    let social = SOCIAL.get_or_init(|| {
        Regex::new(r"(?i)instagram\.com|tiktok\.com|twitter\.com|x\.com|youtube\.com|linkedin\.com").ok()
    });
    urls.iter()
        .take(max)
        .filter(|u| social.as_ref().map_or(true, |re| !re.is_match(u)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_platform() {
        assert_eq!(detect_platform("https://www.instagram.com/chef.jo/"), Some(SocialPlatform::Instagram));
        assert_eq!(detect_platform("https://tiktok.com/@dancer"), Some(SocialPlatform::Tiktok));
        assert_eq!(detect_platform("https://x.com/someone"), Some(SocialPlatform::Twitter));
        assert_eq!(detect_platform("https://youtu.be/abc"), Some(SocialPlatform::Youtube));
        assert_eq!(detect_platform("https://linkedin.com/in/jane"), Some(SocialPlatform::Linkedin));
        assert_eq!(detect_platform("https://example.com/blog"), None);
    }

    #[test]
    fn test_extract_handle_uses_last_group() {
        assert_eq!(
            extract_handle("https://youtube.com/@beatmaker?sub=1", SocialPlatform::Youtube).as_deref(),
            Some("beatmaker")
        );
        assert_eq!(
            extract_handle("https://youtube.com/channel/UC123", SocialPlatform::Youtube).as_deref(),
            Some("UC123")
        );
        assert_eq!(
            extract_handle("https://linkedin.com/company/acme", SocialPlatform::Linkedin).as_deref(),
            Some("acme")
        );
        assert_eq!(
            extract_handle("https://tiktok.com/@dancer", SocialPlatform::Tiktok).as_deref(),
            Some("dancer")
        );
        assert_eq!(
            extract_handle("https://instagram.com/chef.jo?hl=en", SocialPlatform::Instagram).as_deref(),
            Some("chef.jo")
        );
    }

    #[test]
    fn test_extract_handle_missing() {
        assert_eq!(extract_handle("https://example.com", SocialPlatform::Instagram), None);
    }

    #[test]
    fn test_filter_article_urls() {
        let urls: Vec<String> = [
            "https://forbes.com/a",
            "https://instagram.com/x",
            "https://blog.example.com/b",
            "https://news.example.com/c",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(
            filter_article_urls(&urls, 3),
            vec!["https://forbes.com/a", "https://blog.example.com/b"]
        );
    }
}
