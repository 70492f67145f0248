//! Shared site signature table and domain normalization.
//!
//! Signatures resolve window titles to canonical domains without
//! touching a history database. Signature domains are used verbatim,
//! which keeps `music.youtube.com` distinct from `youtube.com`; the
//! history/session fallback collapses hosts to their registrable form.

/// Title substring → canonical domain. Longer signatures are checked
/// first so "YouTube Music" wins over "YouTube".
pub const SITE_SIGNATURES: &[(&str, &str)] = &[
    ("Discord", "discord.com"),
    ("YouTube Music", "music.youtube.com"),
    ("YouTube", "youtube.com"),
    ("IXL", "ixl.com"),
    ("Google Docs", "docs.google.com"),
    ("Google Sheets", "docs.google.com"),
    ("Google Slides", "docs.google.com"),
    ("Google Drive", "drive.google.com"),
    ("Gmail", "mail.google.com"),
    ("Google", "google.com"),
    ("Twitch", "twitch.tv"),
    ("Reddit", "reddit.com"),
    ("Twitter", "twitter.com"),
    ("GitHub", "github.com"),
    ("Netflix", "netflix.com"),
    ("Amazon", "amazon.com"),
    ("Wikipedia", "wikipedia.org"),
    ("Stack Overflow", "stackoverflow.com"),
    ("Coolmath Games", "coolmathgames.com"),
    ("Poki", "poki.com"),
    ("Roblox", "roblox.com"),
    ("ChatGPT", "chatgpt.com"),
    ("Claude", "claude.ai"),
];

/// Match a cleaned window title against the signature table.
pub fn match_signature(title: &str) -> Option<&'static str> {
    let mut signatures: Vec<_> = SITE_SIGNATURES.to_vec();
    signatures.sort_by_key(|(sig, _)| std::cmp::Reverse(sig.len()));
    for &(sig, domain) in &signatures {
        if title.contains(sig) {
            return Some(domain);
        }
    }
    // Pipe-separated titles often end with the site name.
    if let Some((_, site)) = title.rsplit_once(" | ") {
        let site = site.trim();
        return SITE_SIGNATURES
            .iter()
            .find(|(sig, _)| *sig == site)
            .map(|(_, domain)| *domain);
    }
    None
}

/// Two-label public suffixes that need a third label to be
/// registrable.
const TWO_PART_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "gov.uk", "ac.uk", "co.jp", "com.au", "net.au", "org.au", "co.nz",
    "com.br",
];

/// Collapse a host to its registrable domain: strip port and `www.`,
/// keep the last two labels (three over a two-part public suffix).
pub fn registrable_domain(host: &str) -> Option<String> {
    let host = host.to_ascii_lowercase();
    let host = host.split(':').next().unwrap_or(&host);
    let host = host.strip_prefix("www.").unwrap_or(host);
    let labels: Vec<&str> = host.split('.').filter(|l| !l.is_empty()).collect();
    match labels.len() {
        0 => None,
        1 => Some(labels[0].to_string()),
        n => {
            let last_two = labels[n - 2..].join(".");
            if n >= 3 && TWO_PART_SUFFIXES.contains(&last_two.as_str()) {
                Some(labels[n - 3..].join("."))
            } else {
                Some(last_two)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn longer_signature_wins() {
        assert_eq!(
            match_signature("lofi beats - YouTube Music"),
            Some("music.youtube.com")
        );
        assert_eq!(match_signature("cat videos - YouTube"), Some("youtube.com"));
    }

    #[test]
    fn pipe_separated_site_name_resolves() {
        assert_eq!(match_signature("general chat | Discord"), Some("discord.com"));
        assert_eq!(match_signature("weird page | Nowhere"), None);
    }

    #[test]
    fn registrable_strips_www_and_subdomains() {
        assert_eq!(registrable_domain("www.reddit.com").as_deref(), Some("reddit.com"));
        assert_eq!(
            registrable_domain("clips.twitch.tv").as_deref(),
            Some("twitch.tv")
        );
        assert_eq!(
            registrable_domain("news.bbc.co.uk").as_deref(),
            Some("bbc.co.uk")
        );
        assert_eq!(registrable_domain("localhost:8080").as_deref(), Some("localhost"));
        assert_eq!(registrable_domain(""), None);
    }
}
