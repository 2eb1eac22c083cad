// SPDX-License-Identifier: GPL-3.0-or-later
//! Decides whether an observed network URL is an audio stream.

use lazy_static::lazy_static;
use regex::Regex;
use tunefetch_config::SiteProfile;
use tunefetch_infrastructure::NetworkEvent;

lazy_static! {
    static ref IMAGE_PATTERN: Regex =
        Regex::new(r"(?i)\.(jpg|jpeg|png|gif|svg|webp|ico|bmp)(\?.*)?$").expect("valid image regex");
    static ref QUALITY_SUFFIX_PATTERN: Regex =
        Regex::new(r"(?i)_\d{2,3}\.(mp4|m4a|aac|mp3)(\?.*)?$").expect("valid quality suffix regex");
    static ref HASHED_MEDIA_PATTERN: Regex =
        Regex::new(r"(?i)/[a-f0-9]{32}_\d{2,3}\.(mp4|m4a|aac|mp3)").expect("valid hashed media regex");
    pub(crate) static ref AUDIO_EXTENSION_PATTERN: Regex =
        Regex::new(r"(?i)\.(mp3|wav|m4a|ogg|aac|flac|webm|opus|wma|mp4)(\?.*)?$")
            .expect("valid audio extension regex");
}

/// Which rule accepted or rejected a URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Image,
    SiteMedia,
    HashedMedia,
    Extension,
    ContentType,
    MediaResource,
    NotAudio,
}

impl Verdict {
    pub fn is_audio(self) -> bool {
        !matches!(self, Verdict::Image | Verdict::NotAudio)
    }
}

/// Layered classifier: image rejection first, then site media patterns,
/// the generic hashed-file pattern, known audio extensions, audio content
/// types, and finally the browser's media resource type.
#[derive(Debug, Clone, Default)]
pub struct AudioClassifier {
    media_host_markers: Vec<String>,
}

impl AudioClassifier {
    pub fn for_profile(profile: &SiteProfile) -> Self {
        Self {
            media_host_markers: profile
                .media_host_markers
                .iter()
                .map(|marker| marker.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn classify(
        &self,
        url: &str,
        resource_type: Option<&str>,
        content_type: Option<&str>,
    ) -> Verdict {
        let lower = url.to_ascii_lowercase();
        if !(lower.starts_with("http://") || lower.starts_with("https://")) {
            return Verdict::NotAudio;
        }
        if IMAGE_PATTERN.is_match(&lower) {
            return Verdict::Image;
        }
        if self.media_host_markers.iter().any(|m| lower.contains(m.as_str()))
            && QUALITY_SUFFIX_PATTERN.is_match(&lower)
        {
            return Verdict::SiteMedia;
        }
        if HASHED_MEDIA_PATTERN.is_match(&lower) {
            return Verdict::HashedMedia;
        }
        if AUDIO_EXTENSION_PATTERN.is_match(&lower) {
            return Verdict::Extension;
        }
        if content_type.is_some_and(|ct| ct.to_ascii_lowercase().contains("audio")) {
            return Verdict::ContentType;
        }
        if resource_type.is_some_and(|rt| rt.eq_ignore_ascii_case("media")) {
            return Verdict::MediaResource;
        }
        Verdict::NotAudio
    }

    pub fn is_audio(&self, url: &str, resource_type: Option<&str>, content_type: Option<&str>) -> bool {
        self.classify(url, resource_type, content_type).is_audio()
    }

    pub fn classify_event(&self, event: &NetworkEvent) -> Verdict {
        self.classify(event.url(), event.resource_type(), event.content_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jiosaavn() -> AudioClassifier {
        AudioClassifier::for_profile(&SiteProfile::jiosaavn())
    }

    #[test]
    fn image_extension_wins_over_audio_content_type() {
        let classifier = jiosaavn();
        assert_eq!(
            classifier.classify("https://cdn.example/abc.jpg?x=1", None, Some("audio/mpeg")),
            Verdict::Image
        );
    }

    #[test]
    fn hashed_cdn_file_is_audio_and_cover_art_is_not() {
        let classifier = AudioClassifier::default();
        assert!(classifier.is_audio(
            "https://cdn.example.com/ab12ab12ab12ab12ab12ab12ab12ab12_160.mp4",
            None,
            None
        ));
        let cover = "https://cdn.example.com/cover_500x500.jpg";
        assert_eq!(classifier.classify(cover, Some("media"), Some("audio/mpeg")), Verdict::Image);
        assert!(!classifier.is_audio(cover, Some("media"), Some("audio/mpeg")));
        assert!(!jiosaavn().is_audio(cover, None, Some("audio/mp4")));
    }

    #[test]
    fn site_cdn_quality_files_are_recognized() {
        let classifier = jiosaavn();
        assert_eq!(
            classifier.classify("https://aac.saavncdn.com/815/8ab7c5c1_160.mp4", None, None),
            Verdict::SiteMedia
        );
    }

    #[test]
    fn hashed_media_files_are_recognized_on_any_host() {
        let classifier = AudioClassifier::default();
        let url = "https://media.example.net/0123456789abcdef0123456789abcdef_96.mp4";
        assert_eq!(classifier.classify(url, None, None), Verdict::HashedMedia);
    }

    #[test]
    fn extension_content_type_and_resource_type_layers() {
        let classifier = AudioClassifier::default();
        assert_eq!(classifier.classify("https://x.org/a.flac?token=1", None, None), Verdict::Extension);
        assert_eq!(
            classifier.classify("https://x.org/stream", None, Some("Audio/MPEG")),
            Verdict::ContentType
        );
        assert_eq!(classifier.classify("https://x.org/stream", Some("media"), None), Verdict::MediaResource);
        assert_eq!(classifier.classify("https://x.org/app.js", Some("script"), None), Verdict::NotAudio);
    }

    #[test]
    fn non_http_urls_are_ignored() {
        let classifier = AudioClassifier::default();
        assert!(!classifier.is_audio("data:audio/mp3;base64,AAAA", None, Some("audio/mpeg")));
        assert!(!classifier.is_audio("blob:https://x.org/123", Some("media"), None));
    }

    #[test]
    fn classifies_network_events() {
        let classifier = AudioClassifier::default();
        let event = NetworkEvent::Response {
            url: "https://x.org/play?id=1".to_string(),
            status: 200,
            headers: vec![("content-type".to_string(), "audio/mp4".to_string())],
        };
        assert_eq!(classifier.classify_event(&event), Verdict::ContentType);
    }
}
