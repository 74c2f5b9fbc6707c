//! Video identifier extraction for the embedded player.

/// Length of a YouTube video identifier.
pub const VIDEO_ID_LEN: usize = 11;

const PREFIXES: [&str; 5] = ["youtu.be/", "v/", "embed/", "watch?v=", "&v="];

/// Extract the video identifier from a pasted URL or bare identifier.
///
/// The rightmost recognised marker wins (`youtu.be/`, `v/`, `u/<c>/`,
/// `embed/`, `watch?v=`, `&v=`); the identifier runs up to the first
/// `#`, `&` or `?` after it.
pub fn extract_video_id(input: &str) -> Option<String> {
    let input = input.trim();
    if is_valid_id(input) {
        return Some(input.to_string());
    }

    let start = (0..input.len())
        .rev()
        .filter(|&i| input.is_char_boundary(i))
        .find_map(|i| marker_len_at(&input[i..]).map(|len| i + len))?;

    let rest = &input[start..];
    let end = rest.find(&['#', '&', '?'][..]).unwrap_or(rest.len());
    let id = &rest[..end];
    is_valid_id(id).then(|| id.to_string())
}

/// Length of the marker at the start of `s`, if any.
fn marker_len_at(s: &str) -> Option<usize> {
    if let Some(p) = PREFIXES.iter().find(|p| s.starts_with(*p)) {
        return Some(p.len());
    }
    // u/<word char>/
    let bytes = s.as_bytes();
    if bytes.len() >= 4
        && bytes[0] == b'u'
        && bytes[1] == b'/'
        && (bytes[2].is_ascii_alphanumeric() || bytes[2] == b'_')
        && bytes[3] == b'/'
    {
        return Some(4);
    }
    None
}

fn is_valid_id(id: &str) -> bool {
    id.len() == VIDEO_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_url() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
    }

    #[test]
    fn short_and_embed_urls() {
        assert_eq!(
            extract_video_id("https://youtu.be/dQw4w9WgXcQ?t=42").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/embed/dQw4w9WgXcQ#start").as_deref(),
            Some("dQw4w9WgXcQ")
        );
        assert_eq!(
            extract_video_id("https://www.youtube.com/u/x/dQw4w9WgXcQ").as_deref(),
            Some("dQw4w9WgXcQ")
        );
    }

    #[test]
    fn v_param_after_other_params() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ&t=1")
                .as_deref(),
            Some("dQw4w9WgXcQ")
        );
    }

    #[test]
    fn bare_identifier() {
        assert_eq!(extract_video_id("  dQw4w9WgXcQ ").as_deref(), Some("dQw4w9WgXcQ"));
    }

    #[test]
    fn wrong_length_rejected() {
        assert_eq!(extract_video_id("https://youtu.be/short"), None);
        assert_eq!(extract_video_id("https://example.com/"), None);
        assert_eq!(extract_video_id(""), None);
    }
}
