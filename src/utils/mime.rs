//! MIME type detection utilities

/// Guess MIME by file path or URL (extension-based)
pub fn guess_mime_from_path_or_url(path_or_url: &str) -> Option<String> {
    let trimmed = path_or_url
        .split(['?', '#'])
        .next()
        .unwrap_or(path_or_url);
    mime_guess::from_path(trimmed)
        .first_raw()
        .map(|s| s.to_string())
}

/// Whether a path or URL names an image (by extension), or is an image data URL.
pub fn is_image_path(path_or_url: &str) -> bool {
    let p = path_or_url.trim();
    if p.starts_with("data:image/") {
        return true;
    }
    guess_mime_from_path_or_url(p).is_some_and(|m| m.starts_with("image/"))
}
