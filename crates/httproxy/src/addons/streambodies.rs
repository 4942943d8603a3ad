//! The `streambodies` addon: flips a flow's body to streaming mode once
//! it exceeds `Options::stream_large_bodies` (spec §4.I). The bytes
//! still go out to the client exactly as framed on the wire either way
//! (§4.B already reads/writes the whole body before this decision is
//! made) — what this addon controls is what addons themselves get to
//! see: a `content: None` flow, matching the spec's `Message.content`
//! definition of "None means streamed/not-yet-read" (§3).
//!
//! An original decision function, listed as one of the always-on
//! defaults the way `addons/__init__.py`'s `default_addons()` lists its
//! own; the trade it encodes is avoiding handing a multi-addon chain a
//! megabytes-large buffer it can't usefully process as a single value.

/// Returns the content addons should see for a body of `len` bytes, given
/// the configured threshold: the real bytes under the limit, or `None`
/// once streaming kicks in. `threshold = None` disables streaming
/// entirely (addons always see the full body).
pub fn addon_visible_content(content: Vec<u8>, threshold: Option<usize>) -> Option<Vec<u8>> {
    match threshold {
        Some(max) if content.len() > max => None,
        _ => Some(content),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_under_threshold_stays_visible() {
        let body = vec![0u8; 10];
        assert_eq!(addon_visible_content(body.clone(), Some(100)), Some(body));
    }

    #[test]
    fn body_over_threshold_is_hidden() {
        let body = vec![0u8; 200];
        assert_eq!(addon_visible_content(body, Some(100)), None);
    }

    #[test]
    fn no_threshold_always_shows_the_body() {
        let body = vec![0u8; 1_000_000];
        assert_eq!(addon_visible_content(body.clone(), None), Some(body));
    }
}
