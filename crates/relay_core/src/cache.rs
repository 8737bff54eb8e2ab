use url::Url;

/// Query parameter carrying the cache-defeat suffix.
pub const CACHE_DEFEAT_PARAM: &str = "cb";

/// Appends `cb=<stamp>-<index>` to `url`.
///
/// Preview caches key on the URL string, so a fresh stamp per run forces a
/// re-fetch of an image whose signed URL may otherwise look unchanged.
pub fn cache_defeat(url: &str, stamp: &str, index: usize) -> String {
    let value = format!("{stamp}-{index}");
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed
                .query_pairs_mut()
                .append_pair(CACHE_DEFEAT_PARAM, &value);
            parsed.to_string()
        }
        // Opaque or relative input: append textually, keeping any fragment last.
        Err(_) => {
            let (base, fragment) = match url.split_once('#') {
                Some((base, fragment)) => (base, Some(fragment)),
                None => (url, None),
            };
            let separator = if base.contains('?') { '&' } else { '?' };
            let mut out = format!("{base}{separator}{CACHE_DEFEAT_PARAM}={value}");
            if let Some(fragment) = fragment {
                out.push('#');
                out.push_str(fragment);
            }
            out
        }
    }
}
