//! Request target helpers, encoded forms are kept verbatim

use percent_encoding::percent_decode_str;

/// Split request target into path and query
pub(super) fn split_query(target: &str) -> (&str, Option<&str>) {
    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}

/// Decode `%XX` sequences, invalid sequences are kept as is
pub(super) fn decode(src: &str) -> String {
    percent_decode_str(src).decode_utf8_lossy().into_owned()
}

/// Decode query component, `+` is a space
pub(super) fn decode_query(src: &str) -> String {
    if src.contains('+') {
        decode(&src.replace('+', " "))
    } else {
        decode(src)
    }
}

/// Find query parameter, the value is decoded
pub(super) fn parameter(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if decode_query(key) == name {
            Some(decode_query(value))
        } else {
            None
        }
    })
}
