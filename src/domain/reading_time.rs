use html_escape::decode_html_entities;

const WORDS_PER_MINUTE: f64 = 200.0;

/// Estimated reading time of an HTML fragment, in minutes.
pub fn estimate_reading_time(html: &str) -> u32 {
    let words = strip_html(html).split_whitespace().count();
    (words as f64 / WORDS_PER_MINUTE).round() as u32
}

/// Drops script elements and tags, decodes entities, and collapses
/// whitespace to single spaces.
pub fn strip_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut rest = html;
    while let Some(open) = rest.find('<') {
        out.push_str(&rest[..open]);
        out.push(' ');
        let after = &rest[open + 1..];
        let is_script = after
            .get(..6)
            .is_some_and(|tag| tag.eq_ignore_ascii_case("script"));
        if is_script {
            match find_ignore_ascii_case(after, "</script") {
                Some(end) => {
                    let tail = &after[end..];
                    rest = match tail.find('>') {
                        Some(gt) => &tail[gt + 1..],
                        None => "",
                    };
                }
                None => rest = "",
            }
        } else {
            rest = match after.find('>') {
                Some(close) => &after[close + 1..],
                None => "",
            };
        }
    }
    out.push_str(rest);

    let decoded = decode_html_entities(&out);
    decoded.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn find_ignore_ascii_case(haystack: &str, needle: &str) -> Option<usize> {
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle.as_bytes()))
}
