//! Rewrites a raw release file name into space-separated tokens.
//!
//! `normalize` is pure. Each step below works on the previous step's output;
//! steps that need look-around are hand-written scanners because `regex`
//! has no look-around.

use std::sync::LazyLock;

use regex::Regex;

static SCHEME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)https?://").unwrap());
static WWW_DOTTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)www\.[a-z0-9]+\.[a-z0-9./]+").unwrap());
static WWW_SPACED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)www\s[a-z0-9]+\s[a-z0-9./]+").unwrap());

static SEASON_EPISODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)S(\d+)E(\d+)").unwrap());
static SEASON_PART_EPISODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)S(\d+)P(\d+)E(\d+)").unwrap());
static SEASON_PART_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)S(\d+)P(\d+)").unwrap());
static SEASON_EP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)S(\d+)Ep(\d+)").unwrap());

static DASH_BEFORE_BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-([\[\(\]\)])").unwrap());
static DASH_AFTER_BRACKET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\[\(\]\)])-").unwrap());

static EMPTY_BRACKETS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\(\)|\[\]").unwrap());
static SPACES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static DASHES_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"-+").unwrap());

// uploaders split the codec name: "x 265", "H 264"
static SPLIT_X26_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i) x 26").unwrap());
static SPLIT_H26_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i) h 26").unwrap());

pub fn normalize(raw: &str) -> String {
    let s = strip_links(raw);
    let s = split_episode_markers(&s);
    let s = replace_periods(&s);
    let s = s.replace('_', " ");
    let s = DASH_BEFORE_BRACKET_RE.replace_all(&s, "$1");
    let s = DASH_AFTER_BRACKET_RE.replace_all(&s, "$1").into_owned();
    let s = drop_release_group_dash(&s);
    let s = pad_brackets(&s);
    let s = pad_loose_dashes(&s);
    let s = EMPTY_BRACKETS_RE.replace_all(&s, " ");
    let s = SPACES_RE.replace_all(&s, " ");
    let s = DASHES_RE.replace_all(&s, "-");
    let s = SPLIT_X26_RE.replace_all(&s, " x26");
    let s = SPLIT_H26_RE.replace_all(&s, " h26");
    s.trim_matches(|c: char| c.is_whitespace() || c == '-')
        .to_string()
}

fn strip_links(s: &str) -> String {
    let s = SCHEME_RE.replace_all(s, "");
    let s = WWW_DOTTED_RE.replace_all(&s, "");
    WWW_SPACED_RE.replace_all(&s, "").into_owned()
}

/// S05E05 -> S05 E05, S01P02E03 -> S01 P02 E03, S01P02 -> S01 P02, S01Ep02 -> S01 E02.
fn split_episode_markers(s: &str) -> String {
    let s = SEASON_EPISODE_RE.replace_all(s, "S${1} E${2}");
    let s = SEASON_PART_EPISODE_RE.replace_all(&s, "S${1} P${2} E${3}");
    let s = SEASON_PART_RE.replace_all(&s, "S${1} P${2}");
    SEASON_EP_RE.replace_all(&s, "S${1} E${2}").into_owned()
}

/// A period survives only as a decimal point: digit on both sides, exactly one
/// digit after it, and that digit not followed by another `.digit`.
/// Keeps `7.1` and `5.1`; splits `1973.480p`, `E02.720p`, and `1973.7.1` into `1973 7.1`.
fn replace_periods(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let digit_at = |i: usize| chars.get(i).is_some_and(|c| c.is_ascii_digit());
    chars
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            if c != '.' {
                return c;
            }
            let decimal = i > 0
                && digit_at(i - 1)
                && digit_at(i + 1)
                && !digit_at(i + 2)
                && !(chars.get(i + 2) == Some(&'.') && digit_at(i + 3));
            if decimal {
                '.'
            } else {
                ' '
            }
        })
        .collect()
}

fn is_word_or_bracket(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '[' | ']' | '(' | ')')
}

/// `x265-GalaxyTV` -> `x265 GalaxyTV`: the final hyphen, when only word or
/// bracket characters follow it and one precedes it.
fn drop_release_group_dash(s: &str) -> String {
    let Some(pos) = s.rfind('-') else {
        return s.to_string();
    };
    let (head, tail) = (&s[..pos], &s[pos + 1..]);
    let preceded = head.chars().next_back().is_some_and(is_word_or_bracket);
    if preceded && tail.chars().all(is_word_or_bracket) {
        format!("{} {}", head, tail)
    } else {
        s.to_string()
    }
}

fn opens(c: char) -> bool {
    c == '[' || c == '('
}

fn closes(c: char) -> bool {
    c == ']' || c == ')'
}

/// `Show[720p]` -> `Show [720p]`, `(2019)Name` -> `(2019) Name`.
fn pad_brackets(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut spaced_open = String::with_capacity(s.len() + 8);
    for (i, &c) in chars.iter().enumerate() {
        if opens(c) && i > 0 && (chars[i - 1].is_ascii_alphanumeric() || closes(chars[i - 1])) {
            spaced_open.push(' ');
        }
        spaced_open.push(c);
    }

    let chars: Vec<char> = spaced_open.chars().collect();
    let mut out = String::with_capacity(spaced_open.len() + 8);
    for (i, &c) in chars.iter().enumerate() {
        out.push(c);
        if closes(c)
            && chars
                .get(i + 1)
                .is_some_and(|&n| n.is_ascii_alphanumeric() || opens(n))
        {
            out.push(' ');
        }
    }
    out
}

/// A hyphen that already touches a space on one side gets one on both:
/// `x264- yts` and `x264 -yts` become `x264 - yts`. `Spider-Man` is left alone.
fn pad_loose_dashes(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 8);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        if c == ' ' && next == Some('-') && i > 0 && !chars[i - 1].is_whitespace() {
            out.push_str(" - ");
            i += 2;
            continue;
        }
        if c == '-' && next == Some(' ') && chars.get(i + 2).is_some_and(|n| !n.is_whitespace()) {
            out.push_str(" - ");
            i += 1;
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn season_episode_and_release_group() {
        let out = normalize("Show.S05E05.1080p.x264-GalaxyTV");
        assert_eq!(out, "Show S05 E05 1080p x264 GalaxyTV");
        assert!(!out.contains("-GalaxyTV"));
        assert!(!out.contains("  "));
    }

    #[test]
    fn deterministic() {
        let raw = "[SubGroup] Some_Show - 03 (1080p) [ABCD1234]";
        assert_eq!(normalize(raw), normalize(raw));
    }

    #[test]
    fn keeps_channel_decimal() {
        let out = normalize("Movie.1973.7.1.Audio");
        assert_eq!(out, "Movie 1973 7.1 Audio");
        assert!(out.split(' ').any(|t| t == "7.1"));
        assert!(!out.contains("7 1"));
    }

    #[test]
    fn splits_year_resolution_and_episode_resolution() {
        assert_eq!(normalize("Film.1973.480p.DDP5.1"), "Film 1973 480p DDP5.1");
        assert_eq!(normalize("Show.E02.720p.WEB"), "Show E02 720p WEB");
    }

    #[test]
    fn episode_marker_variants() {
        assert_eq!(normalize("show.s01ep02.mkv"), "show S01 E02 mkv");
        assert_eq!(normalize("Show S01P02E03"), "Show S01 P02 E03");
        assert_eq!(normalize("Show S02P01 Finale"), "Show S02 P01 Finale");
    }

    #[test]
    fn strips_links() {
        assert_eq!(
            normalize("www.SiteName.org - Movie.Title.2019.720p"),
            "Movie Title 2019 720p"
        );
        assert_eq!(normalize("https://example.com Movie"), "example com Movie");
        assert_eq!(normalize("www Torrenting com - Film 2020"), "Film 2020");
    }

    #[test]
    fn brackets_and_dashes() {
        assert_eq!(
            normalize("Show_Name-[1080p]-(2019)x265-mSD[eztv]"),
            "Show Name [1080p] (2019) x265 mSD [eztv]"
        );
        assert_eq!(normalize("Movie.Name.x264- yts extra"), "Movie Name x264 - yts extra");
        assert_eq!(normalize("Spider-Man Far From Home"), "Spider-Man Far From Home");
    }

    #[test]
    fn empty_brackets_and_edges() {
        assert_eq!(normalize("- Name () [] --"), "Name");
        assert_eq!(normalize("Movie--Title"), "Movie-Title");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn rejoins_split_codec() {
        assert_eq!(normalize("Movie 2020 X 265 HEVC"), "Movie 2020 x265 HEVC");
        assert_eq!(normalize("Movie.2020.H.264"), "Movie 2020 h264");
    }
}
