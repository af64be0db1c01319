//! Site-specific selectors for the listing index.

use std::sync::LazyLock;

use scraper::{Html, Selector};

static NOTICE_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.box-info-detail p").unwrap());
static ROW_SELECTOR: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tbody tr").unwrap());
// the first anchor in the name cell is the category icon
static NAME_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".coll-1.name a:nth-of-type(2)").unwrap());
static SEEDS_SELECTOR: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(".coll-2.seeds").unwrap());

#[derive(Debug, PartialEq, Eq)]
pub enum ListingPage {
    /// The index rendered its "no results" notice. Nothing further to discover.
    Empty(String),
    Rows(Vec<String>),
}

/// Handles of rows with a name link and at least `min_seeds` seeders.
pub fn parse_listing(html: &str, min_seeds: u32) -> ListingPage {
    let document = Html::parse_document(html);

    if let Some(notice) = document.select(&NOTICE_SELECTOR).next() {
        let message = notice.text().collect::<String>().trim().to_string();
        if !message.is_empty() {
            return ListingPage::Empty(message);
        }
    }

    let handles = document
        .select(&ROW_SELECTOR)
        .filter_map(|row| {
            let name = row.select(&NAME_SELECTOR).next()?;
            let seeds = row.select(&SEEDS_SELECTOR).next()?;
            let href = name.value().attr("href")?.trim();
            let seeds: u32 = seeds.text().collect::<String>().trim().parse().ok()?;
            (seeds >= min_seeds && !href.is_empty()).then(|| href.to_string())
        })
        .collect();
    ListingPage::Rows(handles)
}

#[cfg(test)]
pub(crate) fn listing_html(rows: &[(&str, &str)]) -> String {
    let body: String = rows
        .iter()
        .map(|(href, seeds)| {
            format!(
                r#"<tr><td class="coll-1 name"><a href="/sub/41/0/" class="icon"></a><a href="{}">Name</a></td><td class="coll-2 seeds">{}</td></tr>"#,
                href, seeds
            )
        })
        .collect();
    format!("<html><body><table><tbody>{}</tbody></table></body></html>", body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_rows_meeting_seed_threshold() {
        let html = listing_html(&[("/torrent/1/a/", "12"), ("/torrent/2/b/", "0"), ("/torrent/3/c/", "3")]);
        assert_eq!(
            parse_listing(&html, 3),
            ListingPage::Rows(vec!["/torrent/1/a/".into(), "/torrent/3/c/".into()])
        );
    }

    #[test]
    fn skips_rows_missing_cells_or_counts() {
        let html = r#"<table><tbody>
            <tr><td class="coll-1 name"><a href="/icon"></a></td><td class="coll-2 seeds">5</td></tr>
            <tr><td class="coll-1 name"><a href="/i"></a><a href="/torrent/9/z/">Z</a></td></tr>
            <tr><td class="coll-1 name"><a href="/i"></a><a href="/torrent/8/y/">Y</a></td><td class="coll-2 seeds">n/a</td></tr>
        </tbody></table>"#;
        assert_eq!(parse_listing(html, 0), ListingPage::Rows(vec![]));
    }

    #[test]
    fn notice_banner_ends_listing() {
        let html = r#"<div class="box-info-detail"><p> No results were returned. </p></div>"#;
        assert_eq!(
            parse_listing(html, 1),
            ListingPage::Empty("No results were returned.".into())
        );
    }

    #[test]
    fn empty_notice_is_ignored() {
        let html = format!(
            r#"<div class="box-info-detail"><p>  </p></div>{}"#,
            listing_html(&[("/torrent/1/a/", "4")])
        );
        assert_eq!(parse_listing(&html, 1), ListingPage::Rows(vec!["/torrent/1/a/".into()]));
    }
}
