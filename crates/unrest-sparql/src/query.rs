//! SPARQL text for the two event queries.
//!
//! Both queries select the same variables so that their rows decode into the
//! same [`unrest_core::RawRow`] shape:
//!
//! | variable        | meaning                                   |
//! |-----------------|-------------------------------------------|
//! | `?item`         | entity URI                                |
//! | `?itemLabel`    | label (label service)                     |
//! | `?coord`        | WKT point (P625)                          |
//! | `?time`         | point in time (P585), point query only    |
//! | `?start`/`?end` | start/end time (P580/P582), range query   |
//! | `?countryLabel` | country label (P17)                       |
//! | `?article`      | English Wikipedia article                 |
//! | `?type`         | matched class (P31)                       |

use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

use unrest_core::normalize::known_type_ids;

/// Upper bound on rows per query.
pub const ROW_LIMIT: usize = 5000;

/// The `[now - days, now]` window, as SPARQL dateTime literals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: String,
    pub to: String,
}

impl TimeWindow {
    pub fn ending_at(now: OffsetDateTime, days: u32) -> Self {
        let now = now.to_offset(time::UtcOffset::UTC).replace_nanosecond(0).unwrap_or(now);
        let from = now - Duration::days(i64::from(days));
        Self {
            from: literal(from),
            to: literal(now),
        }
    }
}

fn literal(instant: OffsetDateTime) -> String {
    let formatted = instant
        .format(&Rfc3339)
        .unwrap_or_else(|_| instant.unix_timestamp().to_string());
    format!("\"{formatted}\"^^xsd:dateTime")
}

fn type_values() -> String {
    known_type_ids()
        .map(|id| format!("wd:{id}"))
        .collect::<Vec<_>>()
        .join(" ")
}

const OPTIONAL_CONTEXT: &str = r#"  OPTIONAL { ?item wdt:P17 ?country . }
  OPTIONAL {
    ?article schema:about ?item ;
             schema:isPartOf <https://en.wikipedia.org/> .
  }
  SERVICE wikibase:label { bd:serviceParam wikibase:language "[AUTO_LANGUAGE],en". }"#;

/// Events with a coordinate and a single point in time inside the window.
pub fn point_events_query(window: &TimeWindow) -> String {
    format!(
        r#"SELECT ?item ?itemLabel ?coord ?time ?countryLabel ?article ?type WHERE {{
  VALUES ?type {{ {types} }}
  ?item wdt:P31 ?type ;
        wdt:P625 ?coord ;
        wdt:P585 ?time .
  FILTER(?time >= {from} && ?time <= {to})
{context}
}}
LIMIT {limit}"#,
        types = type_values(),
        from = window.from,
        to = window.to,
        context = OPTIONAL_CONTEXT,
        limit = ROW_LIMIT,
    )
}

/// Events with a coordinate and a start time, whose interval intersects the
/// window, or which started before its end and have no end yet.
pub fn range_events_query(window: &TimeWindow) -> String {
    format!(
        r#"SELECT ?item ?itemLabel ?coord ?start ?end ?countryLabel ?article ?type WHERE {{
  VALUES ?type {{ {types} }}
  ?item wdt:P31 ?type ;
        wdt:P625 ?coord ;
        wdt:P580 ?start .
  OPTIONAL {{ ?item wdt:P582 ?end . }}
  FILTER(
    (BOUND(?end) && ?start <= {to} && ?end >= {from})
    || (!BOUND(?end) && ?start <= {to})
  )
{context}
}}
LIMIT {limit}"#,
        types = type_values(),
        from = window.from,
        to = window.to,
        context = OPTIONAL_CONTEXT,
        limit = ROW_LIMIT,
    )
}
